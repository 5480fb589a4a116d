use criterion::{criterion_group, criterion_main, Criterion};
use sitewise_core::binding::{Binding, BindingMap};
use sitewise_core::schema::DataType;
use sitewise_core::types::{Column, RowBatch, Scalar};
use sitewise_operators::compute::ComputeExpr;
use sitewise_operators::hash_table::HashTableImpl;
use sitewise_operators::prefix_sum::PrefixSumImpl;
use sitewise_operators::rtree::RTreeImpl;

fn make_batch(rows: usize) -> RowBatch {
    let mut groups = Vec::with_capacity(rows);
    let mut xs = Vec::with_capacity(rows);
    let mut ys = Vec::with_capacity(rows);
    let mut values = Vec::with_capacity(rows);
    for i in 0..rows {
        groups.push(Scalar::Str(format!("group-{}", i % 4)));
        xs.push(Scalar::I64((i % 97) as i64));
        ys.push(Scalar::F64(((i * 31) % 101) as f64));
        values.push(Scalar::F64((i % 10) as f64));
    }
    RowBatch::new(vec![
        Column::new("group", DataType::Utf8, groups),
        Column::new("x", DataType::Int64, xs),
        Column::new("y", DataType::Float64, ys),
        Column::new("value", DataType::Float64, values),
    ])
    .unwrap()
}

fn bench_index_builds(c: &mut Criterion) {
    let batch = make_batch(4096);
    c.bench_function("hash_table_build", |b| {
        b.iter(|| {
            let _ = HashTableImpl::build(&batch, &[ComputeExpr::field("group"), ComputeExpr::field("x")])
                .unwrap();
        })
    });
    c.bench_function("rtree_build", |b| {
        b.iter(|| {
            let _ = RTreeImpl::build(batch.clone(), &[ComputeExpr::field("x"), ComputeExpr::field("y")])
                .unwrap();
        })
    });
    c.bench_function("prefix_sum_build", |b| {
        b.iter(|| {
            let _ = PrefixSumImpl::build(
                batch.clone(),
                (ComputeExpr::field("x"), "x".into()),
                (ComputeExpr::field("group"), "group".into()),
                (ComputeExpr::field("value"), "value".into()),
            )
            .unwrap();
        })
    });
}

fn bench_index_queries(c: &mut Criterion) {
    let batch = make_batch(4096);
    let rtree = RTreeImpl::build(batch.clone(), &[ComputeExpr::field("x"), ComputeExpr::field("y")])
        .unwrap();
    let prefix = PrefixSumImpl::build(
        batch,
        (ComputeExpr::field("x"), "x".into()),
        (ComputeExpr::field("group"), "group".into()),
        (ComputeExpr::field("value"), "value".into()),
    )
    .unwrap();
    c.bench_function("rtree_query", |b| {
        b.iter(|| {
            let _ = rtree.query(&[10.0, 10.0], &[30.0, 30.0]).unwrap();
        })
    });
    c.bench_function("prefix_sum_query", |b| {
        b.iter(|| {
            let _ = prefix.query(&Scalar::I64(10), &Scalar::I64(60)).unwrap();
        })
    });
}

fn bench_binding_hash(c: &mut Criterion) {
    let map: BindingMap = (0..16)
        .map(|i| (format!("choice-{i}"), Binding::Int(i)))
        .collect();
    c.bench_function("binding_structural_hash", |b| {
        b.iter(|| map.structural_hash())
    });
}

criterion_group!(indexes, bench_index_builds, bench_index_queries, bench_binding_hash);
criterion_main!(indexes);
