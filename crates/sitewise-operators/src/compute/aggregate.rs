//! Hash group-by with sum/mean reductions.

use std::collections::HashMap;

use sitewise_core::hash::hash_scalars;
use sitewise_core::schema::DataType;
use sitewise_core::types::{Column, RowBatch, Scalar};

use crate::traits::{OpError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Sum,
    Mean,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSpec {
    pub func: AggFunc,
    pub column: String,
    pub output: String,
}

impl AggregateSpec {
    pub fn new(func: AggFunc, column: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            func,
            column: column.into(),
            output: output.into(),
        }
    }
}

#[derive(Default)]
struct Acc {
    int_sum: i64,
    float_sum: f64,
    count: usize,
}

/// Group `batch` by `keys` (first-seen group order) and reduce each spec.
/// Output columns: keys, then aggregates. Without keys the whole input is one
/// group, so an empty input still yields a single row.
pub fn hash_aggregate(batch: &RowBatch, keys: &[String], aggs: &[AggregateSpec]) -> Result<RowBatch> {
    let key_cols = keys
        .iter()
        .map(|k| lookup(batch, k))
        .collect::<Result<Vec<_>>>()?;
    let agg_cols = aggs
        .iter()
        .map(|a| lookup(batch, &a.column))
        .collect::<Result<Vec<_>>>()?;
    for (spec, col) in aggs.iter().zip(&agg_cols) {
        if !col.data_type.is_numeric() {
            return Err(OpError::Type(format!(
                "cannot aggregate {:?} column '{}'",
                col.data_type, spec.column
            )));
        }
    }

    let mut group_keys: Vec<Vec<Scalar>> = Vec::new();
    let mut accs: Vec<Vec<Acc>> = Vec::new();
    let mut index: HashMap<u64, Vec<usize>> = HashMap::new();

    if keys.is_empty() {
        group_keys.push(Vec::new());
        accs.push(aggs.iter().map(|_| Acc::default()).collect());
    }

    for row in 0..batch.num_rows() {
        let group = if keys.is_empty() {
            0
        } else {
            let key: Vec<Scalar> = key_cols.iter().map(|c| c.values[row].clone()).collect();
            let slot = index.entry(hash_scalars(&key)).or_default();
            match slot.iter().find(|g| group_keys[**g] == key) {
                Some(g) => *g,
                None => {
                    let g = group_keys.len();
                    group_keys.push(key);
                    accs.push(aggs.iter().map(|_| Acc::default()).collect());
                    slot.push(g);
                    g
                }
            }
        };
        for (acc, col) in accs[group].iter_mut().zip(&agg_cols) {
            match &col.values[row] {
                Scalar::I64(v) => {
                    acc.int_sum = acc.int_sum.checked_add(*v).ok_or_else(|| {
                        OpError::Exec(format!("sum overflow in column '{}'", col.name))
                    })?;
                    acc.float_sum += *v as f64;
                    acc.count += 1;
                }
                Scalar::F64(v) => {
                    acc.float_sum += v;
                    acc.count += 1;
                }
                _ => {}
            }
        }
    }

    let mut columns = Vec::with_capacity(keys.len() + aggs.len());
    for (i, col) in key_cols.iter().enumerate() {
        let values = group_keys.iter().map(|k| k[i].clone()).collect();
        columns.push(Column::new(col.name.clone(), col.data_type, values));
    }
    for (j, (spec, col)) in aggs.iter().zip(&agg_cols).enumerate() {
        let int_input = col.data_type == DataType::Int64;
        let (data_type, values) = match spec.func {
            AggFunc::Sum if int_input => (
                DataType::Int64,
                accs.iter()
                    .map(|a| match a[j].count {
                        0 => Scalar::Null,
                        _ => Scalar::I64(a[j].int_sum),
                    })
                    .collect(),
            ),
            AggFunc::Sum => (
                DataType::Float64,
                accs.iter()
                    .map(|a| match a[j].count {
                        0 => Scalar::Null,
                        _ => Scalar::F64(a[j].float_sum),
                    })
                    .collect(),
            ),
            AggFunc::Mean => (
                DataType::Float64,
                accs.iter()
                    .map(|a| match a[j].count {
                        0 => Scalar::Null,
                        n => Scalar::F64(a[j].float_sum / n as f64),
                    })
                    .collect(),
            ),
        };
        columns.push(Column::new(spec.output.clone(), data_type, values));
    }
    Ok(RowBatch::new(columns)?)
}

fn lookup<'a>(batch: &'a RowBatch, name: &str) -> Result<&'a Column> {
    batch
        .column(name)
        .ok_or_else(|| OpError::Schema(format!("no column named '{name}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> RowBatch {
        RowBatch::new(vec![
            Column::new(
                "g",
                DataType::Utf8,
                ["x", "y", "x", "x"]
                    .iter()
                    .map(|s| Scalar::Str((*s).into()))
                    .collect(),
            ),
            Column::new(
                "n",
                DataType::Int64,
                vec![Scalar::I64(1), Scalar::I64(5), Scalar::I64(3), Scalar::Null],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn groups_in_first_seen_order() {
        let out = hash_aggregate(
            &batch(),
            &["g".to_string()],
            &[
                AggregateSpec::new(AggFunc::Sum, "n", "total"),
                AggregateSpec::new(AggFunc::Mean, "n", "avg"),
            ],
        )
        .unwrap();
        assert_eq!(out.num_rows(), 2);
        assert_eq!(out.columns[0].values[0], Scalar::Str("x".into()));
        assert_eq!(out.columns[1].values, vec![Scalar::I64(4), Scalar::I64(5)]);
        assert_eq!(out.columns[2].values, vec![Scalar::F64(2.0), Scalar::F64(5.0)]);
    }

    #[test]
    fn no_keys_yields_single_row() {
        let empty = RowBatch::empty(&batch().schema());
        let out = hash_aggregate(&empty, &[], &[AggregateSpec::new(AggFunc::Sum, "n", "s")]).unwrap();
        assert_eq!(out.num_rows(), 1);
        assert_eq!(out.columns[0].values[0], Scalar::Null);
    }

    #[test]
    fn rejects_string_aggregate() {
        let err = hash_aggregate(&batch(), &[], &[AggregateSpec::new(AggFunc::Sum, "g", "s")]);
        assert!(matches!(err, Err(OpError::Type(_))));
    }
}
