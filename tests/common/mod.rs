//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use sitewise_core::prelude::*;
use sitewise_exec::{ExecContext, TableCatalog};
use sitewise_planner::Site;

/// `sales(region, store, day, amount)`, six rows over two regions.
pub fn sales() -> RowBatch {
    let regions = ["w", "e", "w", "e", "w", "w"];
    let stores = ["s1", "s2", "s1", "s3", "s2", "s1"];
    let days = [1, 1, 2, 2, 3, 3];
    let amounts = [10, 5, 7, 4, 2, 9];
    RowBatch::new(vec![
        Column::new(
            "region",
            DataType::Utf8,
            regions.iter().map(|r| Scalar::Str(r.to_string())).collect(),
        ),
        Column::new(
            "store",
            DataType::Utf8,
            stores.iter().map(|s| Scalar::Str(s.to_string())).collect(),
        ),
        Column::new("day", DataType::Int64, days.iter().map(|d| Scalar::I64(*d)).collect()),
        Column::new(
            "amount",
            DataType::Int64,
            amounts.iter().map(|a| Scalar::I64(*a)).collect(),
        ),
    ])
    .expect("sales table")
}

/// `points(x, y, label)`: (0,0), (5,5), (10,10).
pub fn points() -> RowBatch {
    RowBatch::new(vec![
        Column::new(
            "x",
            DataType::Float64,
            vec![Scalar::F64(0.0), Scalar::F64(5.0), Scalar::F64(10.0)],
        ),
        Column::new(
            "y",
            DataType::Float64,
            vec![Scalar::F64(0.0), Scalar::F64(5.0), Scalar::F64(10.0)],
        ),
        Column::new(
            "label",
            DataType::Utf8,
            vec![
                Scalar::Str("row0".into()),
                Scalar::Str("row1".into()),
                Scalar::Str("row2".into()),
            ],
        ),
    ])
    .expect("points table")
}

pub fn catalog() -> Arc<TableCatalog> {
    let catalog = Arc::new(TableCatalog::new());
    catalog.insert("sales", sales());
    catalog.insert("points", points());
    catalog
}

pub fn context(site: Site) -> ExecContext {
    ExecContext::new(site, EngineConfig::default()).with_catalog(catalog())
}

/// Column `name` of `batch` as strings, for order-sensitive comparisons.
pub fn column_strings(batch: &RowBatch, name: &str) -> Vec<String> {
    batch
        .column(name)
        .expect("column present")
        .values
        .iter()
        .map(|v| v.to_string())
        .collect()
}
