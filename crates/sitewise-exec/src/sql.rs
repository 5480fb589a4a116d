//! SQL backend boundary.
//!
//! `Cloud` nodes ship `to_sql` of their input to a `SqlBackend`; `TableSource`
//! and `ValExpr` domains fall back to it when the local catalog does not have
//! the table. `CatalogSql` is the in-process backend: it answers the two
//! statement shapes the engine itself generates (`SELECT * FROM t` and
//! `SELECT DISTINCT c FROM t`) from a `TableCatalog` and rejects the rest.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;

use sitewise_core::types::{Column, RowBatch};

use crate::context::TableCatalog;
use crate::runtime::{ExecError, Result};

#[async_trait]
pub trait SqlBackend: Send + Sync {
    async fn run_query(&self, sql: &str) -> Result<RowBatch>;
}

pub struct CatalogSql {
    catalog: Arc<TableCatalog>,
}

impl CatalogSql {
    pub fn new(catalog: Arc<TableCatalog>) -> Self {
        Self { catalog }
    }
}

#[async_trait]
impl SqlBackend for CatalogSql {
    async fn run_query(&self, sql: &str) -> Result<RowBatch> {
        let words: Vec<&str> = sql.split_whitespace().collect();
        match words.as_slice() {
            [select, star, from, table]
                if select.eq_ignore_ascii_case("select")
                    && *star == "*"
                    && from.eq_ignore_ascii_case("from") =>
            {
                self.catalog
                    .get(table)
                    .ok_or_else(|| ExecError::Sql(format!("no table '{table}'")))
            }
            [select, distinct, column, from, table]
                if select.eq_ignore_ascii_case("select")
                    && distinct.eq_ignore_ascii_case("distinct")
                    && from.eq_ignore_ascii_case("from") =>
            {
                let batch = self
                    .catalog
                    .get(table)
                    .ok_or_else(|| ExecError::Sql(format!("no table '{table}'")))?;
                distinct_column(&batch, column)
            }
            _ => Err(ExecError::Sql(format!("unsupported statement: {sql}"))),
        }
    }
}

/// Distinct values of one column, in first-seen order.
pub fn distinct_column(batch: &RowBatch, column: &str) -> Result<RowBatch> {
    let col = batch
        .column(column)
        .ok_or_else(|| ExecError::Sql(format!("no column '{column}'")))?;
    let mut seen = HashSet::new();
    let values = col
        .values
        .iter()
        .filter(|v| seen.insert(v.to_string()))
        .cloned()
        .collect();
    Ok(RowBatch::new(vec![Column::new(
        col.name.clone(),
        col.data_type,
        values,
    )])?)
}
