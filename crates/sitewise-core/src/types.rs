//! Lightweight scalar/column/batch types standing in for a columnar engine.
//!
//! Tables are column-major `RowBatch`es of typed `Column`s. Every column
//! carries its declared `DataType`, so a zero-row batch still knows its schema.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{DataType, Field, Schema};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    Str(String),
}

impl Scalar {
    pub fn data_type(&self) -> DataType {
        match self {
            Scalar::Null => DataType::Utf8, // untyped nulls read back as strings
            Scalar::Bool(_) => DataType::Boolean,
            Scalar::I64(_) => DataType::Int64,
            Scalar::F64(_) => DataType::Float64,
            Scalar::Str(_) => DataType::Utf8,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    /// Numeric view of the scalar; `None` for strings, bools and nulls.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::I64(v) => Some(*v as f64),
            Scalar::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Scalar::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Unsafe-style cast: floats truncate towards zero, strings are parsed.
    pub fn cast(&self, to: DataType) -> Result<Scalar> {
        let out = match (self, to) {
            (Scalar::Null, _) => Scalar::Null,
            (Scalar::I64(v), DataType::Int64) => Scalar::I64(*v),
            (Scalar::I64(v), DataType::Float64) => Scalar::F64(*v as f64),
            (Scalar::I64(v), DataType::Boolean) => Scalar::Bool(*v != 0),
            (Scalar::F64(v), DataType::Int64) => Scalar::I64(v.trunc() as i64),
            (Scalar::F64(v), DataType::Float64) => Scalar::F64(*v),
            (Scalar::F64(v), DataType::Boolean) => Scalar::Bool(*v != 0.0),
            (Scalar::Bool(b), DataType::Boolean) => Scalar::Bool(*b),
            (Scalar::Bool(b), DataType::Int64) => Scalar::I64(*b as i64),
            (Scalar::Bool(b), DataType::Float64) => Scalar::F64(if *b { 1.0 } else { 0.0 }),
            (Scalar::Str(s), DataType::Utf8) => Scalar::Str(s.clone()),
            (Scalar::Str(s), DataType::Int64) => Scalar::I64(
                s.trim()
                    .parse::<i64>()
                    .map_err(|_| Error::Type(format!("cannot cast '{s}' to Int64")))?,
            ),
            (Scalar::Str(s), DataType::Float64) => Scalar::F64(
                s.trim()
                    .parse::<f64>()
                    .map_err(|_| Error::Type(format!("cannot cast '{s}' to Float64")))?,
            ),
            (Scalar::Str(s), DataType::Boolean) => Scalar::Bool(
                s.trim()
                    .parse::<bool>()
                    .map_err(|_| Error::Type(format!("cannot cast '{s}' to Boolean")))?,
            ),
            (other, DataType::Utf8) => Scalar::Str(other.to_string()),
        };
        Ok(out)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "null"),
            Scalar::Bool(b) => write!(f, "{b}"),
            Scalar::I64(v) => write!(f, "{v}"),
            Scalar::F64(v) => write!(f, "{v}"),
            Scalar::Str(s) => write!(f, "{s}"),
        }
    }
}

/// Ordering used by sorted key arrays: strings compare lexicographically,
/// everything else compares as `f64`. Nulls sort first.
pub fn compare_key_scalars(a: &Scalar, b: &Scalar) -> Ordering {
    match (a, b) {
        (Scalar::Null, Scalar::Null) => Ordering::Equal,
        (Scalar::Null, _) => Ordering::Less,
        (_, Scalar::Null) => Ordering::Greater,
        (Scalar::Str(x), Scalar::Str(y)) => x.cmp(y),
        _ => {
            let x = numeric_key(a);
            let y = numeric_key(b);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
    }
}

fn numeric_key(s: &Scalar) -> f64 {
    match s {
        Scalar::Bool(b) => {
            if *b {
                1.0
            } else {
                0.0
            }
        }
        Scalar::Str(s) => s.parse::<f64>().unwrap_or(f64::NAN),
        other => other.as_f64().unwrap_or(f64::NAN),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub values: Vec<Scalar>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType, values: Vec<Scalar>) -> Self {
        Self {
            name: name.into(),
            data_type,
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn field(&self) -> Field {
        Field::new(self.name.clone(), self.data_type)
    }
}

/// Column-major table batch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RowBatch {
    pub columns: Vec<Column>,
}

impl RowBatch {
    pub fn new(columns: Vec<Column>) -> Result<Self> {
        if let Some(first) = columns.first() {
            let rows = first.len();
            if let Some(bad) = columns.iter().find(|c| c.len() != rows) {
                return Err(Error::Schema(format!(
                    "column '{}' has {} rows, expected {}",
                    bad.name,
                    bad.len(),
                    rows
                )));
            }
        }
        Ok(Self { columns })
    }

    /// Zero-row batch with the given schema.
    pub fn empty(schema: &Schema) -> Self {
        Self {
            columns: schema
                .fields
                .iter()
                .map(|f| Column::new(f.name.clone(), f.data_type, Vec::new()))
                .collect(),
        }
    }

    pub fn num_rows(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn schema(&self) -> Schema {
        Schema::new(self.columns.iter().map(Column::field).collect())
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_at(&self, idx: usize) -> Result<&Column> {
        self.columns
            .get(idx)
            .ok_or_else(|| Error::Schema(format!("column index {idx} out of range")))
    }

    /// Scalar at (row, column index).
    pub fn value(&self, row: usize, col: usize) -> Result<&Scalar> {
        self.column_at(col)?
            .values
            .get(row)
            .ok_or_else(|| Error::Schema(format!("row {row} out of range")))
    }

    /// Gather the given rows (in the given order) into a new batch.
    pub fn select_rows(&self, rows: &[usize]) -> Result<RowBatch> {
        let n = self.num_rows();
        if let Some(bad) = rows.iter().find(|r| **r >= n) {
            return Err(Error::Schema(format!(
                "row index {bad} out of range for {n} rows"
            )));
        }
        let columns = self
            .columns
            .iter()
            .map(|c| Column {
                name: c.name.clone(),
                data_type: c.data_type,
                values: rows.iter().map(|r| c.values[*r].clone()).collect(),
            })
            .collect();
        Ok(RowBatch { columns })
    }

    /// Rough in-memory footprint in bytes.
    pub fn size_bytes(&self) -> usize {
        self.columns
            .iter()
            .map(|c| {
                c.name.len()
                    + c.values
                        .iter()
                        .map(|v| match v {
                            Scalar::Str(s) => std::mem::size_of::<Scalar>() + s.len(),
                            _ => std::mem::size_of::<Scalar>(),
                        })
                        .sum::<usize>()
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch() -> RowBatch {
        RowBatch::new(vec![
            Column::new(
                "x",
                DataType::Int64,
                vec![Scalar::I64(1), Scalar::I64(2), Scalar::I64(3)],
            ),
            Column::new(
                "y",
                DataType::Utf8,
                vec![
                    Scalar::Str("a".into()),
                    Scalar::Str("b".into()),
                    Scalar::Str("c".into()),
                ],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn select_rows_keeps_order_and_schema() {
        let b = batch();
        let picked = b.select_rows(&[2, 0]).unwrap();
        assert_eq!(picked.num_rows(), 2);
        assert_eq!(picked.columns[0].values, vec![Scalar::I64(3), Scalar::I64(1)]);
        assert_eq!(picked.schema(), b.schema());
        assert!(b.select_rows(&[7]).is_err());
    }

    #[test]
    fn empty_batch_has_schema() {
        let b = batch();
        let e = RowBatch::empty(&b.schema());
        assert_eq!(e.num_rows(), 0);
        assert_eq!(e.schema(), b.schema());
    }

    #[test]
    fn ragged_columns_rejected() {
        let bad = RowBatch::new(vec![
            Column::new("a", DataType::Int64, vec![Scalar::I64(1)]),
            Column::new("b", DataType::Int64, vec![]),
        ]);
        assert!(bad.is_err());
    }

    #[test]
    fn key_ordering() {
        assert_eq!(
            compare_key_scalars(&Scalar::I64(2), &Scalar::F64(1.5)),
            Ordering::Greater
        );
        assert_eq!(
            compare_key_scalars(&Scalar::Str("b".into()), &Scalar::Str("a".into())),
            Ordering::Greater
        );
    }

    #[test]
    fn casts() {
        assert_eq!(Scalar::F64(2.9).cast(DataType::Int64).unwrap(), Scalar::I64(2));
        assert_eq!(Scalar::I64(3).cast(DataType::Float64).unwrap(), Scalar::F64(3.0));
        assert!(Scalar::Str("abc".into()).cast(DataType::Int64).is_err());
    }
}
