//! 1-D prefix-sum index for range aggregation.
//!
//! Build groups the input by (sum value, target value) and sums the aggregate
//! column. Distinct sum values are sorted (`compare_key_scalars`), distinct
//! targets keep first-seen order, and the dense matrix `P[s * T + t]` holds
//! cumulative sums along the sum axis. A query for `[lower, upper]` returns one
//! row per target with `P[upper_idx] - P[lower_idx]`, where `lower_idx` is the
//! last value strictly below `lower` and `upper_idx` the last value not above
//! `upper` (either may be -1).

use std::cmp::Ordering;
use std::collections::HashMap;

use sitewise_core::codec::{read_table, write_table, ByteReader, ByteWriter};
use sitewise_core::hash::hash_scalars;
use sitewise_core::schema::DataType;
use sitewise_core::types::{compare_key_scalars, Column, RowBatch, Scalar};

use crate::compute::{AggFunc, AggregateSpec, ComputeExpr, Pipeline, Stage};
use crate::traits::{OpError, Result, WireFormat};

/// Expression plus the column name it is projected under.
pub type NamedExpr = (ComputeExpr, String);

/// Sorted distinct values of one summation axis.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SortedAxis {
    pub(crate) values: Column,
    slots: HashMap<u64, usize>,
}

impl SortedAxis {
    pub(crate) fn from_values(col: &Column) -> Self {
        let mut seen = HashMap::new();
        let mut distinct = Vec::new();
        for v in &col.values {
            if seen.insert(key_of(v), ()).is_none() {
                distinct.push(v.clone());
            }
        }
        distinct.sort_by(compare_key_scalars);
        Self::from_sorted(Column::new(col.name.clone(), col.data_type, distinct))
    }

    pub(crate) fn from_sorted(values: Column) -> Self {
        let slots = values
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| (key_of(v), i))
            .collect();
        Self { values, slots }
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn slot(&self, v: &Scalar) -> Result<usize> {
        lookup(&self.slots, v)
    }

    /// Last index whose value is strictly less than `bound`, or -1.
    pub(crate) fn lower_idx(&self, bound: &Scalar) -> i64 {
        self.values
            .values
            .partition_point(|v| compare_key_scalars(v, bound) == Ordering::Less) as i64
            - 1
    }

    /// Last index whose value is less than or equal to `bound`, or -1.
    pub(crate) fn upper_idx(&self, bound: &Scalar) -> i64 {
        self.values
            .values
            .partition_point(|v| compare_key_scalars(v, bound) != Ordering::Greater) as i64
            - 1
    }
}

/// Distinct target values in first-seen order.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TargetAxis {
    pub(crate) values: Column,
    slots: HashMap<u64, usize>,
}

impl TargetAxis {
    pub(crate) fn from_values(col: &Column) -> Self {
        let mut distinct = Vec::new();
        let mut slots = HashMap::new();
        for v in &col.values {
            slots.entry(key_of(v)).or_insert_with(|| {
                distinct.push(v.clone());
                distinct.len() - 1
            });
        }
        Self {
            values: Column::new(col.name.clone(), col.data_type, distinct),
            slots,
        }
    }

    pub(crate) fn from_distinct(values: Column) -> Self {
        let slots = values
            .values
            .iter()
            .enumerate()
            .map(|(i, v)| (key_of(v), i))
            .collect();
        Self { values, slots }
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn slot(&self, v: &Scalar) -> Result<usize> {
        lookup(&self.slots, v)
    }
}

fn key_of(v: &Scalar) -> u64 {
    hash_scalars(std::iter::once(v))
}

fn lookup(slots: &HashMap<u64, usize>, v: &Scalar) -> Result<usize> {
    slots
        .get(&key_of(v))
        .copied()
        .ok_or_else(|| OpError::Exec(format!("value '{v}' missing from axis")))
}

/// Project the named columns and sum `agg` grouped by every other column.
pub(crate) fn grouped_sums(table: RowBatch, keys: Vec<NamedExpr>, agg: NamedExpr) -> Result<RowBatch> {
    let key_names: Vec<String> = keys.iter().map(|(_, n)| n.clone()).collect();
    let agg_name = agg.1.clone();
    let mut projection = keys;
    projection.push(agg);
    Pipeline::new(table)
        .then(Stage::Project(projection))
        .then(Stage::Aggregate {
            keys: key_names,
            aggs: vec![AggregateSpec::new(AggFunc::Sum, agg_name.clone(), agg_name)],
        })
        .run()
}

pub(crate) fn cell_value(v: &Scalar) -> f64 {
    v.as_f64().unwrap_or(0.0)
}

pub(crate) fn write_column(w: &mut ByteWriter, col: &Column) {
    write_table(w, &RowBatch { columns: vec![col.clone()] });
}

pub(crate) fn read_column(r: &mut ByteReader<'_>) -> Result<Column> {
    let mut t = read_table(r)?;
    if t.columns.len() != 1 {
        return Err(OpError::Codec(format!(
            "expected a single-column table, got {} columns",
            t.columns.len()
        )));
    }
    Ok(t.columns.remove(0))
}

pub(crate) fn read_matrix(r: &mut ByteReader<'_>, cells: usize) -> Result<Vec<f64>> {
    if cells > r.remaining() / 8 {
        return Err(OpError::Codec(format!("prefix matrix claims {cells} cells")));
    }
    (0..cells).map(|_| Ok(r.get_f64()?)).collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrefixSumImpl {
    sum_axis: SortedAxis,
    targets: TargetAxis,
    agg_name: String,
    prefix: Vec<f64>,
}

impl PrefixSumImpl {
    pub fn build(table: RowBatch, sum: NamedExpr, target: NamedExpr, agg: NamedExpr) -> Result<Self> {
        let agg_name = agg.1.clone();
        let grouped = grouped_sums(table, vec![sum, target], agg)?;
        let (sum_col, target_col, agg_col) = (
            grouped.column_at(0)?,
            grouped.column_at(1)?,
            grouped.column_at(2)?,
        );

        let sum_axis = SortedAxis::from_values(sum_col);
        let targets = TargetAxis::from_values(target_col);
        let t_len = targets.len();
        let mut prefix = vec![0.0; sum_axis.len() * t_len];
        for row in 0..grouped.num_rows() {
            let s = sum_axis.slot(&sum_col.values[row])?;
            let t = targets.slot(&target_col.values[row])?;
            prefix[s * t_len + t] += cell_value(&agg_col.values[row]);
        }
        for s in 1..sum_axis.len() {
            for t in 0..t_len {
                prefix[s * t_len + t] += prefix[(s - 1) * t_len + t];
            }
        }
        Ok(Self {
            sum_axis,
            targets,
            agg_name,
            prefix,
        })
    }

    pub fn num_targets(&self) -> usize {
        self.targets.len()
    }

    /// One row per target: (target, aggregate over sum values in `[lower, upper]`).
    pub fn query(&self, lower: &Scalar, upper: &Scalar) -> Result<RowBatch> {
        let lo = self.sum_axis.lower_idx(lower);
        let hi = self.sum_axis.upper_idx(upper);
        let t_len = self.targets.len();
        let at = |s: i64, t: usize| -> f64 {
            if s < 0 {
                0.0
            } else {
                self.prefix[s as usize * t_len + t]
            }
        };
        let values = (0..t_len)
            .map(|t| {
                let v = if hi < 0 { 0.0 } else { at(hi, t) - at(lo, t) };
                Scalar::F64(v)
            })
            .collect();
        Ok(RowBatch::new(vec![
            self.targets.values.clone(),
            Column::new(self.agg_name.clone(), DataType::Float64, values),
        ])?)
    }
}

impl WireFormat for PrefixSumImpl {
    fn write_to(&self, w: &mut ByteWriter) {
        w.put_u64(self.sum_axis.len() as u64);
        w.put_u64(self.targets.len() as u64);
        for v in &self.prefix {
            w.put_f64(*v);
        }
        w.put_str(&self.agg_name);
        write_column(w, &self.sum_axis.values);
        write_column(w, &self.targets.values);
    }

    fn read_from(r: &mut ByteReader<'_>) -> Result<Self> {
        let s_len = r.get_len()?;
        let t_len = r.get_len()?;
        let cells = s_len
            .checked_mul(t_len)
            .ok_or_else(|| OpError::Codec("prefix matrix size overflows".into()))?;
        let prefix = read_matrix(r, cells)?;
        let agg_name = r.get_string()?;
        let sum_axis = SortedAxis::from_sorted(read_column(r)?);
        let targets = TargetAxis::from_distinct(read_column(r)?);
        if sum_axis.len() != s_len || targets.len() != t_len {
            return Err(OpError::Codec("prefix axes disagree with matrix shape".into()));
        }
        Ok(Self {
            sum_axis,
            targets,
            agg_name,
            prefix,
        })
    }

    fn size_bytes(&self) -> usize {
        let axes = RowBatch {
            columns: vec![self.sum_axis.values.clone(), self.targets.values.clone()],
        };
        axes.size_bytes() + self.prefix.len() * std::mem::size_of::<f64>()
    }
}
