//! 2-D prefix-sum index.
//!
//! Same construction as the 1-D index over two sorted axes; the matrix is
//! laid out as `P[(x * Y + y) * T + t]` and prefixed along both axes, so a
//! rectangle is answered by inclusion-exclusion of its four corners.

use sitewise_core::codec::{ByteReader, ByteWriter};
use sitewise_core::schema::DataType;
use sitewise_core::types::{Column, RowBatch, Scalar};

use crate::prefix_sum::{
    cell_value, grouped_sums, read_column, read_matrix, write_column, NamedExpr, SortedAxis,
    TargetAxis,
};
use crate::traits::{OpError, Result, WireFormat};

#[derive(Debug, Clone, PartialEq)]
pub struct PrefixSum2DImpl {
    x_axis: SortedAxis,
    y_axis: SortedAxis,
    targets: TargetAxis,
    agg_name: String,
    prefix: Vec<f64>,
}

impl PrefixSum2DImpl {
    pub fn build(
        table: RowBatch,
        sum_x: NamedExpr,
        sum_y: NamedExpr,
        target: NamedExpr,
        agg: NamedExpr,
    ) -> Result<Self> {
        let agg_name = agg.1.clone();
        let grouped = grouped_sums(table, vec![sum_x, sum_y, target], agg)?;
        let (x_col, y_col, t_col, a_col) = (
            grouped.column_at(0)?,
            grouped.column_at(1)?,
            grouped.column_at(2)?,
            grouped.column_at(3)?,
        );
        let x_axis = SortedAxis::from_values(x_col);
        let y_axis = SortedAxis::from_values(y_col);
        let targets = TargetAxis::from_values(t_col);
        let (xn, yn, tn) = (x_axis.len(), y_axis.len(), targets.len());

        let mut prefix = vec![0.0; xn * yn * tn];
        for row in 0..grouped.num_rows() {
            let x = x_axis.slot(&x_col.values[row])?;
            let y = y_axis.slot(&y_col.values[row])?;
            let t = targets.slot(&t_col.values[row])?;
            prefix[(x * yn + y) * tn + t] += cell_value(&a_col.values[row]);
        }
        // Prefix along y, then along x.
        for x in 0..xn {
            for y in 1..yn {
                for t in 0..tn {
                    prefix[(x * yn + y) * tn + t] += prefix[(x * yn + y - 1) * tn + t];
                }
            }
        }
        for x in 1..xn {
            for y in 0..yn {
                for t in 0..tn {
                    prefix[(x * yn + y) * tn + t] += prefix[((x - 1) * yn + y) * tn + t];
                }
            }
        }
        Ok(Self {
            x_axis,
            y_axis,
            targets,
            agg_name,
            prefix,
        })
    }

    pub fn num_targets(&self) -> usize {
        self.targets.len()
    }

    pub fn query(
        &self,
        lower_x: &Scalar,
        upper_x: &Scalar,
        lower_y: &Scalar,
        upper_y: &Scalar,
    ) -> Result<RowBatch> {
        let lx = self.x_axis.lower_idx(lower_x);
        let ux = self.x_axis.upper_idx(upper_x);
        let ly = self.y_axis.lower_idx(lower_y);
        let uy = self.y_axis.upper_idx(upper_y);
        let (yn, tn) = (self.y_axis.len(), self.targets.len());
        let at = |x: i64, y: i64, t: usize| -> f64 {
            if x < 0 || y < 0 {
                0.0
            } else {
                self.prefix[(x as usize * yn + y as usize) * tn + t]
            }
        };
        let values = (0..tn)
            .map(|t| {
                let v = if ux < 0 || uy < 0 {
                    0.0
                } else {
                    at(ux, uy, t) - at(ux, ly, t) - at(lx, uy, t) + at(lx, ly, t)
                };
                Scalar::F64(v)
            })
            .collect();
        Ok(RowBatch::new(vec![
            self.targets.values.clone(),
            Column::new(self.agg_name.clone(), DataType::Float64, values),
        ])?)
    }
}

impl WireFormat for PrefixSum2DImpl {
    fn write_to(&self, w: &mut ByteWriter) {
        w.put_u64(self.x_axis.len() as u64);
        w.put_u64(self.y_axis.len() as u64);
        w.put_u64(self.targets.len() as u64);
        for v in &self.prefix {
            w.put_f64(*v);
        }
        w.put_str(&self.agg_name);
        write_column(w, &self.x_axis.values);
        write_column(w, &self.y_axis.values);
        write_column(w, &self.targets.values);
    }

    fn read_from(r: &mut ByteReader<'_>) -> Result<Self> {
        let xn = r.get_len()?;
        let yn = r.get_len()?;
        let tn = r.get_len()?;
        let cells = xn
            .checked_mul(yn)
            .and_then(|c| c.checked_mul(tn))
            .ok_or_else(|| OpError::Codec("prefix matrix size overflows".into()))?;
        let prefix = read_matrix(r, cells)?;
        let agg_name = r.get_string()?;
        let x_axis = SortedAxis::from_sorted(read_column(r)?);
        let y_axis = SortedAxis::from_sorted(read_column(r)?);
        let targets = TargetAxis::from_distinct(read_column(r)?);
        if x_axis.len() != xn || y_axis.len() != yn || targets.len() != tn {
            return Err(OpError::Codec("prefix axes disagree with matrix shape".into()));
        }
        Ok(Self {
            x_axis,
            y_axis,
            targets,
            agg_name,
            prefix,
        })
    }

    fn size_bytes(&self) -> usize {
        let axes = RowBatch {
            columns: vec![
                self.x_axis.values.clone(),
                self.y_axis.values.clone(),
                self.targets.values.clone(),
            ],
        };
        axes.size_bytes() + self.prefix.len() * std::mem::size_of::<f64>()
    }
}
