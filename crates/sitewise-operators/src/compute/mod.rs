//! A small columnar compute engine over `RowBatch`.
//!
//! Expressions are evaluated column-at-a-time: each sub-expression produces a
//! full column of scalars, and calls combine argument columns row by row.
//! Nulls propagate through every function.

mod aggregate;
mod pipeline;

pub use aggregate::{AggFunc, AggregateSpec};
pub use pipeline::{Pipeline, Stage};

use sitewise_core::schema::{DataType, Schema};
use sitewise_core::types::{Column, RowBatch, Scalar};

use crate::traits::{OpError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeFn {
    Negate,
    Add,
    Subtract,
    Multiply,
    Divide,
    Power,
    Equal,
    NotEqual,
    GreaterEqual,
    Greater,
    LessEqual,
    Less,
    And,
    Or,
    Invert,
    Abs,
    Sqrt,
    Floor,
    Ceil,
    Round,
    Lower,
    Upper,
}

impl ComputeFn {
    /// Named scalar functions reachable from a `Func` expression.
    pub fn by_name(name: &str) -> Option<ComputeFn> {
        let f = match name {
            "abs" => ComputeFn::Abs,
            "sqrt" => ComputeFn::Sqrt,
            "floor" => ComputeFn::Floor,
            "ceil" => ComputeFn::Ceil,
            "round" => ComputeFn::Round,
            "lower" => ComputeFn::Lower,
            "upper" => ComputeFn::Upper,
            "negate" => ComputeFn::Negate,
            "invert" => ComputeFn::Invert,
            _ => return None,
        };
        Some(f)
    }

    fn arity(self) -> usize {
        match self {
            ComputeFn::Negate
            | ComputeFn::Invert
            | ComputeFn::Abs
            | ComputeFn::Sqrt
            | ComputeFn::Floor
            | ComputeFn::Ceil
            | ComputeFn::Round
            | ComputeFn::Lower
            | ComputeFn::Upper => 1,
            _ => 2,
        }
    }
}

/// Choice-free scalar expression the engine can evaluate.
#[derive(Debug, Clone, PartialEq)]
pub enum ComputeExpr {
    Literal(Scalar),
    Field(String),
    Call {
        func: ComputeFn,
        args: Vec<ComputeExpr>,
    },
    IsIn {
        value: Box<ComputeExpr>,
        set: Vec<Scalar>,
    },
    Cast {
        input: Box<ComputeExpr>,
        to: DataType,
    },
}

impl ComputeExpr {
    pub fn field(name: impl Into<String>) -> Self {
        ComputeExpr::Field(name.into())
    }

    pub fn call(func: ComputeFn, args: Vec<ComputeExpr>) -> Self {
        ComputeExpr::Call { func, args }
    }

    /// Static output type against an input schema.
    pub fn data_type(&self, schema: &Schema) -> Result<DataType> {
        match self {
            ComputeExpr::Literal(v) => Ok(v.data_type()),
            ComputeExpr::Field(name) => schema
                .index_of(name)
                .and_then(|i| schema.field(i))
                .map(|f| f.data_type)
                .ok_or_else(|| OpError::Schema(format!("no column named '{name}'"))),
            ComputeExpr::Call { func, args } => {
                let types = args
                    .iter()
                    .map(|a| a.data_type(schema))
                    .collect::<Result<Vec<_>>>()?;
                Ok(match func {
                    ComputeFn::Add
                    | ComputeFn::Subtract
                    | ComputeFn::Multiply
                    | ComputeFn::Divide
                    | ComputeFn::Power => {
                        if types.iter().all(|t| *t == DataType::Int64) {
                            DataType::Int64
                        } else {
                            DataType::Float64
                        }
                    }
                    ComputeFn::Negate | ComputeFn::Abs => {
                        types.first().copied().unwrap_or(DataType::Float64)
                    }
                    ComputeFn::Sqrt | ComputeFn::Floor | ComputeFn::Ceil | ComputeFn::Round => {
                        DataType::Float64
                    }
                    ComputeFn::Lower | ComputeFn::Upper => DataType::Utf8,
                    _ => DataType::Boolean,
                })
            }
            ComputeExpr::IsIn { .. } => Ok(DataType::Boolean),
            ComputeExpr::Cast { to, .. } => Ok(*to),
        }
    }

    /// Evaluate over every row of `batch`.
    pub fn eval(&self, batch: &RowBatch) -> Result<Vec<Scalar>> {
        let rows = batch.num_rows();
        match self {
            ComputeExpr::Literal(v) => Ok(vec![v.clone(); rows]),
            ComputeExpr::Field(name) => batch
                .column(name)
                .map(|c| c.values.clone())
                .ok_or_else(|| OpError::Schema(format!("no column named '{name}'"))),
            ComputeExpr::Call { func, args } => {
                if args.len() != func.arity() {
                    return Err(OpError::Exec(format!(
                        "{func:?} expects {} arguments, got {}",
                        func.arity(),
                        args.len()
                    )));
                }
                let cols = args
                    .iter()
                    .map(|a| a.eval(batch))
                    .collect::<Result<Vec<_>>>()?;
                (0..rows)
                    .map(|r| {
                        let row: Vec<&Scalar> = cols.iter().map(|c| &c[r]).collect();
                        apply(*func, &row)
                    })
                    .collect()
            }
            ComputeExpr::IsIn { value, set } => value
                .eval(batch)?
                .into_iter()
                .map(|v| {
                    if v.is_null() {
                        return Ok(Scalar::Null);
                    }
                    let mut hit = false;
                    for s in set {
                        if scalar_cmp(&v, s)? == std::cmp::Ordering::Equal {
                            hit = true;
                            break;
                        }
                    }
                    Ok(Scalar::Bool(hit))
                })
                .collect(),
            ComputeExpr::Cast { input, to } => input
                .eval(batch)?
                .iter()
                .map(|v| Ok(v.cast(*to)?))
                .collect(),
        }
    }

    /// Evaluate into a named, typed column.
    pub fn eval_column(&self, batch: &RowBatch, name: &str) -> Result<Column> {
        let data_type = self.data_type(&batch.schema())?;
        let values = self.eval(batch)?;
        Ok(Column::new(name, data_type, coerce(values, data_type)?))
    }
}

// Int literals mixed into float columns are widened so the column stays uniform.
fn coerce(values: Vec<Scalar>, to: DataType) -> Result<Vec<Scalar>> {
    if to != DataType::Float64 {
        return Ok(values);
    }
    values
        .into_iter()
        .map(|v| match v {
            Scalar::I64(i) => Ok(Scalar::F64(i as f64)),
            other => Ok(other),
        })
        .collect()
}

fn apply(func: ComputeFn, args: &[&Scalar]) -> Result<Scalar> {
    if args.iter().any(|a| a.is_null()) {
        return Ok(Scalar::Null);
    }
    use std::cmp::Ordering::*;
    let out = match func {
        ComputeFn::Negate => match args[0] {
            Scalar::I64(v) => Scalar::I64(v.checked_neg().ok_or_else(overflow)?),
            Scalar::F64(v) => Scalar::F64(-v),
            other => return Err(bad_arg(func, other)),
        },
        ComputeFn::Add => numeric(func, args[0], args[1], i64::checked_add, |a, b| a + b)?,
        ComputeFn::Subtract => numeric(func, args[0], args[1], i64::checked_sub, |a, b| a - b)?,
        ComputeFn::Multiply => numeric(func, args[0], args[1], i64::checked_mul, |a, b| a * b)?,
        ComputeFn::Divide => {
            if matches!(args[1], Scalar::I64(0)) && matches!(args[0], Scalar::I64(_)) {
                return Err(OpError::Exec("integer division by zero".into()));
            }
            numeric(func, args[0], args[1], i64::checked_div, |a, b| a / b)?
        }
        ComputeFn::Power => numeric(
            func,
            args[0],
            args[1],
            |a, b| u32::try_from(b).ok().and_then(|b| a.checked_pow(b)),
            f64::powf,
        )?,
        ComputeFn::Equal => Scalar::Bool(scalar_cmp(args[0], args[1])? == Equal),
        ComputeFn::NotEqual => Scalar::Bool(scalar_cmp(args[0], args[1])? != Equal),
        ComputeFn::GreaterEqual => Scalar::Bool(scalar_cmp(args[0], args[1])? != Less),
        ComputeFn::Greater => Scalar::Bool(scalar_cmp(args[0], args[1])? == Greater),
        ComputeFn::LessEqual => Scalar::Bool(scalar_cmp(args[0], args[1])? != Greater),
        ComputeFn::Less => Scalar::Bool(scalar_cmp(args[0], args[1])? == Less),
        ComputeFn::And => Scalar::Bool(truth(func, args[0])? && truth(func, args[1])?),
        ComputeFn::Or => Scalar::Bool(truth(func, args[0])? || truth(func, args[1])?),
        ComputeFn::Invert => Scalar::Bool(!truth(func, args[0])?),
        ComputeFn::Abs => match args[0] {
            Scalar::I64(v) => Scalar::I64(v.checked_abs().ok_or_else(overflow)?),
            Scalar::F64(v) => Scalar::F64(v.abs()),
            other => return Err(bad_arg(func, other)),
        },
        ComputeFn::Sqrt => Scalar::F64(float(func, args[0])?.sqrt()),
        ComputeFn::Floor => Scalar::F64(float(func, args[0])?.floor()),
        ComputeFn::Ceil => Scalar::F64(float(func, args[0])?.ceil()),
        ComputeFn::Round => Scalar::F64(float(func, args[0])?.round()),
        ComputeFn::Lower => Scalar::Str(text(func, args[0])?.to_lowercase()),
        ComputeFn::Upper => Scalar::Str(text(func, args[0])?.to_uppercase()),
    };
    Ok(out)
}

fn numeric(
    func: ComputeFn,
    a: &Scalar,
    b: &Scalar,
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Scalar> {
    match (a, b) {
        (Scalar::I64(x), Scalar::I64(y)) => int_op(*x, *y).map(Scalar::I64).ok_or_else(overflow),
        _ => Ok(Scalar::F64(float_op(float(func, a)?, float(func, b)?))),
    }
}

/// Row-level comparison: int/int, str/str and bool/bool natively, numbers as `f64`.
pub(crate) fn scalar_cmp(a: &Scalar, b: &Scalar) -> Result<std::cmp::Ordering> {
    match (a, b) {
        (Scalar::I64(x), Scalar::I64(y)) => Ok(x.cmp(y)),
        (Scalar::Str(x), Scalar::Str(y)) => Ok(x.cmp(y)),
        (Scalar::Bool(x), Scalar::Bool(y)) => Ok(x.cmp(y)),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => x
                .partial_cmp(&y)
                .ok_or_else(|| OpError::Exec(format!("cannot order {x} and {y}"))),
            _ => Err(OpError::Type(format!("cannot compare '{a}' with '{b}'"))),
        },
    }
}

fn float(func: ComputeFn, v: &Scalar) -> Result<f64> {
    v.as_f64().ok_or_else(|| bad_arg(func, v))
}

fn truth(func: ComputeFn, v: &Scalar) -> Result<bool> {
    v.as_bool().ok_or_else(|| bad_arg(func, v))
}

fn text(func: ComputeFn, v: &Scalar) -> Result<&str> {
    v.as_str().ok_or_else(|| bad_arg(func, v))
}

fn bad_arg(func: ComputeFn, v: &Scalar) -> OpError {
    OpError::Type(format!("{func:?} cannot take '{v}'"))
}

fn overflow() -> OpError {
    OpError::Exec("integer overflow".into())
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample() -> RowBatch {
        RowBatch::new(vec![
            Column::new(
                "k",
                DataType::Utf8,
                vec![
                    Scalar::Str("a".into()),
                    Scalar::Str("b".into()),
                    Scalar::Str("a".into()),
                ],
            ),
            Column::new(
                "v",
                DataType::Int64,
                vec![Scalar::I64(1), Scalar::I64(2), Scalar::Null],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn arithmetic_widens_and_propagates_null() {
        let e = ComputeExpr::call(
            ComputeFn::Multiply,
            vec![ComputeExpr::field("v"), ComputeExpr::Literal(Scalar::F64(0.5))],
        );
        let col = e.eval_column(&sample(), "half").unwrap();
        assert_eq!(col.data_type, DataType::Float64);
        assert_eq!(
            col.values,
            vec![Scalar::F64(0.5), Scalar::F64(1.0), Scalar::Null]
        );
    }

    #[test]
    fn is_in_and_cast() {
        let e = ComputeExpr::IsIn {
            value: Box::new(ComputeExpr::field("k")),
            set: vec![Scalar::Str("b".into())],
        };
        assert_eq!(
            e.eval(&sample()).unwrap(),
            vec![Scalar::Bool(false), Scalar::Bool(true), Scalar::Bool(false)]
        );
        let c = ComputeExpr::Cast {
            input: Box::new(ComputeExpr::Literal(Scalar::F64(2.9))),
            to: DataType::Int64,
        };
        assert_eq!(c.eval(&sample()).unwrap()[0], Scalar::I64(2));
    }

    #[test]
    fn missing_field_is_schema_error() {
        let e = ComputeExpr::field("nope");
        assert!(matches!(e.eval(&sample()), Err(OpError::Schema(_))));
    }

    #[test]
    fn comparing_string_with_number_fails() {
        let e = ComputeExpr::call(
            ComputeFn::Less,
            vec![ComputeExpr::field("k"), ComputeExpr::Literal(Scalar::I64(1))],
        );
        assert!(matches!(e.eval(&sample()), Err(OpError::Type(_))));
    }
}
