//! Constant folding of bound expressions.

use std::cmp::Ordering;

use sitewise_core::binding::BindingMap;

use super::{literal_from_binding, select_choice, Expr, ListExpr, Operator};
use crate::traits::{OpError, Result};

impl Expr {
    /// Bind and fold: operators over literals collapse to a literal, column
    /// references and unknown functions stay symbolic.
    ///
    /// Query operators use this to turn their parameter expressions into
    /// concrete scalars.
    pub fn evaluate(&self, binding: &BindingMap) -> Result<Expr> {
        match self {
            Expr::IntConst(_)
            | Expr::FloatConst(_)
            | Expr::BoolConst(_)
            | Expr::StringConst(_)
            | Expr::ColumnRef { .. } => Ok(self.clone()),
            Expr::Op { op, operands } => {
                let args = operands
                    .iter()
                    .map(|e| e.evaluate(binding))
                    .collect::<Result<Vec<_>>>()?;
                fold_op(*op, args)
            }
            Expr::Func { name, args } => {
                let args = args
                    .iter()
                    .map(|e| e.evaluate(binding))
                    .collect::<Result<Vec<_>>>()?;
                fold_func(name, args)
            }
            Expr::List(list) => Ok(Expr::List(ListExpr {
                begin: list.begin.clone(),
                end: list.end.clone(),
                delim: list.delim.clone(),
                elements: list
                    .elements
                    .iter()
                    .map(|e| e.evaluate(binding))
                    .collect::<Result<Vec<_>>>()?,
            })),
            Expr::Any { id, choices } => select_choice(id, choices, binding)?.evaluate(binding),
            Expr::Val { id, .. } => literal_from_binding(id, binding),
            Expr::Multi {
                id,
                begin,
                end,
                delim,
                child,
            } => {
                let subs = binding.get(id)?.sub_bindings()?;
                Ok(Expr::List(ListExpr {
                    begin: begin.clone(),
                    end: end.clone(),
                    delim: delim.clone(),
                    elements: subs
                        .iter()
                        .map(|sub| child.evaluate(sub))
                        .collect::<Result<Vec<_>>>()?,
                }))
            }
        }
    }
}

fn fold_op(op: Operator, args: Vec<Expr>) -> Result<Expr> {
    if args.len() != op.arity() {
        return Err(OpError::Type(format!(
            "operator '{}' expects {} operands, got {}",
            op.symbol(),
            op.arity(),
            args.len()
        )));
    }
    // Anything still symbolic (a column, an unknown function) stays an operator node.
    if !args.iter().all(is_constant) {
        return Ok(Expr::Op { op, operands: args });
    }

    let out = match op {
        Operator::Neg => match &args[0] {
            Expr::IntConst(v) => Expr::IntConst(v.checked_neg().ok_or_else(overflow)?),
            Expr::FloatConst(v) => Expr::FloatConst(-v),
            other => return Err(operand_error(op, other)),
        },
        Operator::Add => arith(op, &args[0], &args[1], i64::checked_add, |a, b| a + b)?,
        Operator::Sub => arith(op, &args[0], &args[1], i64::checked_sub, |a, b| a - b)?,
        Operator::Mul => arith(op, &args[0], &args[1], i64::checked_mul, |a, b| a * b)?,
        Operator::Div => arith(op, &args[0], &args[1], i64::checked_div, |a, b| a / b)?,
        Operator::Pow => arith(
            op,
            &args[0],
            &args[1],
            |a, b| u32::try_from(b).ok().and_then(|b| a.checked_pow(b)),
            f64::powf,
        )?,
        Operator::Eq => Expr::BoolConst(compare(op, &args[0], &args[1])? == Ordering::Equal),
        Operator::Ne => Expr::BoolConst(compare(op, &args[0], &args[1])? != Ordering::Equal),
        Operator::Ge => Expr::BoolConst(compare(op, &args[0], &args[1])? != Ordering::Less),
        Operator::Gt => Expr::BoolConst(compare(op, &args[0], &args[1])? == Ordering::Greater),
        Operator::Le => Expr::BoolConst(compare(op, &args[0], &args[1])? != Ordering::Greater),
        Operator::Lt => Expr::BoolConst(compare(op, &args[0], &args[1])? == Ordering::Less),
        Operator::In => {
            let Expr::List(list) = &args[1] else {
                return Err(operand_error(op, &args[1]));
            };
            let mut found = false;
            for elem in &list.elements {
                if compare(op, &args[0], elem)? == Ordering::Equal {
                    found = true;
                    break;
                }
            }
            Expr::BoolConst(found)
        }
        Operator::Between => {
            let v = number(op, &args[0])?;
            let lower = number(op, &args[1])?;
            let upper = number(op, &args[2])?;
            Expr::BoolConst(lower <= v && v <= upper)
        }
        Operator::Not => Expr::BoolConst(!boolean(op, &args[0])?),
        Operator::And => Expr::BoolConst(boolean(op, &args[0])? && boolean(op, &args[1])?),
        Operator::Or => Expr::BoolConst(boolean(op, &args[0])? || boolean(op, &args[1])?),
    };
    Ok(out)
}

fn is_constant(e: &Expr) -> bool {
    match e {
        Expr::List(list) => list.elements.iter().all(is_constant),
        other => other.is_literal(),
    }
}

fn fold_func(name: &str, args: Vec<Expr>) -> Result<Expr> {
    match (name, args.as_slice()) {
        ("int", [Expr::IntConst(v)]) => Ok(Expr::IntConst(*v)),
        ("int", [Expr::FloatConst(v)]) => Ok(Expr::IntConst(v.trunc() as i64)),
        ("abs", [Expr::IntConst(v)]) => Ok(Expr::IntConst(v.checked_abs().ok_or_else(overflow)?)),
        ("abs", [Expr::FloatConst(v)]) => Ok(Expr::FloatConst(v.abs())),
        _ => Ok(Expr::Func {
            name: name.to_string(),
            args,
        }),
    }
}

fn arith(
    op: Operator,
    a: &Expr,
    b: &Expr,
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> Result<Expr> {
    if let (Expr::IntConst(x), Expr::IntConst(y)) = (a, b) {
        if op == Operator::Div && *y == 0 {
            return Err(OpError::Type("integer division by zero".into()));
        }
        return int_op(*x, *y).map(Expr::IntConst).ok_or_else(overflow);
    }
    Ok(Expr::FloatConst(float_op(number(op, a)?, number(op, b)?)))
}

/// int/int and string/string compare natively, everything else as `f64`.
fn compare(op: Operator, a: &Expr, b: &Expr) -> Result<Ordering> {
    match (a, b) {
        (Expr::IntConst(x), Expr::IntConst(y)) => Ok(x.cmp(y)),
        (Expr::StringConst(x), Expr::StringConst(y)) => Ok(x.cmp(y)),
        (Expr::BoolConst(x), Expr::BoolConst(y)) => Ok(x.cmp(y)),
        _ => {
            let x = number(op, a)?;
            let y = number(op, b)?;
            x.partial_cmp(&y)
                .ok_or_else(|| OpError::Type(format!("cannot order {x} and {y}")))
        }
    }
}

fn number(op: Operator, e: &Expr) -> Result<f64> {
    match e {
        Expr::IntConst(v) => Ok(*v as f64),
        Expr::FloatConst(v) => Ok(*v),
        other => Err(operand_error(op, other)),
    }
}

fn boolean(op: Operator, e: &Expr) -> Result<bool> {
    match e {
        Expr::BoolConst(v) => Ok(*v),
        other => Err(operand_error(op, other)),
    }
}

fn operand_error(op: Operator, e: &Expr) -> OpError {
    OpError::Type(format!("invalid operand '{e}' for operator '{}'", op.symbol()))
}

fn overflow() -> OpError {
    OpError::Type("integer overflow".into())
}
