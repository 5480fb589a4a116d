//! Lowering of bound expressions into the compute engine's form.

use sitewise_core::schema::DataType;

use super::{Expr, Operator};
use crate::compute::{ComputeExpr, ComputeFn};
use crate::traits::{OpError, Result};

impl Expr {
    /// Convert a choice-free expression. Choice nodes, and lists outside an
    /// `in` operand, have no compute form.
    pub fn to_compute(&self) -> Result<ComputeExpr> {
        match self {
            Expr::IntConst(_) | Expr::FloatConst(_) | Expr::BoolConst(_) | Expr::StringConst(_) => {
                Ok(ComputeExpr::Literal(self.to_scalar()?))
            }
            Expr::ColumnRef { column, .. } => Ok(ComputeExpr::Field(column.clone())),
            Expr::Op { op, operands } => lower_op(*op, operands),
            Expr::Func { name, args } => {
                if name == "int" {
                    let [arg] = args.as_slice() else {
                        return Err(OpError::Unsupported("int() takes one argument".into()));
                    };
                    return Ok(ComputeExpr::Cast {
                        input: Box::new(arg.to_compute()?),
                        to: DataType::Int64,
                    });
                }
                let func = ComputeFn::by_name(name)
                    .ok_or_else(|| OpError::Unsupported(format!("function '{name}'")))?;
                Ok(ComputeExpr::call(func, lower_all(args)?))
            }
            Expr::List(_) => Err(OpError::Unsupported(format!(
                "list '{self}' has no scalar compute form"
            ))),
            Expr::Any { id, .. } | Expr::Val { id, .. } | Expr::Multi { id, .. } => {
                Err(OpError::Unsupported(format!(
                    "expression has unbound choice '{id}'"
                )))
            }
        }
    }
}

fn lower_all(exprs: &[Expr]) -> Result<Vec<ComputeExpr>> {
    exprs.iter().map(Expr::to_compute).collect()
}

fn lower_op(op: Operator, operands: &[Expr]) -> Result<ComputeExpr> {
    if operands.len() != op.arity() {
        return Err(OpError::Unsupported(format!(
            "operator '{}' with {} operands",
            op.symbol(),
            operands.len()
        )));
    }
    let func = match op {
        Operator::Neg => ComputeFn::Negate,
        Operator::Add => ComputeFn::Add,
        Operator::Sub => ComputeFn::Subtract,
        Operator::Mul => ComputeFn::Multiply,
        Operator::Div => ComputeFn::Divide,
        Operator::Pow => ComputeFn::Power,
        Operator::Eq => ComputeFn::Equal,
        Operator::Ne => ComputeFn::NotEqual,
        Operator::Ge => ComputeFn::GreaterEqual,
        Operator::Gt => ComputeFn::Greater,
        Operator::Le => ComputeFn::LessEqual,
        Operator::Lt => ComputeFn::Less,
        Operator::Not => ComputeFn::Invert,
        Operator::And => ComputeFn::And,
        Operator::Or => ComputeFn::Or,
        Operator::In => {
            let Expr::List(list) = &operands[1] else {
                return Err(OpError::Unsupported(format!(
                    "right side of 'in' must be a list, got '{}'",
                    operands[1]
                )));
            };
            let set = list
                .elements
                .iter()
                .map(Expr::to_scalar)
                .collect::<Result<Vec<_>>>()?;
            return Ok(ComputeExpr::IsIn {
                value: Box::new(operands[0].to_compute()?),
                set,
            });
        }
        Operator::Between => {
            let v = operands[0].to_compute()?;
            let ge = ComputeExpr::call(
                ComputeFn::GreaterEqual,
                vec![v.clone(), operands[1].to_compute()?],
            );
            let le = ComputeExpr::call(ComputeFn::LessEqual, vec![v, operands[2].to_compute()?]);
            return Ok(ComputeExpr::call(ComputeFn::And, vec![ge, le]));
        }
    };
    Ok(ComputeExpr::call(func, lower_all(operands)?))
}
