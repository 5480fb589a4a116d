//! Explain rendering and SQL rendering of plan subtrees.
//!
//! Explain form: one header per node, `|` between a node and its input,
//! e.g. `Filter[3]{x > 1}\n|\nTableSource[0]{t}`. `AnyPlan` lists its
//! alternatives separated by `----` and closed with `====`.

use std::fmt::{self, Write};

use sitewise_core::id::NodeIdx;
use sitewise_core::BindingMap;
use sitewise_operators::Expr;

use crate::choice::chosen_alternative;
use crate::error::{PlanError, Result};
use crate::plan::{NamedExpr, PlanGraph, PlanOp};

impl PlanGraph {
    /// Explain text of the subtree rooted at `idx`.
    pub fn explain(&self, idx: NodeIdx) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_explain(idx, &mut out);
        out
    }

    fn write_explain<W: Write>(&self, idx: NodeIdx, w: &mut W) -> fmt::Result {
        let node = self.node(idx);
        let id = node.id.get();
        let name = node.op.name();
        match &node.op {
            PlanOp::TableSource { name: table } => return write!(w, "{name}[{id}]{{{table}}}"),
            PlanOp::AnyPlan { choice_id, choices } => {
                writeln!(w, "{name}[{id}]{{{choice_id}}}")?;
                for child in choices {
                    writeln!(w, "----")?;
                    self.write_explain(*child, w)?;
                    writeln!(w)?;
                }
                return writeln!(w, "====");
            }
            PlanOp::Projection { projs, .. } => {
                let body = projs
                    .iter()
                    .map(|p| format!("{}={}", p.name, p.expr))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(w, "{name}[{id}]{{{body}}}")?;
            }
            PlanOp::Filter { cond, .. } => write!(w, "{name}[{id}]{{{cond}}}")?,
            PlanOp::Aggregate { groupbys, aggs, .. } => write!(
                w,
                "{name}[{id}]{{{} -> {}}}",
                join_exprs(groupbys.iter().map(|g| &g.expr)),
                join_exprs(aggs.iter().map(|a| &a.expr))
            )?,
            PlanOp::Network { .. }
            | PlanOp::Cloud { .. }
            | PlanOp::SCache { .. }
            | PlanOp::DCache { .. } => write!(w, "{name}[{id}]")?,
            PlanOp::HashTableBuild { keys, .. } | PlanOp::RTreeBuild { keys, .. } => {
                write!(w, "{name}[{id}]{{keys=")?;
                for k in keys {
                    write!(w, "{k},")?;
                }
                write!(w, "}}")?;
            }
            PlanOp::HashTableQuery { queries, .. } => {
                write!(w, "{name}[{id}]{{{}}}", parenthesized(queries))?
            }
            PlanOp::RTreeQuery { lowers, uppers, .. } => write!(
                w,
                "{name}[{id}]{{lowers={}; uppers={}}}",
                parenthesized(lowers),
                parenthesized(uppers)
            )?,
            PlanOp::PrefixSumBuild {
                sum, target, agg, ..
            } => write!(
                w,
                "{name}[{id}]{{sum={}; target={}; agg={}}}",
                sum.name, target.name, agg.name
            )?,
            PlanOp::PrefixSumQuery { lower, upper, .. } => {
                write!(w, "{name}[{id}]{{lower={lower}; upper={upper}}}")?
            }
            PlanOp::PrefixSum2DBuild {
                sum_x,
                sum_y,
                target,
                agg,
                ..
            } => write!(
                w,
                "{name}[{id}]{{sum_x={}; sum_y={}; target={}; agg={}}}",
                sum_x.name, sum_y.name, target.name, agg.name
            )?,
            PlanOp::PrefixSum2DQuery {
                lower_x,
                upper_x,
                lower_y,
                upper_y,
                ..
            } => write!(
                w,
                "{name}[{id}]{{lower_x={lower_x}; upper_x={upper_x}; lower_y={lower_y}; upper_y={upper_y}}}"
            )?,
        }
        for child in node.op.inputs() {
            write!(w, "\n|\n")?;
            self.write_explain(child, w)?;
        }
        Ok(())
    }

    /// SQL equivalent of the subtree at `idx` under `binding`.
    ///
    /// Index operators have no SQL form and fail with `Unsupported`.
    pub fn to_sql(&self, idx: NodeIdx, binding: &BindingMap) -> Result<String> {
        let node = self.node(idx);
        match &node.op {
            PlanOp::Projection { input, projs } => Ok(format!(
                "SELECT {} FROM ({})",
                select_list(projs, binding)?,
                self.to_sql(*input, binding)?
            )),
            PlanOp::Filter { input, cond } => Ok(format!(
                "SELECT * FROM ({}) WHERE {}",
                self.to_sql(*input, binding)?,
                cond.bind(binding)?.to_sql()
            )),
            PlanOp::Aggregate {
                input,
                groupbys,
                aggs,
            } => {
                let items: Vec<NamedExpr> = groupbys.iter().chain(aggs.iter()).cloned().collect();
                let mut sql = format!(
                    "SELECT {} FROM ({})",
                    select_list(&items, binding)?,
                    self.to_sql(*input, binding)?
                );
                if !groupbys.is_empty() {
                    let keys = groupbys
                        .iter()
                        .map(|g| Ok(g.expr.bind(binding)?.to_sql()))
                        .collect::<Result<Vec<_>>>()?;
                    sql.push_str(" GROUP BY ");
                    sql.push_str(&keys.join(", "));
                }
                Ok(sql)
            }
            PlanOp::TableSource { name } => Ok(format!("SELECT * FROM {name}")),
            PlanOp::Network { input }
            | PlanOp::Cloud { input }
            | PlanOp::SCache { input }
            | PlanOp::DCache { input } => self.to_sql(*input, binding),
            PlanOp::AnyPlan { choice_id, choices } => {
                let child = chosen_alternative(choice_id, choices, binding)?;
                self.to_sql(child, binding)
            }
            other => Err(PlanError::Unsupported(format!(
                "{} has no SQL form",
                other.name()
            ))),
        }
    }
}

impl fmt::Display for PlanGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_explain(self.root(), f)
    }
}

fn join_exprs<'a>(exprs: impl Iterator<Item = &'a Expr>) -> String {
    exprs.map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
}

fn parenthesized(exprs: &[Expr]) -> String {
    exprs.iter().map(|e| format!("({e})")).collect()
}

fn select_list(items: &[NamedExpr], binding: &BindingMap) -> Result<String> {
    let parts = items
        .iter()
        .map(|p| Ok(format!("{} AS {}", p.expr.bind(binding)?.to_sql(), p.name)))
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join(", "))
}
