//! JSON/YAML plan descriptions -> `PlanGraph`.
//!
//! Example:
//! ```json
//! { "id": 2, "type": "Filter",
//!   "cond": { "type": "Op", "op": ">", "operands": [
//!       { "type": "ColumnRef", "column": "x", "table": "t" },
//!       { "type": "ValExpr", "id": "lo",
//!         "domain": { "type": "Func", "fname": "domain", "args": [
//!             { "type": "ColumnRef", "column": "x", "table": "t" } ] } } ] },
//!   "input": { "id": 1, "type": "TableSource", "name": "t" } }
//! ```
//!
//! A node whose id was already seen in the same document is reused as-is;
//! later occurrences may be abbreviated to `{ "id": n }`.

use serde::Deserialize;
use serde_json::Value;

use sitewise_core::id::{NodeIdx, PlanId};
use sitewise_operators::expr::ListExpr;
use sitewise_operators::{Expr, Operator};

use crate::error::{PlanError, Result};
use crate::plan::{NamedExpr, PlanBuilder, PlanGraph, PlanOp};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum ExprDoc {
    IntConst {
        value: i64,
    },
    FloatConst {
        value: f64,
    },
    BoolConst {
        value: bool,
    },
    StringConst {
        value: String,
    },
    ColumnRef {
        column: String,
        #[serde(default)]
        table: String,
    },
    Op {
        op: String,
        operands: Vec<ExprDoc>,
    },
    Func {
        fname: String,
        #[serde(default)]
        args: Vec<ExprDoc>,
    },
    List {
        #[serde(default = "default_begin")]
        begin: String,
        #[serde(default = "default_end")]
        end: String,
        #[serde(default = "default_delim")]
        delim: String,
        elements: Vec<ExprDoc>,
    },
    AnyExpr {
        id: String,
        choices: Vec<ExprDoc>,
    },
    ValExpr {
        id: String,
        domain: Box<ExprDoc>,
    },
    MultiExpr {
        id: String,
        #[serde(default = "default_begin")]
        begin: String,
        #[serde(default = "default_end")]
        end: String,
        #[serde(default = "default_delim")]
        delim: String,
        child: Box<ExprDoc>,
    },
}

fn default_begin() -> String {
    "[".into()
}

fn default_end() -> String {
    "]".into()
}

fn default_delim() -> String {
    ",".into()
}

#[derive(Debug, Clone, Deserialize)]
struct NamedDoc {
    name: String,
    expr: ExprDoc,
}

/// Node-local fields. Inputs stay raw so shared ids can be resolved before
/// their bodies are parsed.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
enum PlanDoc {
    Projection {
        input: Value,
        projs: Vec<NamedDoc>,
    },
    Filter {
        input: Value,
        cond: ExprDoc,
    },
    Aggregate {
        input: Value,
        #[serde(default)]
        groupbys: Vec<NamedDoc>,
        aggs: Vec<NamedDoc>,
    },
    TableSource {
        name: String,
    },
    Network {
        input: Value,
    },
    Cloud {
        input: Value,
    },
    SCache {
        input: Value,
    },
    DCache {
        input: Value,
    },
    HashTableBuild {
        input: Value,
        keys: Vec<ExprDoc>,
    },
    HashTableQuery {
        input: Value,
        queries: Vec<ExprDoc>,
    },
    RTreeBuild {
        input: Value,
        keys: Vec<ExprDoc>,
    },
    RTreeQuery {
        input: Value,
        lowers: Vec<ExprDoc>,
        uppers: Vec<ExprDoc>,
    },
    PrefixSumBuild {
        input: Value,
        sum_col: NamedDoc,
        target_col: NamedDoc,
        agg_col: NamedDoc,
    },
    PrefixSumQuery {
        input: Value,
        lower: ExprDoc,
        upper: ExprDoc,
    },
    PrefixSum2DBuild {
        input: Value,
        sum_col_x: NamedDoc,
        sum_col_y: NamedDoc,
        target_col: NamedDoc,
        agg_col: NamedDoc,
    },
    PrefixSum2DQuery {
        input: Value,
        lower_x: ExprDoc,
        upper_x: ExprDoc,
        lower_y: ExprDoc,
        upper_y: ExprDoc,
    },
    AnyPlan {
        choice_id: String,
        choices: Vec<Value>,
    },
}

/// Parse a JSON plan description.
pub fn parse_json_plan(text: &str) -> Result<PlanGraph> {
    let doc: Value = serde_json::from_str(text)?;
    parse_plan_value(&doc)
}

/// Parse a YAML plan description (same shape as the JSON form).
pub fn parse_yaml_plan(text: &str) -> Result<PlanGraph> {
    let doc: Value = serde_yaml::from_str(text)?;
    parse_plan_value(&doc)
}

/// Parse a description in either form. Text starting with `{` is JSON.
pub fn parse_plan(text: &str) -> Result<PlanGraph> {
    if text.trim_start().starts_with('{') {
        parse_json_plan(text)
    } else {
        parse_yaml_plan(text)
    }
}

/// Build a graph from an already-parsed document. One arena per call.
pub fn parse_plan_value(doc: &Value) -> Result<PlanGraph> {
    let mut builder = PlanBuilder::new();
    let root = build_node(&mut builder, doc)?;
    builder.finish(root)
}

fn plan_id(doc: &Value) -> Result<PlanId> {
    let raw = doc
        .get("id")
        .and_then(Value::as_i64)
        .ok_or_else(|| PlanError::Construction(format!("plan node without integer id: {doc}")))?;
    let id = i32::try_from(raw)
        .map_err(|_| PlanError::Construction(format!("plan id {raw} out of range")))?;
    Ok(PlanId::new(id))
}

fn build_node(b: &mut PlanBuilder, doc: &Value) -> Result<NodeIdx> {
    let id = plan_id(doc)?;
    if let Some(idx) = b.lookup(id) {
        return Ok(idx);
    }
    let parsed = PlanDoc::deserialize(doc)
        .map_err(|e| PlanError::Construction(format!("plan {}: {e}", id.get())))?;
    let op = match parsed {
        PlanDoc::Projection { input, projs } => PlanOp::Projection {
            input: build_node(b, &input)?,
            projs: named_all(projs)?,
        },
        PlanDoc::Filter { input, cond } => PlanOp::Filter {
            input: build_node(b, &input)?,
            cond: build_expr(cond)?,
        },
        PlanDoc::Aggregate {
            input,
            groupbys,
            aggs,
        } => PlanOp::Aggregate {
            input: build_node(b, &input)?,
            groupbys: named_all(groupbys)?,
            aggs: named_all(aggs)?,
        },
        PlanDoc::TableSource { name } => PlanOp::TableSource { name },
        PlanDoc::Network { input } => PlanOp::Network {
            input: build_node(b, &input)?,
        },
        PlanDoc::Cloud { input } => PlanOp::Cloud {
            input: build_node(b, &input)?,
        },
        PlanDoc::SCache { input } => PlanOp::SCache {
            input: build_node(b, &input)?,
        },
        PlanDoc::DCache { input } => PlanOp::DCache {
            input: build_node(b, &input)?,
        },
        PlanDoc::HashTableBuild { input, keys } => PlanOp::HashTableBuild {
            input: build_node(b, &input)?,
            keys: exprs_all(keys)?,
        },
        PlanDoc::HashTableQuery { input, queries } => PlanOp::HashTableQuery {
            input: build_node(b, &input)?,
            queries: exprs_all(queries)?,
        },
        PlanDoc::RTreeBuild { input, keys } => PlanOp::RTreeBuild {
            input: build_node(b, &input)?,
            keys: exprs_all(keys)?,
        },
        PlanDoc::RTreeQuery {
            input,
            lowers,
            uppers,
        } => {
            if lowers.len() != uppers.len() {
                return Err(PlanError::Construction(format!(
                    "plan {}: {} lower bounds but {} upper bounds",
                    id.get(),
                    lowers.len(),
                    uppers.len()
                )));
            }
            PlanOp::RTreeQuery {
                input: build_node(b, &input)?,
                lowers: exprs_all(lowers)?,
                uppers: exprs_all(uppers)?,
            }
        }
        PlanDoc::PrefixSumBuild {
            input,
            sum_col,
            target_col,
            agg_col,
        } => PlanOp::PrefixSumBuild {
            input: build_node(b, &input)?,
            sum: named(sum_col)?,
            target: named(target_col)?,
            agg: named(agg_col)?,
        },
        PlanDoc::PrefixSumQuery {
            input,
            lower,
            upper,
        } => PlanOp::PrefixSumQuery {
            input: build_node(b, &input)?,
            lower: build_expr(lower)?,
            upper: build_expr(upper)?,
        },
        PlanDoc::PrefixSum2DBuild {
            input,
            sum_col_x,
            sum_col_y,
            target_col,
            agg_col,
        } => PlanOp::PrefixSum2DBuild {
            input: build_node(b, &input)?,
            sum_x: named(sum_col_x)?,
            sum_y: named(sum_col_y)?,
            target: named(target_col)?,
            agg: named(agg_col)?,
        },
        PlanDoc::PrefixSum2DQuery {
            input,
            lower_x,
            upper_x,
            lower_y,
            upper_y,
        } => PlanOp::PrefixSum2DQuery {
            input: build_node(b, &input)?,
            lower_x: build_expr(lower_x)?,
            upper_x: build_expr(upper_x)?,
            lower_y: build_expr(lower_y)?,
            upper_y: build_expr(upper_y)?,
        },
        PlanDoc::AnyPlan { choice_id, choices } => {
            if choices.is_empty() {
                return Err(PlanError::Construction(format!(
                    "AnyPlan {} has no alternatives",
                    id.get()
                )));
            }
            PlanOp::AnyPlan {
                choice_id,
                choices: choices
                    .iter()
                    .map(|c| build_node(b, c))
                    .collect::<Result<Vec<_>>>()?,
            }
        }
    };
    b.add(id, op)
}

fn named(doc: NamedDoc) -> Result<NamedExpr> {
    Ok(NamedExpr::new(doc.name, build_expr(doc.expr)?))
}

fn named_all(docs: Vec<NamedDoc>) -> Result<Vec<NamedExpr>> {
    docs.into_iter().map(named).collect()
}

fn exprs_all(docs: Vec<ExprDoc>) -> Result<Vec<Expr>> {
    docs.into_iter().map(build_expr).collect()
}

fn build_expr(doc: ExprDoc) -> Result<Expr> {
    Ok(match doc {
        ExprDoc::IntConst { value } => Expr::IntConst(value),
        ExprDoc::FloatConst { value } => Expr::FloatConst(value),
        ExprDoc::BoolConst { value } => Expr::BoolConst(value),
        ExprDoc::StringConst { value } => Expr::StringConst(value),
        ExprDoc::ColumnRef { column, table } => Expr::ColumnRef { column, table },
        ExprDoc::Op { op, operands } => {
            let resolved = Operator::from_symbol(&op, operands.len()).ok_or_else(|| {
                PlanError::Construction(format!(
                    "unknown operator '{op}' with {} operands",
                    operands.len()
                ))
            })?;
            Expr::op(resolved, exprs_all(operands)?)
        }
        ExprDoc::Func { fname, args } => Expr::func(fname, exprs_all(args)?),
        ExprDoc::List {
            begin,
            end,
            delim,
            elements,
        } => Expr::List(ListExpr {
            begin,
            end,
            delim,
            elements: exprs_all(elements)?,
        }),
        ExprDoc::AnyExpr { id, choices } => Expr::Any {
            id,
            choices: exprs_all(choices)?,
        },
        ExprDoc::ValExpr { id, domain } => Expr::Val {
            id,
            domain: Box::new(build_expr(*domain)?),
        },
        ExprDoc::MultiExpr {
            id,
            begin,
            end,
            delim,
            child,
        } => Expr::Multi {
            id,
            begin,
            end,
            delim,
            child: Box::new(build_expr(*child)?),
        },
    })
}

/// Parse a standalone expression document.
pub fn parse_expr_value(doc: &Value) -> Result<Expr> {
    let parsed = ExprDoc::deserialize(doc)
        .map_err(|e| PlanError::Construction(format!("expression: {e}")))?;
    build_expr(parsed)
}
