#![forbid(unsafe_code)]
//! sitewise-planner: plan descriptions -> `PlanGraph`.
//!
//! Design:
//! - A plan is a closed `PlanOp` enum stored in an arena (`PlanGraph`);
//!   children are `NodeIdx` values into the same arena. Node ids from the
//!   description are unique per graph, so a repeated id is a shared subtree
//!   and the graph is a DAG.
//! - This crate adds:
//!     * JSON/YAML description parsing (`dsl`)
//!     * explain rendering and SQL rendering (`render`)
//!     * binding projection and choice enumeration (`choice`)
//!     * the initialization order and site placement used by the runtime
//!
//! Execution lives in `sitewise-exec`; nothing here is async.

pub mod choice;
pub mod dsl;
pub mod error;
pub mod plan;
pub mod render;

pub use dsl::json::{
    parse_expr_value, parse_json_plan, parse_plan, parse_plan_value, parse_yaml_plan,
};
pub use error::{PlanError, Result};
pub use plan::{NamedExpr, PlanBuilder, PlanGraph, PlanNode, PlanOp, Site};
