#![forbid(unsafe_code)]
//! sitewise-operators: the data plane of the engine.
//!
//! - `expr`: scalar expression trees with choice nodes, binding and folding.
//! - `compute`: a small row-wise columnar engine (project/filter/aggregate
//!   pipelines over `RowBatch`).
//! - `data`: the `SerialData` payloads operators exchange, with their byte
//!   codecs.
//! - `hash_table`, `rtree`, `prefix_sum`, `prefix_sum_2d`: index structures
//!   built by the `*Build` operators and probed by the `*Query` operators.
//!
//! Everything here is synchronous. The async plan runtime lives in
//! `sitewise-exec`.

pub mod compute;
pub mod data;
pub mod expr;
pub mod hash_table;
pub mod prefix_sum;
pub mod prefix_sum_2d;
pub mod rtree;
pub mod traits;

pub use data::{SerialData, TableData};
pub use expr::{ChoiceNode, Expr, Operator};
pub use traits::{OpError, Result, WireFormat};
