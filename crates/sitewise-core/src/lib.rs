#![forbid(unsafe_code)]
//! sitewise-core: values, tables, bindings, ids, configuration, and the table
//! byte codec shared by every other crate in the engine.
//!
//! No async, no I/O and no plan logic live here. Operators, the plan graph and
//! the runtime build on these types.

pub mod binding;
pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod id;
pub mod prelude;
pub mod schema;
pub mod types;

pub use binding::{Binding, BindingMap};
pub use error::{Error, Result};
