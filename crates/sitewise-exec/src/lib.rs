#![forbid(unsafe_code)]
//! sitewise-exec: the async plan runtime and the site-transition protocol.
//!
//! - `runtime::Engine` executes one `PlanGraph` under a binding. Execution is
//!   a tree of futures; only `Network`, `Cloud` and SQL-backed table loads
//!   actually suspend.
//! - `cache` holds the state of `SCache`/`DCache` nodes and the lazy binding
//!   product used to warm static caches.
//! - `tables` loads CSV base tables into the catalog.
//! - `transport` frames requests/replies; `server` and `client` are the two
//!   ends of a plan split across sites.

pub mod cache;
pub mod client;
pub mod context;
pub mod metrics;
pub mod runtime;
pub mod server;
pub mod sql;
pub mod tables;
pub mod transport;

pub use client::Client;
pub use context::{ExecContext, TableCatalog};
pub use runtime::{Engine, ExecError, Result};
pub use server::Server;
pub use sql::{CatalogSql, SqlBackend};
pub use transport::{LoopbackTransport, RequestKind, TcpTransport, Transport};
