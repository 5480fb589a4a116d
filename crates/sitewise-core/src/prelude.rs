//! Convenient re-exports for downstream crates.

pub use crate::binding::{Binding, BindingMap};
pub use crate::codec::{ByteReader, ByteWriter};
pub use crate::config::EngineConfig;
pub use crate::error::{Error, Result};
pub use crate::id::{NodeIdx, PlanId, RequestId};
pub use crate::schema::{DataType, Field, Schema};
pub use crate::types::{Column, RowBatch, Scalar};
