//! Strongly-typed identifiers used across the engine.
//!
//! `PlanId` is the id written in plan descriptions and carried on the wire.
//! `NodeIdx` is an index into one plan graph's arena and never leaves the
//! process. `RequestId` tags transport requests so replies can be matched.

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! new_id {
    ($name:ident, $inner:ty) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Ord, PartialOrd,
        )]
        #[serde(transparent)]
        pub struct $name($inner);

        impl $name {
            pub const fn new(v: $inner) -> Self {
                Self(v)
            }
            pub const fn get(self) -> $inner {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.0)
            }
        }
    };
}

new_id!(PlanId, i32);
new_id!(NodeIdx, u32);
new_id!(RequestId, u32);

impl NodeIdx {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}
