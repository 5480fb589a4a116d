//! Plan description formats.

pub mod json;
