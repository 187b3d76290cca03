#![doc = include_str!("../README.md")]

mod common;
pub use common::*;
// Public re-export so downstream crates can reach the ULID types via
// `vidgest_core::ferroid`
pub use ferroid;
