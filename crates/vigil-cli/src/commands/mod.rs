//! CLI command implementations.

pub mod indices;
pub mod search;
