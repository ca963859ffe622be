//! # vigil-core
//!
//! Core abstractions shared by the Vigil audit trail crates.
//!
//! - **Error Types**: Shared error definitions and result types
//! - **Storage**: The [`StorageBackend`] contract with in-memory and local
//!   filesystem implementations
//! - **Observability**: Logging initialization and span helpers
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vigil_core::prelude::*;
//!
//! let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod observability;
pub mod storage;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::storage::{
        LocalFsBackend, MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
    };
}

pub use error::{Error, Result};
pub use observability::{LogFormat, init_logging};
pub use storage::{
    LocalFsBackend, MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
};
