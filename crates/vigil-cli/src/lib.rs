//! # vigil-cli
//!
//! Command-line inspection of audit indices.
//!
//! ## Commands
//!
//! - `vigil indices` - List audit indices and their event counts
//! - `vigil search` - Scroll through audit events matching filters
//!
//! ## Configuration
//!
//! - `VIGIL_DATA_DIR` - Root of the local storage holding the indices
//! - `VIGIL_AUDIT_INDEX_PREFIX` - Index name prefix (default: `.security_audit_log`)

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
// CLI uses print! macros intentionally
#![allow(clippy::print_stdout)]
#![allow(clippy::print_stderr)]

pub mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use vigil_audit::ObjectIndexStore;
use vigil_audit::index_name::{INDEX_NAME_PREFIX, Rollover};
use vigil_core::LocalFsBackend;

/// Vigil CLI - Security audit trail inspection.
#[derive(Debug, Parser)]
#[command(name = "vigil")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Root directory of the audit storage.
    #[arg(long, env = "VIGIL_DATA_DIR", default_value = "./vigil-data")]
    pub data_dir: PathBuf,

    /// Audit index name prefix.
    #[arg(long, global = true, env = "VIGIL_AUDIT_INDEX_PREFIX", default_value = INDEX_NAME_PREFIX)]
    pub prefix: String,

    /// Index rollover period.
    #[arg(long, global = true, env = "VIGIL_AUDIT_INDEX_ROLLOVER", default_value = "daily")]
    pub rollover: Rollover,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Get the effective configuration.
    #[must_use]
    pub fn config(&self) -> Config {
        Config {
            data_dir: self.data_dir.clone(),
            prefix: self.prefix.clone(),
            rollover: self.rollover,
            format: self.format.clone(),
        }
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// List audit indices.
    Indices(commands::indices::IndicesArgs),
    /// Search audit events.
    Search(commands::search::SearchArgs),
}

/// Output format.
#[derive(Debug, Clone, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output.
    Json,
    /// Table output.
    Table,
}

/// CLI configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root directory of the audit storage.
    pub data_dir: PathBuf,
    /// Audit index name prefix.
    pub prefix: String,
    /// Index rollover period.
    pub rollover: Rollover,
    /// Output format.
    pub format: OutputFormat,
}

impl Config {
    /// Opens the index store under `data_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be opened.
    pub fn open_store(&self) -> Result<ObjectIndexStore> {
        let backend = LocalFsBackend::open(&self.data_dir).with_context(|| {
            format!("failed to open audit storage at {}", self.data_dir.display())
        })?;
        Ok(ObjectIndexStore::new(Arc::new(backend)))
    }
}
