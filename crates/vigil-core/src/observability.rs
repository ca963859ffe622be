//! Observability infrastructure for Vigil.
//!
//! Structured logging with consistent spans. This module provides the
//! initialization helper and span constructors shared by every Vigil
//! component.

use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `vigil_audit=debug`)
///
/// # Example
///
/// ```rust
/// use vigil_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        // try_init: another subscriber may already be installed (tests, embedding apps)
        let _ = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .try_init(),
        };
    });
}

/// Creates a span for audit trail operations against one index.
///
/// # Example
///
/// ```rust
/// use vigil_core::observability::audit_span;
///
/// let span = audit_span("bulk_index", ".security_audit_log-2024.03.01");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn audit_span(operation: &str, index: &str) -> Span {
    tracing::info_span!("audit", op = operation, index = index)
}
