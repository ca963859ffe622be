//! Shared test utilities for Vigil integration tests.
//!
//! This crate provides:
//! - [`FailingBackend`]: In-memory storage with failure injection
//! - [`SecurityHarness`]: Simulated authn/authz layer reporting to an audit service
//! - [`await_busy`]: Polling with exponential backoff for async assertions
//! - [`CapturingRecorder`]: Metrics recorder for counter assertions
//! - [`LogCapture`]: Layer collecting `tracing` events
//!
//! # Example
//!
//! ```rust,ignore
//! use vigil_test_utils::{SecurityHarness, SearchCall};
//!
//! let harness = SecurityHarness::run_as_fixture(audit);
//! let status = harness.search(&SearchCall::new([".security"]).basic_auth("http_user", "http_pass"));
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod logs;
pub mod recorder;
pub mod security;
pub mod storage;
pub mod wait;

pub use logs::{CapturedEvent, LogCapture};
pub use recorder::CapturingRecorder;
pub use security::*;
pub use storage::*;
pub use wait::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("vigil=debug".parse().expect("valid directive"))
                .add_directive("vigil_audit=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
