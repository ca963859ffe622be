//! # vigil-audit
//!
//! Security audit trail: records grant and deny decisions and persists them
//! to time-bucketed indices.
//!
//! ## Components
//!
//! - **Events**: [`AuditEvent`] and the principal rules for run-as
//! - **Service**: [`AuditTrailService`] fans decisions out to every sink
//! - **Index trail**: [`IndexAuditTrail`], a buffered, retrying sink
//! - **Logfile trail**: [`LoggingAuditTrail`], a `tracing` sink
//! - **Store**: the [`IndexStore`] contract over object storage
//! - **Scroll**: [`ScrollHelper`] for exhaustive searches
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vigil_audit::prelude::*;
//!
//! # async fn example() -> vigil_audit::Result<()> {
//! let store: Arc<dyn IndexStore> = Arc::new(ObjectIndexStore::in_memory());
//! let settings = AuditSettings {
//!     enabled: true,
//!     outputs: vec![AuditOutput::Index],
//!     ..AuditSettings::default()
//! };
//! let audit = AuditTrailService::from_settings(&settings, store, "node-0")?;
//! audit.start().await?;
//!
//! let auth = Authentication::new(User::new("alice", "native"));
//! audit.access_denied(&auth, &RequestInfo::rest("/.security/_search", "10.0.0.7:51234"));
//!
//! audit.stop().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod event;
pub mod index_name;
pub mod index_trail;
pub mod logfile;
pub mod metrics;
pub mod scroll;
pub mod service;
pub mod settings;
pub mod store;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{AuditError, Result};
    pub use crate::event::{
        AuditEvent, AuditEventType, AuditLayer, Authentication, Field, OriginType, RequestInfo,
        User,
    };
    pub use crate::index_name::{INDEX_NAME_PREFIX, Rollover};
    pub use crate::index_trail::{IndexAuditTrail, TrailState};
    pub use crate::logfile::LoggingAuditTrail;
    pub use crate::scroll::ScrollHelper;
    pub use crate::service::{AuditTrail, AuditTrailService};
    pub use crate::settings::{AuditOutput, AuditSettings, EventFilter, IndexSettings};
    pub use crate::store::{IndexStore, ObjectIndexStore, Query, SearchHit, SearchRequest};
}

pub use error::{AuditError, Result};
pub use event::{AuditEvent, AuditEventType, Authentication, RequestInfo, User};
pub use index_trail::IndexAuditTrail;
pub use logfile::LoggingAuditTrail;
pub use scroll::ScrollHelper;
pub use service::{AuditTrail, AuditTrailService};
pub use settings::AuditSettings;
pub use store::{IndexStore, ObjectIndexStore};
