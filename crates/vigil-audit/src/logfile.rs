//! Audit trail that writes to the process log.

use std::collections::BTreeSet;

use crate::event::{AuditEvent, AuditEventType};
use crate::service::AuditTrail;
use crate::settings::EventFilter;

/// Log target of audit records.
pub const LOG_TARGET: &str = "vigil::audit";

/// Emits each audit event as a `tracing` record.
///
/// Denials are logged at WARN, grants at INFO.
#[derive(Debug, Clone)]
pub struct LoggingAuditTrail {
    node_name: String,
    events: BTreeSet<AuditEventType>,
}

impl LoggingAuditTrail {
    /// Creates a trail recording the effective event types of `filter`.
    #[must_use]
    pub fn new(filter: &EventFilter, node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            events: filter.effective(),
        }
    }
}

impl AuditTrail for LoggingAuditTrail {
    fn name(&self) -> &str {
        "logfile"
    }

    fn node_name(&self) -> &str {
        &self.node_name
    }

    fn accepts(&self, event_type: AuditEventType) -> bool {
        self.events.contains(&event_type)
    }

    fn record(&self, event: AuditEvent) {
        macro_rules! emit {
            ($level:expr) => {
                tracing::event!(
                    target: LOG_TARGET,
                    $level,
                    node_name = %event.node_name,
                    layer = ?event.layer,
                    origin_type = ?event.origin_type,
                    origin_address = event.origin_address.as_deref(),
                    principal = event.principal.as_deref(),
                    run_by_principal = event.run_by_principal.as_deref(),
                    realm = event.realm.as_deref(),
                    run_by_realm = event.run_by_realm.as_deref(),
                    action = event.action.as_deref(),
                    request = event.request.as_deref(),
                    indices = ?event.indices,
                    uri = event.uri.as_deref(),
                    rule = event.rule.as_deref(),
                    transport_profile = event.transport_profile.as_deref(),
                    "[{}] {}",
                    layer_name(&event),
                    event.event_type
                )
            };
        }

        if event.event_type.is_denial() {
            emit!(tracing::Level::WARN);
        } else {
            emit!(tracing::Level::INFO);
        }
    }
}

fn layer_name(event: &AuditEvent) -> &'static str {
    match event.layer {
        crate::event::AuditLayer::Rest => "rest",
        crate::event::AuditLayer::Transport => "transport",
        crate::event::AuditLayer::IpFilter => "ip_filter",
    }
}
