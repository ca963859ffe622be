//! Audit trail contract and fan-out service.
//!
//! The security layer reports every decision to one [`AuditTrailService`],
//! which forwards it to each configured sink. Event construction lives in
//! the provided methods of [`AuditTrail`], so every sink records the same
//! principals for the same decision.

use std::sync::Arc;

use crate::error::Result;
use crate::event::{
    AuditEvent, AuditEventBuilder, AuditEventType, AuditLayer, Authentication, OriginType,
    RequestInfo,
};
use crate::index_trail::IndexAuditTrail;
use crate::logfile::LoggingAuditTrail;
use crate::settings::{AuditOutput, AuditSettings};
use crate::store::IndexStore;

/// A sink for security decisions.
///
/// Implementors provide [`record`](Self::record); the decision methods build
/// the event and hand it over. Recording must not block the caller.
pub trait AuditTrail: Send + Sync {
    /// Short name of the sink.
    fn name(&self) -> &str;

    /// Node name stamped on recorded events.
    fn node_name(&self) -> &str;

    /// Returns true if events of `event_type` are recorded.
    fn accepts(&self, event_type: AuditEventType) -> bool;

    /// Records a fully built event.
    fn record(&self, event: AuditEvent);

    /// A realm authenticated `principal`.
    fn authentication_success(&self, realm: &str, principal: &str, request: &RequestInfo) {
        emit(self, AuditEventType::AuthenticationSuccess, |b| {
            b.request(request).principal(principal).realm(realm)
        });
    }

    /// A request without credentials was rejected.
    fn anonymous_access_denied(&self, request: &RequestInfo) {
        emit(self, AuditEventType::AnonymousAccessDenied, |b| {
            b.request(request)
        });
    }

    /// No realm could authenticate the request.
    fn authentication_failed(&self, request: &RequestInfo, principal: Option<&str>) {
        emit(self, AuditEventType::AuthenticationFailed, |b| {
            let b = b.request(request);
            match principal {
                Some(p) => b.principal(p),
                None => b,
            }
        });
    }

    /// One realm failed to authenticate `principal`.
    fn realm_authentication_failed(&self, realm: &str, principal: &str, request: &RequestInfo) {
        emit(self, AuditEventType::RealmAuthenticationFailed, |b| {
            b.request(request).principal(principal).realm(realm)
        });
    }

    /// The request was authorized.
    fn access_granted(&self, auth: &Authentication, request: &RequestInfo) {
        emit(self, AuditEventType::AccessGranted, |b| {
            b.request(request).authentication(auth)
        });
    }

    /// The request was not authorized.
    fn access_denied(&self, auth: &Authentication, request: &RequestInfo) {
        emit(self, AuditEventType::AccessDenied, |b| {
            b.request(request).authentication(auth)
        });
    }

    /// The request carried a tampered security context.
    fn tampered_request(&self, request: &RequestInfo, principal: Option<&str>) {
        emit(self, AuditEventType::TamperedRequest, |b| {
            let b = b.request(request);
            match principal {
                Some(p) => b.principal(p),
                None => b,
            }
        });
    }

    /// The ip filter accepted a connection.
    fn connection_granted(&self, address: &str, profile: &str, rule: &str) {
        emit(self, AuditEventType::ConnectionGranted, |b| {
            connection(b, address, profile, rule)
        });
    }

    /// The ip filter rejected a connection.
    fn connection_denied(&self, address: &str, profile: &str, rule: &str) {
        emit(self, AuditEventType::ConnectionDenied, |b| {
            connection(b, address, profile, rule)
        });
    }

    /// The authenticated user may act as the run-as user.
    fn run_as_granted(&self, auth: &Authentication, request: &RequestInfo) {
        emit(self, AuditEventType::RunAsGranted, |b| {
            b.request(request).authentication(auth)
        });
    }

    /// The authenticated user may not act as the run-as user.
    fn run_as_denied(&self, auth: &Authentication, request: &RequestInfo) {
        emit(self, AuditEventType::RunAsDenied, |b| {
            b.request(request).authentication(auth)
        });
    }
}

fn connection(b: AuditEventBuilder, address: &str, profile: &str, rule: &str) -> AuditEventBuilder {
    b.layer(AuditLayer::IpFilter)
        .origin_type(OriginType::Transport)
        .origin_address(address)
        .transport_profile(profile)
        .rule(rule)
}

fn emit<T, F>(trail: &T, event_type: AuditEventType, build: F)
where
    T: AuditTrail + ?Sized,
    F: FnOnce(AuditEventBuilder) -> AuditEventBuilder,
{
    if !trail.accepts(event_type) {
        return;
    }
    let builder = AuditEvent::builder()
        .event_type(event_type)
        .node_name(trail.node_name());
    match build(builder).try_build() {
        Ok(event) => trail.record(event),
        Err(err) => {
            tracing::warn!(trail = trail.name(), %event_type, error = %err, "discarding malformed audit event");
        }
    }
}

/// Fans security decisions out to every registered trail.
///
/// A disabled service holds no trails and ignores every call.
#[derive(Clone, Default)]
pub struct AuditTrailService {
    node_name: String,
    trails: Vec<Arc<dyn AuditTrail>>,
    index_trails: Vec<Arc<IndexAuditTrail>>,
}

impl std::fmt::Debug for AuditTrailService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditTrailService")
            .field("node_name", &self.node_name)
            .field(
                "trails",
                &self.trails.iter().map(|t| t.name().to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl AuditTrailService {
    /// Creates a service with no trails.
    #[must_use]
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
            trails: Vec::new(),
            index_trails: Vec::new(),
        }
    }

    /// Creates a service that records nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Builds the trails configured in `settings`.
    ///
    /// Returns a disabled service when auditing is off. `store` is only
    /// used by the index output.
    ///
    /// # Errors
    ///
    /// Returns `InvalidSettings` if the settings do not validate.
    pub fn from_settings(
        settings: &AuditSettings,
        store: Arc<dyn IndexStore>,
        node_name: impl Into<String>,
    ) -> Result<Self> {
        let node_name = node_name.into();
        if !settings.enabled {
            tracing::debug!("auditing disabled");
            return Ok(Self::disabled());
        }
        settings.validate()?;
        crate::metrics::register_metrics();

        let mut service = Self::new(node_name.clone());
        for output in &settings.outputs {
            match output {
                AuditOutput::Index => {
                    let trail = Arc::new(IndexAuditTrail::new(
                        Arc::clone(&store),
                        settings.index.clone(),
                        node_name.clone(),
                    )?);
                    service = service.with_index_trail(trail);
                }
                AuditOutput::Logfile => {
                    service = service.with_trail(Arc::new(LoggingAuditTrail::new(
                        &settings.logfile.events,
                        node_name.clone(),
                    )));
                }
            }
        }
        tracing::info!(outputs = ?settings.outputs, "auditing enabled");
        Ok(service)
    }

    /// Registers a trail.
    #[must_use]
    pub fn with_trail(mut self, trail: Arc<dyn AuditTrail>) -> Self {
        self.trails.push(trail);
        self
    }

    /// Registers an index trail whose lifecycle follows the service.
    #[must_use]
    pub fn with_index_trail(mut self, trail: Arc<IndexAuditTrail>) -> Self {
        self.trails.push(Arc::clone(&trail) as Arc<dyn AuditTrail>);
        self.index_trails.push(trail);
        self
    }

    /// Returns the registered trails in registration order.
    #[must_use]
    pub fn audit_trails(&self) -> &[Arc<dyn AuditTrail>] {
        &self.trails
    }

    /// Returns the registered index trails.
    #[must_use]
    pub fn index_trails(&self) -> &[Arc<IndexAuditTrail>] {
        &self.index_trails
    }

    /// Returns true if at least one trail is registered.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        !self.trails.is_empty()
    }

    /// Starts every index trail.
    ///
    /// # Errors
    ///
    /// Returns the first startup failure.
    pub async fn start(&self) -> Result<()> {
        for trail in &self.index_trails {
            trail.start().await?;
        }
        Ok(())
    }

    /// Stops every index trail, flushing queued events.
    ///
    /// Every trail is stopped even if an earlier one fails.
    ///
    /// # Errors
    ///
    /// Returns the first stop failure.
    pub async fn stop(&self) -> Result<()> {
        let mut first_error = None;
        for trail in &self.index_trails {
            if let Err(err) = trail.stop().await {
                tracing::warn!(error = %err, "failed to stop index audit trail");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl AuditTrail for AuditTrailService {
    fn name(&self) -> &str {
        "service"
    }

    fn node_name(&self) -> &str {
        &self.node_name
    }

    fn accepts(&self, event_type: AuditEventType) -> bool {
        self.trails.iter().any(|t| t.accepts(event_type))
    }

    fn record(&self, event: AuditEvent) {
        for trail in &self.trails {
            if trail.accepts(event.event_type) {
                trail.record(event.clone());
            }
        }
    }
}
