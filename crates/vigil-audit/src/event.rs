//! Audit event model.
//!
//! An [`AuditEvent`] is the durable record of one security decision. Events
//! are created synchronously when the decision is made, queued, and persisted
//! asynchronously as JSON documents. They are never updated afterwards.
//!
//! ## Document shape
//!
//! ```json
//! {
//!   "@timestamp": "2024-03-01T12:00:00.000Z",
//!   "node_name": "node-0",
//!   "layer": "transport",
//!   "type": "access_denied",
//!   "origin_type": "rest",
//!   "principal": "exec_user",
//!   "run_by_principal": "http_user",
//!   "action": "indices:data/read/search",
//!   "indices": [".security"]
//! }
//! ```
//!
//! Keys are exposed as constants on [`Field`].

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};

/// Document keys of a persisted audit event.
#[derive(Debug, Clone, Copy)]
pub struct Field;

impl Field {
    /// Event creation time.
    pub const TIMESTAMP: &'static str = "@timestamp";
    /// Name of the recording node.
    pub const NODE_NAME: &'static str = "node_name";
    /// Layer that made the decision.
    pub const LAYER: &'static str = "layer";
    /// Event type name.
    pub const TYPE: &'static str = "type";
    /// Origin of the request.
    pub const ORIGIN_TYPE: &'static str = "origin_type";
    /// Remote address of the request.
    pub const ORIGIN_ADDRESS: &'static str = "origin_address";
    /// Acting (effective) identity.
    pub const PRINCIPAL: &'static str = "principal";
    /// Identity that initiated a run-as.
    pub const RUN_BY_PRINCIPAL: &'static str = "run_by_principal";
    /// Realm of the acting identity.
    pub const REALM: &'static str = "realm";
    /// Realm of the run-as initiator.
    pub const RUN_BY_REALM: &'static str = "run_by_realm";
    /// Action name.
    pub const ACTION: &'static str = "action";
    /// Request type name.
    pub const REQUEST: &'static str = "request";
    /// Affected indices.
    pub const INDICES: &'static str = "indices";
    /// REST path.
    pub const URI: &'static str = "uri";
    /// Matched ip filter rule.
    pub const RULE: &'static str = "rule";
    /// Transport profile of a filtered connection.
    pub const TRANSPORT_PROFILE: &'static str = "transport_profile";
}

/// Security decisions that are audited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    /// A request without credentials was denied.
    AnonymousAccessDenied,
    /// Authentication failed.
    AuthenticationFailed,
    /// A single realm failed to authenticate the request.
    RealmAuthenticationFailed,
    /// Authorization granted.
    AccessGranted,
    /// Authorization denied.
    AccessDenied,
    /// The request carried tampered security context.
    TamperedRequest,
    /// The ip filter accepted a connection.
    ConnectionGranted,
    /// The ip filter rejected a connection.
    ConnectionDenied,
    /// The authenticated user may act as the run-as user.
    RunAsGranted,
    /// The authenticated user may not act as the run-as user.
    RunAsDenied,
    /// Authentication succeeded.
    AuthenticationSuccess,
}

impl AuditEventType {
    const ALL: [Self; 11] = [
        Self::AnonymousAccessDenied,
        Self::AuthenticationFailed,
        Self::RealmAuthenticationFailed,
        Self::AccessGranted,
        Self::AccessDenied,
        Self::TamperedRequest,
        Self::ConnectionGranted,
        Self::ConnectionDenied,
        Self::RunAsGranted,
        Self::RunAsDenied,
        Self::AuthenticationSuccess,
    ];

    /// Returns every event type.
    #[must_use]
    pub fn all() -> &'static [Self] {
        &Self::ALL
    }

    /// Returns the wire name of this event type.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::AnonymousAccessDenied => "anonymous_access_denied",
            Self::AuthenticationFailed => "authentication_failed",
            Self::RealmAuthenticationFailed => "realm_authentication_failed",
            Self::AccessGranted => "access_granted",
            Self::AccessDenied => "access_denied",
            Self::TamperedRequest => "tampered_request",
            Self::ConnectionGranted => "connection_granted",
            Self::ConnectionDenied => "connection_denied",
            Self::RunAsGranted => "run_as_granted",
            Self::RunAsDenied => "run_as_denied",
            Self::AuthenticationSuccess => "authentication_success",
        }
    }

    /// Returns true if this event records a denial or failure.
    #[must_use]
    pub const fn is_denial(self) -> bool {
        !matches!(
            self,
            Self::AccessGranted
                | Self::ConnectionGranted
                | Self::RunAsGranted
                | Self::AuthenticationSuccess
        )
    }
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AuditEventType {
    type Err = AuditError;

    fn from_str(s: &str) -> Result<Self> {
        let needle = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.name() == needle)
            .ok_or_else(|| AuditError::settings(format!("unknown audit event type [{needle}]")))
    }
}

/// Layer of the stack that made the decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditLayer {
    /// HTTP layer.
    Rest,
    /// Node-to-node transport layer.
    Transport,
    /// Connection-level ip filtering.
    IpFilter,
}

/// Where a request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginType {
    /// An HTTP client.
    Rest,
    /// A remote node.
    Transport,
    /// The local node itself.
    LocalNode,
}

/// Request context passed by the security layer alongside each decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    /// Layer handling the request.
    pub layer: AuditLayer,
    /// Origin of the request.
    pub origin_type: Option<OriginType>,
    /// Remote address.
    pub origin_address: Option<String>,
    /// Action name (e.g. `indices:data/read/search`).
    pub action: Option<String>,
    /// Request type name (e.g. `SearchRequest`).
    pub request: Option<String>,
    /// Indices the request targets.
    pub indices: Vec<String>,
    /// REST path.
    pub uri: Option<String>,
}

impl RequestInfo {
    /// Context for a request seen at the REST layer.
    #[must_use]
    pub fn rest(uri: impl Into<String>, origin_address: impl Into<String>) -> Self {
        Self {
            layer: AuditLayer::Rest,
            origin_type: Some(OriginType::Rest),
            origin_address: Some(origin_address.into()),
            action: None,
            request: None,
            indices: Vec::new(),
            uri: Some(uri.into()),
        }
    }

    /// Context for a request seen at the transport layer.
    #[must_use]
    pub fn transport(
        action: impl Into<String>,
        request: impl Into<String>,
        origin_type: OriginType,
        origin_address: impl Into<String>,
    ) -> Self {
        Self {
            layer: AuditLayer::Transport,
            origin_type: Some(origin_type),
            origin_address: Some(origin_address.into()),
            action: Some(action.into()),
            request: Some(request.into()),
            indices: Vec::new(),
            uri: None,
        }
    }

    /// Sets the indices the request targets.
    #[must_use]
    pub fn with_indices<I, S>(mut self, indices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indices = indices.into_iter().map(Into::into).collect();
        self
    }
}

/// An identity together with the realm that vouched for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    /// Principal name. May be empty for a malformed run-as header.
    pub principal: String,
    /// Realm name, if the identity was resolved by a realm.
    pub realm: Option<String>,
}

impl User {
    /// Creates a user resolved by `realm`.
    #[must_use]
    pub fn new(principal: impl Into<String>, realm: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            realm: Some(realm.into()),
        }
    }

    /// Creates a user that no realm resolved.
    #[must_use]
    pub fn unresolved(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            realm: None,
        }
    }
}

/// Outcome of authentication, including an optional run-as identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authentication {
    /// The identity proven by credentials.
    pub authenticated_by: User,
    /// The identity being acted as, if a run-as was requested.
    pub run_as: Option<User>,
}

impl Authentication {
    /// Authentication without run-as.
    #[must_use]
    pub const fn new(user: User) -> Self {
        Self {
            authenticated_by: user,
            run_as: None,
        }
    }

    /// Adds a run-as identity.
    #[must_use]
    pub fn with_run_as(mut self, user: User) -> Self {
        self.run_as = Some(user);
        self
    }

    /// The identity the request acts as.
    #[must_use]
    pub fn effective(&self) -> &User {
        self.run_as.as_ref().unwrap_or(&self.authenticated_by)
    }
}

/// A security audit event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC, millisecond precision).
    #[serde(rename = "@timestamp", with = "rfc3339_millis")]
    pub timestamp: DateTime<Utc>,

    /// Name of the node that recorded the event.
    pub node_name: String,

    /// Layer that made the decision.
    pub layer: AuditLayer,

    /// The security decision.
    #[serde(rename = "type")]
    pub event_type: AuditEventType,

    /// Origin of the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_type: Option<OriginType>,

    /// Remote address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_address: Option<String>,

    /// Acting identity. Present but empty for an empty run-as header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,

    /// Identity that initiated a run-as.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_by_principal: Option<String>,

    /// Realm of the acting identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,

    /// Realm of the run-as initiator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_by_realm: Option<String>,

    /// Action name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,

    /// Request type name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<String>,

    /// Affected indices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub indices: Option<Vec<String>>,

    /// REST path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,

    /// Matched ip filter rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,

    /// Transport profile of a filtered connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_profile: Option<String>,
}

impl AuditEvent {
    /// Creates a new builder for constructing audit events.
    #[must_use]
    pub fn builder() -> AuditEventBuilder {
        AuditEventBuilder::default()
    }

    /// Serializes the event into its JSON document form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_document(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }

    /// Parses an event back from its document form.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not describe an audit event.
    pub fn from_document(document: serde_json::Value) -> Result<Self> {
        Ok(serde_json::from_value(document)?)
    }
}

/// Builder for constructing [`AuditEvent`] instances.
#[derive(Debug, Default)]
pub struct AuditEventBuilder {
    event_type: Option<AuditEventType>,
    layer: Option<AuditLayer>,
    timestamp: Option<DateTime<Utc>>,
    node_name: Option<String>,
    origin_type: Option<OriginType>,
    origin_address: Option<String>,
    principal: Option<String>,
    run_by_principal: Option<String>,
    realm: Option<String>,
    run_by_realm: Option<String>,
    action: Option<String>,
    request: Option<String>,
    indices: Option<Vec<String>>,
    uri: Option<String>,
    rule: Option<String>,
    transport_profile: Option<String>,
}

impl AuditEventBuilder {
    /// Sets the event type.
    #[must_use]
    pub fn event_type(mut self, event_type: AuditEventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Sets the layer.
    #[must_use]
    pub fn layer(mut self, layer: AuditLayer) -> Self {
        self.layer = Some(layer);
        self
    }

    /// Overrides the event time (defaults to now).
    #[must_use]
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Sets the recording node name.
    #[must_use]
    pub fn node_name(mut self, node_name: impl Into<String>) -> Self {
        self.node_name = Some(node_name.into());
        self
    }

    /// Sets the acting principal.
    #[must_use]
    pub fn principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    /// Sets the realm of the acting principal.
    #[must_use]
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    /// Sets the affected indices.
    #[must_use]
    pub fn indices<I, S>(mut self, indices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indices = Some(indices.into_iter().map(Into::into).collect());
        self
    }

    /// Sets the origin type.
    #[must_use]
    pub fn origin_type(mut self, origin_type: OriginType) -> Self {
        self.origin_type = Some(origin_type);
        self
    }

    /// Sets the origin address.
    #[must_use]
    pub fn origin_address(mut self, address: impl Into<String>) -> Self {
        self.origin_address = Some(address.into());
        self
    }

    /// Sets the matched ip filter rule.
    #[must_use]
    pub fn rule(mut self, rule: impl Into<String>) -> Self {
        self.rule = Some(rule.into());
        self
    }

    /// Sets the transport profile.
    #[must_use]
    pub fn transport_profile(mut self, profile: impl Into<String>) -> Self {
        self.transport_profile = Some(profile.into());
        self
    }

    /// Copies layer, origin, action, request, indices and uri from a request.
    ///
    /// An empty index list is recorded as absent.
    #[must_use]
    pub fn request(mut self, info: &RequestInfo) -> Self {
        self.layer = Some(info.layer);
        self.origin_type = info.origin_type;
        self.origin_address.clone_from(&info.origin_address);
        self.action.clone_from(&info.action);
        self.request.clone_from(&info.request);
        self.uri.clone_from(&info.uri);
        self.indices = (!info.indices.is_empty()).then(|| info.indices.clone());
        self
    }

    /// Records the principals of an authentication.
    ///
    /// With a run-as identity, `principal` is the run-as user and
    /// `run_by_principal` the authenticating user.
    #[must_use]
    pub fn authentication(mut self, auth: &Authentication) -> Self {
        if let Some(run_as) = &auth.run_as {
            self.principal = Some(run_as.principal.clone());
            self.realm.clone_from(&run_as.realm);
            self.run_by_principal = Some(auth.authenticated_by.principal.clone());
            self.run_by_realm.clone_from(&auth.authenticated_by.realm);
        } else {
            self.principal = Some(auth.authenticated_by.principal.clone());
            self.realm.clone_from(&auth.authenticated_by.realm);
            self.run_by_principal = None;
            self.run_by_realm = None;
        }
        self
    }

    /// Builds the audit event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event type or layer is missing.
    pub fn try_build(self) -> Result<AuditEvent> {
        let event_type = self
            .event_type
            .ok_or(AuditError::InvalidEvent { field: Field::TYPE })?;
        let layer = self
            .layer
            .ok_or(AuditError::InvalidEvent { field: Field::LAYER })?;

        Ok(AuditEvent {
            timestamp: self.timestamp.unwrap_or_else(Utc::now).trunc_subsecs(3),
            node_name: self.node_name.unwrap_or_default(),
            layer,
            event_type,
            origin_type: self.origin_type,
            origin_address: self.origin_address,
            principal: self.principal,
            run_by_principal: self.run_by_principal,
            realm: self.realm,
            run_by_realm: self.run_by_realm,
            action: self.action,
            request: self.request,
            indices: self.indices,
            uri: self.uri,
            rule: self.rule,
            transport_profile: self.transport_profile,
        })
    }
}

mod rfc3339_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|ts| ts.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
