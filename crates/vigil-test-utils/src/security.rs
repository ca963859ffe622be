//! Simulated authentication and authorization layer.
//!
//! [`SecurityHarness`] plays the part of the node's security filter for
//! integration tests: it authenticates basic credentials against a fixed
//! user table, applies run-as, authorizes index access by role, and reports
//! each decision to an [`AuditTrailService`] exactly the way a real node
//! would. Denials come back as HTTP status codes.

use std::collections::HashMap;

use http::StatusCode;
use vigil_audit::event::{Authentication, OriginType, RequestInfo, User};
use vigil_audit::{AuditTrail, AuditTrailService};

/// Realm name of harness users.
pub const FILE_REALM: &str = "file";

/// Action name of a search request.
pub const SEARCH_ACTION: &str = "indices:data/read/search";

/// Index and run-as privileges of a role.
#[derive(Debug, Clone, Default)]
pub struct Role {
    indices: Vec<String>,
    run_as: Vec<String>,
}

impl Role {
    /// Creates a role without privileges.
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants read on index patterns. A trailing `*` matches any suffix.
    #[must_use]
    pub fn indices<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indices.extend(patterns.into_iter().map(Into::into));
        self
    }

    /// Allows acting as the named users. `*` allows anyone.
    #[must_use]
    pub fn run_as<I, S>(mut self, users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_as.extend(users.into_iter().map(Into::into));
        self
    }

    fn can_read(&self, index: &str) -> bool {
        self.indices.iter().any(|p| pattern_matches(p, index))
    }

    fn can_run_as(&self, user: &str) -> bool {
        self.run_as.iter().any(|p| pattern_matches(p, user))
    }
}

fn pattern_matches(pattern: &str, value: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => value.starts_with(prefix),
        None => pattern == value,
    }
}

#[derive(Debug, Clone)]
struct UserEntry {
    password: String,
    roles: Vec<String>,
}

/// A search call as it arrives over HTTP.
#[derive(Debug, Clone)]
pub struct SearchCall {
    indices: Vec<String>,
    basic_auth: Option<(String, String)>,
    run_as: Option<String>,
    origin_address: String,
}

impl SearchCall {
    /// Searches `indices` without credentials.
    pub fn new<I, S>(indices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            indices: indices.into_iter().map(Into::into).collect(),
            basic_auth: None,
            run_as: None,
            origin_address: "127.0.0.1:9200".to_string(),
        }
    }

    /// Adds basic credentials.
    #[must_use]
    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.basic_auth = Some((user.into(), password.into()));
        self
    }

    /// Adds a run-as header. An empty name is passed through as-is.
    #[must_use]
    pub fn run_as(mut self, user: impl Into<String>) -> Self {
        self.run_as = Some(user.into());
        self
    }

    fn path(&self) -> String {
        format!("/{}/_search", self.indices.join(","))
    }

    fn transport_info(&self) -> RequestInfo {
        RequestInfo::transport(
            SEARCH_ACTION,
            "SearchRequest",
            OriginType::Rest,
            self.origin_address.clone(),
        )
        .with_indices(self.indices.iter().cloned())
    }
}

/// Simulated security filter reporting to an audit service.
#[derive(Debug)]
pub struct SecurityHarness {
    audit: AuditTrailService,
    users: HashMap<String, UserEntry>,
    roles: HashMap<String, Role>,
}

impl SecurityHarness {
    /// Creates a harness with no users.
    pub fn new(audit: AuditTrailService) -> Self {
        Self {
            audit,
            users: HashMap::new(),
            roles: HashMap::new(),
        }
    }

    /// Harness with the users of the run-as scenarios:
    ///
    /// - `http_user` may run as `exec_user` and reads nothing itself
    /// - `exec_user` reads `logs-*` but not `.security`
    pub fn run_as_fixture(audit: AuditTrailService) -> Self {
        Self::new(audit)
            .with_role("runner", Role::new().run_as(["exec_user"]))
            .with_role("reader", Role::new().indices(["logs-*"]))
            .with_user("http_user", "http_pass", ["runner"])
            .with_user("exec_user", "exec_pass", ["reader"])
    }

    /// Defines a role.
    #[must_use]
    pub fn with_role(mut self, name: impl Into<String>, role: Role) -> Self {
        self.roles.insert(name.into(), role);
        self
    }

    /// Defines a user.
    #[must_use]
    pub fn with_user<I, S>(
        mut self,
        name: impl Into<String>,
        password: impl Into<String>,
        roles: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.users.insert(
            name.into(),
            UserEntry {
                password: password.into(),
                roles: roles.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    /// Returns the audit service decisions are reported to.
    pub fn audit(&self) -> &AuditTrailService {
        &self.audit
    }

    /// Authenticates, applies run-as and authorizes a search.
    pub fn search(&self, call: &SearchCall) -> StatusCode {
        let request = call.transport_info();

        let Some((principal, password)) = &call.basic_auth else {
            self.audit
                .anonymous_access_denied(&RequestInfo::rest(call.path(), call.origin_address.clone()));
            return StatusCode::UNAUTHORIZED;
        };

        let authenticated = self
            .users
            .get(principal)
            .is_some_and(|entry| &entry.password == password);
        if !authenticated {
            self.audit
                .realm_authentication_failed(FILE_REALM, principal, &request);
            self.audit.authentication_failed(&request, Some(principal.as_str()));
            return StatusCode::UNAUTHORIZED;
        }
        self.audit
            .authentication_success(FILE_REALM, principal, &request);

        let mut auth = Authentication::new(User::new(principal.clone(), FILE_REALM));
        if let Some(run_as) = &call.run_as {
            if run_as.is_empty() {
                auth = auth.with_run_as(User::unresolved(""));
                self.audit.run_as_denied(&auth, &request);
                return StatusCode::UNAUTHORIZED;
            }
            let exists = self.users.contains_key(run_as);
            auth = auth.with_run_as(if exists {
                User::new(run_as.clone(), FILE_REALM)
            } else {
                User::unresolved(run_as.clone())
            });
            if !exists || !self.allows(principal, |role| role.can_run_as(run_as)) {
                self.audit.run_as_denied(&auth, &request);
                return StatusCode::FORBIDDEN;
            }
            self.audit.run_as_granted(&auth, &request);
        }

        let effective = auth.effective().principal.clone();
        let authorized = call
            .indices
            .iter()
            .all(|index| self.allows(&effective, |role| role.can_read(index)));
        if authorized {
            self.audit.access_granted(&auth, &request);
            StatusCode::OK
        } else {
            self.audit.access_denied(&auth, &request);
            StatusCode::FORBIDDEN
        }
    }

    fn allows(&self, user: &str, check: impl Fn(&Role) -> bool) -> bool {
        self.users.get(user).is_some_and(|entry| {
            entry
                .roles
                .iter()
                .filter_map(|name| self.roles.get(name))
                .any(&check)
        })
    }
}
