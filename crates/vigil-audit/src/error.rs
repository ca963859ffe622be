//! Error types for vigil-audit operations.

use thiserror::Error;

/// Result type alias for audit operations.
pub type Result<T> = std::result::Result<T, AuditError>;

/// Errors that can occur while recording or reading audit events.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// Whether retrying may succeed.
        transient: bool,
    },

    /// Serialization/deserialization failed.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// The target index does not exist.
    #[error("no such index [{index}]")]
    IndexNotFound {
        /// Name of the missing index.
        index: String,
    },

    /// The index name is not usable.
    #[error("invalid index name [{index}]: {reason}")]
    InvalidIndexName {
        /// The rejected name.
        index: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// A document id is not usable.
    #[error("invalid document id [{id}]")]
    InvalidDocumentId {
        /// The rejected id.
        id: String,
    },

    /// The scroll context expired or never existed.
    #[error("no search context found for scroll id [{scroll_id}]")]
    ScrollNotFound {
        /// The unknown scroll id.
        scroll_id: String,
    },

    /// An audit event is missing a required field.
    #[error("audit event missing required field: {field}")]
    InvalidEvent {
        /// The name of the missing field.
        field: &'static str,
    },

    /// Audit settings failed validation.
    #[error("invalid audit settings: {message}")]
    InvalidSettings {
        /// Description of the problem.
        message: String,
    },

    /// The operation is not allowed in the trail's current lifecycle state.
    #[error("audit trail is {state}")]
    Lifecycle {
        /// The state that rejected the operation.
        state: String,
    },
}

impl AuditError {
    /// Creates a non-transient storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            transient: false,
        }
    }

    /// Creates a settings validation error.
    #[must_use]
    pub fn settings(message: impl Into<String>) -> Self {
        Self::InvalidSettings {
            message: message.into(),
        }
    }

    /// Returns true if retrying the operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Storage { transient: true, .. })
    }
}

impl From<vigil_core::Error> for AuditError {
    fn from(err: vigil_core::Error) -> Self {
        match err {
            vigil_core::Error::Serialization { message } => Self::Serialization { message },
            other => Self::Storage {
                transient: other.is_transient(),
                message: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for AuditError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn core_storage_errors_stay_transient() {
        let err: AuditError = vigil_core::Error::storage("backend unavailable").into();
        assert!(err.is_transient());

        let err: AuditError = vigil_core::Error::NotFound("x".into()).into();
        assert!(!err.is_transient());
    }

    #[test]
    fn display_names_missing_index() {
        let err = AuditError::IndexNotFound {
            index: ".security_audit_log-2024.01.01".into(),
        };
        assert_eq!(
            err.to_string(),
            "no such index [.security_audit_log-2024.01.01]"
        );
    }
}
