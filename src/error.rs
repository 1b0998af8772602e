//! Error types for the image sync controller

use thiserror::Error;

/// HTTP status the API server returns for a missing object
const NOT_FOUND: u16 = 404;

/// HTTP status the API server returns for a stale resourceVersion
const CONFLICT: u16 = 409;

/// Main error type for image sync operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error (transport, permission, throttling, ...)
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Optimistic concurrency failure: the object changed since it was read
    #[error("conflict updating {kind} {namespace}/{name}: object was modified concurrently")]
    Conflict {
        /// Kind of the object that could not be written
        kind: String,
        /// Namespace of the object
        namespace: String,
        /// Name of the object
        name: String,
    },

    /// An object was missing metadata the controller relies on
    #[error("{kind} is missing {field}")]
    MissingField {
        /// Kind of the malformed object
        kind: String,
        /// The missing field path (e.g. "metadata.namespace")
        field: String,
    },

    /// Invalid command-line or environment configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Telemetry setup failed
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// Leader election failed
    #[error("leader election error: {0}")]
    LeaderElection(String),
}

impl Error {
    /// Create a conflict error for the given object
    pub fn conflict(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create a missing-field error
    pub fn missing_field(kind: impl Into<String>, field: impl Into<String>) -> Self {
        Self::MissingField {
            kind: kind.into(),
            field: field.into(),
        }
    }

    /// Create an invalid-configuration error with the given message
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a telemetry error with the given message
    pub fn telemetry(msg: impl Into<String>) -> Self {
        Self::Telemetry(msg.into())
    }

    /// Create a leader election error with the given message
    pub fn leader_election(msg: impl Into<String>) -> Self {
        Self::LeaderElection(msg.into())
    }

    /// Whether this error is a conflict on write
    pub fn is_conflict(&self) -> bool {
        match self {
            Self::Conflict { .. } => true,
            Self::Kube(e) => is_api_status(e, CONFLICT),
            _ => false,
        }
    }

    /// Whether this error means the target object does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Kube(e) if is_api_status(e, NOT_FOUND))
    }
}

/// Check whether a kube error is an API response with the given status code
pub fn is_api_status(error: &kube::Error, code: u16) -> bool {
    matches!(error, kube::Error::Api(ae) if ae.code == code)
}

/// Check whether a kube error is a 404
pub fn is_not_found(error: &kube::Error) -> bool {
    is_api_status(error, NOT_FOUND)
}

/// Check whether a kube error is a 409
pub fn is_conflict(error: &kube::Error) -> bool {
    is_api_status(error, CONFLICT)
}

#[cfg(test)]
pub(crate) fn api_error(code: u16, reason: &str) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} (test)"),
        reason: reason.to_string(),
        code,
    })
}
