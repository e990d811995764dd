//! Error types for the Designate operator
//!
//! Errors are structured with fields so that the reconciler can decide how a
//! failure is surfaced: as a condition on the entity, as a requeue delay, or
//! (for optimistic write races) as nothing more than an immediate requeue.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// How a failure is reported to users and scheduled for retry
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Dependency exists but has not converged yet
    Unready,
    /// A reference points at something missing or ambiguous
    Misconfiguration,
    /// Read or write against a backing store failed
    Transient,
    /// Optimistic concurrency race; never shown to users
    Conflict,
}

/// Main error type for Designate operator operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for CRD specs
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the resource with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.topologyRef")
        field: Option<String>,
    },

    /// A referenced resource does not exist
    #[error("{kind} {namespace}/{name} not found")]
    NotFound {
        /// Kind of the missing resource
        kind: String,
        /// Namespace that was searched
        namespace: String,
        /// Name that was looked up
        name: String,
    },

    /// A reference resolved to more than one candidate
    #[error("{kind} reference is ambiguous: {message}")]
    Ambiguous {
        /// Kind of the resource being resolved
        kind: String,
        /// Description of the candidates
        message: String,
    },

    /// The stored resource version advanced since it was read
    #[error("conflict writing {kind} {name}: resource version changed")]
    Conflict {
        /// Kind of the resource being written
        kind: String,
        /// Name of the resource being written
        name: String,
    },

    /// A step did not finish before the pass deadline
    #[error("timed out during {step}")]
    Timeout {
        /// The reconcile step that was still pending
        step: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "topology")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with resource context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a not-found error for a namespaced resource
    pub fn not_found(
        kind: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self::NotFound {
            kind: kind.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Create an ambiguity error
    pub fn ambiguous(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Ambiguous {
            kind: kind.into(),
            message: msg.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a timeout error for the named step
    pub fn timeout(step: impl Into<String>) -> Self {
        Self::Timeout { step: step.into() }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Whether this error is an optimistic concurrency conflict
    ///
    /// A kube API 409 counts as a conflict as well as the explicit variant.
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409,
            _ => false,
        }
    }

    /// Classify this error for condition severity and requeue timing
    pub fn class(&self) -> ErrorClass {
        if self.is_conflict() {
            return ErrorClass::Conflict;
        }
        match self {
            Error::NotFound { .. } | Error::Ambiguous { .. } | Error::Validation { .. } => {
                ErrorClass::Misconfiguration
            }
            Error::Timeout { .. } => ErrorClass::Unready,
            Error::Kube { .. }
            | Error::Serialization { .. }
            | Error::Internal { .. }
            | Error::Conflict { .. } => ErrorClass::Transient,
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors need a spec or code change.
    /// Kubernetes errors are retryable unless they are a 4xx other than
    /// conflict (409) or throttling (429).
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
                    && ae.code != 409
                    && ae.code != 429
            ),
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::NotFound { .. }
            | Error::Ambiguous { .. }
            | Error::Conflict { .. }
            | Error::Timeout { .. }
            | Error::Internal { .. } => true,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    /// Story: a 409 from the API server is a conflict, not a backend failure
    #[test]
    fn story_api_conflict_is_classified_as_conflict() {
        let err = api_error(409);
        assert!(err.is_conflict());
        assert_eq!(err.class(), ErrorClass::Conflict);
        assert!(err.is_retryable());
    }

    /// Story: missing and ambiguous references are misconfiguration
    #[test]
    fn story_reference_errors_are_misconfiguration() {
        let err = Error::not_found("Topology", "openstack", "zone-a");
        assert_eq!(err.class(), ErrorClass::Misconfiguration);
        assert_eq!(err.to_string(), "Topology openstack/zone-a not found");

        let err = Error::ambiguous("Topology", "2 topologies match selector");
        assert_eq!(err.class(), ErrorClass::Misconfiguration);
        assert!(err.is_retryable());
    }

    #[test]
    fn server_errors_are_transient() {
        let err = api_error(500);
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(err.is_retryable());

        let err = api_error(403);
        assert_eq!(err.class(), ErrorClass::Transient);
        assert!(!err.is_retryable());
    }

    #[test]
    fn validation_is_not_retryable() {
        let err = Error::validation_for_field("producer", "spec.replicas", "must be >= 0");
        assert!(!err.is_retryable());
        match &err {
            Error::Validation { field, .. } => assert_eq!(field.as_deref(), Some("spec.replicas")),
            _ => panic!("Expected Validation variant"),
        }
    }

    #[test]
    fn timeout_is_unready() {
        let err = Error::timeout("transport");
        assert_eq!(err.class(), ErrorClass::Unready);
        assert!(err.to_string().contains("transport"));
    }

    #[test]
    fn internal_error_carries_context() {
        let err = Error::internal_with_context("topology", "finalizer patch failed");
        assert_eq!(err.context(), Some("topology"));
        assert!(err.to_string().contains("[topology]"));
        assert_eq!(Error::internal("x").context(), Some(UNKNOWN_CONTEXT));
    }
}
