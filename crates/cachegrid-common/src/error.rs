//! Error types for the cachegrid controller
//!
//! Errors are structured with fields to aid debugging in production.
//! The variants follow the controller's error taxonomy:
//!
//! - `Conflict`: an optimistic write collided with a concurrent writer. Retried
//!   locally up to a bound, then surfaced as retryable at the next reconcile.
//! - `NotFound`: a declared object or process group is missing.
//! - `DeprecatedLayout`: a legacy process-group shape that is recognized but
//!   not manageable. Callers log it and skip the affected check.
//! - everything else: unexpected, surfaced unmodified.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// HTTP status returned by the API server for a stale resourceVersion
const HTTP_CONFLICT: u16 = 409;

/// HTTP status returned by the API server for a missing object
const HTTP_NOT_FOUND: u16 = 404;

/// Main error type for cachegrid operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error that is neither a conflict nor a missing object
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A declared object or observed process group does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Kind of the missing object (e.g., "CacheRuntime", "StatefulSet")
        kind: String,
        /// `namespace/name` of the missing object
        name: String,
    },

    /// Optimistic write rejected because the object changed since it was read
    #[error("conflict writing {kind} {name} after {attempts} attempt(s)")]
    Conflict {
        /// Kind of the contended object
        kind: String,
        /// `namespace/name` of the contended object
        name: String,
        /// Number of write attempts made before giving up
        attempts: u32,
    },

    /// A legacy process-group layout that this controller does not manage
    #[error("deprecated layout for {component} {name}: {message}")]
    DeprecatedLayout {
        /// Component whose layout is deprecated (master, worker, fuse)
        component: String,
        /// `namespace/name` of the runtime
        name: String,
        /// What was found instead of the expected layout
        message: String,
    },

    /// Validation error for CRD specs or bindings
    #[error("validation error for {runtime}: {message}")]
    Validation {
        /// `namespace/name` of the runtime with invalid configuration
        runtime: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.master.replicas")
        field: Option<String>,
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
        /// Context where the error occurred (e.g., "reconciler", "accessor")
        context: String,
    },
}

impl Error {
    /// Classify a kube-rs error raised while touching `kind` `name`.
    ///
    /// 404 becomes [`Error::NotFound`], 409 becomes [`Error::Conflict`] with a
    /// single attempt, anything else is kept as [`Error::Kube`].
    pub fn from_kube(source: kube::Error, kind: impl Into<String>, name: impl Into<String>) -> Self {
        match &source {
            kube::Error::Api(ae) if ae.code == HTTP_NOT_FOUND => Self::NotFound {
                kind: kind.into(),
                name: name.into(),
            },
            kube::Error::Api(ae) if ae.code == HTTP_CONFLICT => Self::Conflict {
                kind: kind.into(),
                name: name.into(),
                attempts: 1,
            },
            _ => Self::Kube { source },
        }
    }

    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a conflict error for a single rejected write
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
            attempts: 1,
        }
    }

    /// Create a deprecated-layout error
    pub fn deprecated_layout(
        component: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::DeprecatedLayout {
            component: component.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            runtime: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with runtime context
    pub fn validation_for(runtime: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            runtime: runtime.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with runtime context and field path
    pub fn validation_for_field(
        runtime: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            runtime: runtime.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
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

    /// True for an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// True for a missing object
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// True for the legacy-layout escape hatch
    pub fn is_deprecated(&self) -> bool {
        matches!(self, Error::DeprecatedLayout { .. })
    }

    /// Check if this error is retryable at the next reconcile tick
    ///
    /// Conflicts and missing objects resolve themselves as the cluster
    /// converges. Validation and serialization errors need a spec fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::NotFound { .. } => true,
            Error::Conflict { .. } => true,
            Error::DeprecatedLayout { .. } => false,
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Short machine-readable label for metrics
    pub fn kind_label(&self) -> &'static str {
        match self {
            Error::Kube { .. } => "kube",
            Error::NotFound { .. } => "not_found",
            Error::Conflict { .. } => "conflict",
            Error::DeprecatedLayout { .. } => "deprecated_layout",
            Error::Validation { .. } => "validation",
            Error::Serialization { .. } => "serialization",
            Error::Internal { .. } => "internal",
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

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {}", code),
            reason: "Test".to_string(),
            code,
        })
    }

    /// Story: a stale resourceVersion surfaces as a typed conflict
    ///
    /// The retrier keys off `is_conflict()`, so the 409 from the API server
    /// must never be hidden inside the generic Kube variant.
    #[test]
    fn story_api_conflict_maps_to_conflict_variant() {
        let err = Error::from_kube(api_error(409), "CacheRuntime", "default/hbase");
        assert!(err.is_conflict());
        assert!(err.is_retryable());
        assert!(err.to_string().contains("default/hbase"));
        match err {
            Error::Conflict { attempts, .. } => assert_eq!(attempts, 1),
            other => panic!("Expected Conflict variant, got {other:?}"),
        }
    }

    /// Story: a missing process group is reported as NotFound, not a kube error
    #[test]
    fn story_api_not_found_maps_to_not_found_variant() {
        let err = Error::from_kube(api_error(404), "StatefulSet", "default/hbase-worker");
        assert!(err.is_not_found());
        assert!(err.to_string().contains("StatefulSet default/hbase-worker not found"));
    }

    #[test]
    fn other_api_errors_stay_kube_errors() {
        let err = Error::from_kube(api_error(403), "CacheRuntime", "default/hbase");
        assert!(matches!(err, Error::Kube { .. }));
        assert!(!err.is_retryable());

        let err = Error::from_kube(api_error(503), "CacheRuntime", "default/hbase");
        assert!(err.is_retryable());
    }

    /// Story: the deprecated layout is an intentional escape hatch, not a retry
    #[test]
    fn story_deprecated_layout_is_not_retryable() {
        let err = Error::deprecated_layout("worker", "default/legacy", "found DaemonSet");
        assert!(err.is_deprecated());
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("found DaemonSet"));
    }

    #[test]
    fn validation_errors_carry_runtime_and_field() {
        let err = Error::validation_for_field("default/hbase", "spec.master.replicas", "must be >= 0");
        match &err {
            Error::Validation { runtime, field, .. } => {
                assert_eq!(runtime, "default/hbase");
                assert_eq!(field.as_deref(), Some("spec.master.replicas"));
            }
            other => panic!("Expected Validation variant, got {other:?}"),
        }
        assert!(!err.is_retryable());
        assert_eq!(err.kind_label(), "validation");
    }

    #[test]
    fn internal_error_default_context() {
        let err = Error::internal("unexpected state");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
        assert!(err.to_string().contains("[unknown]"));

        let err = Error::internal_with_context("accessor", "no namespace");
        assert_eq!(err.context(), Some("accessor"));
    }

    #[test]
    fn serde_errors_convert_to_serialization() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: Error = parse.unwrap_err().into();
        assert!(matches!(err, Error::Serialization { .. }));
        assert!(!err.is_retryable());
    }
}
