//! Error types shared across kubejob crates
//!
//! Errors carry structured fields so log lines and failure reports say which
//! resource, field or stage was involved rather than only a message.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for kubejob operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// A watch stream on the cluster failed
    #[error("watch error on {resource}: {message}")]
    Watch {
        /// Resource being watched (e.g., "pods", "jobs")
        resource: String,
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "create_client", "log_stream")
        context: String,
    },
}

impl Error {
    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create a watch error for the given resource
    pub fn watch(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Watch {
            resource: resource.into(),
            message: msg.into(),
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

    /// Whether the API server answered 404 for the requested object
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Kube {
                source: kube::Error::Api(ae)
            } if ae.code == 404
        )
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            Error::Watch { resource, .. } => Some(resource),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: "boom".to_string(),
            reason: "Test".to_string(),
            code,
        }))
    }

    #[test]
    fn test_serialization_for_kind() {
        let err = Error::serialization_for_kind("Job", "missing field");
        match err {
            Error::Serialization { kind, message } => {
                assert_eq!(kind.as_deref(), Some("Job"));
                assert_eq!(message, "missing field");
            }
            _ => panic!("expected Serialization"),
        }
    }

    #[test]
    fn test_watch_error_has_resource_context() {
        let err = Error::watch("pods", "stream reset");
        assert_eq!(err.context(), Some("pods"));
        assert_eq!(err.to_string(), "watch error on pods: stream reset");
    }

    #[test]
    fn test_internal_error_default_context() {
        let err = Error::internal("something broke");
        assert_eq!(err.context(), Some(UNKNOWN_CONTEXT));
    }

    #[test]
    fn test_internal_error_with_context() {
        let err = Error::internal_with_context("create_client", "no kubeconfig");
        assert_eq!(err.context(), Some("create_client"));
        assert!(err.to_string().contains("[create_client]"));
    }

    #[test]
    fn test_not_found_detection() {
        assert!(api_error(404).is_not_found());
        assert!(!api_error(409).is_not_found());
        assert!(!Error::internal("x").is_not_found());
    }
}
