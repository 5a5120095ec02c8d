//! Error types for kubeutils
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries the namespace, object name and, for waits, the
//! elapsed time so a failure can be diagnosed from the message alone.

use std::time::Duration;

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for kubeutils operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// No API port was supplied to the facade
    #[error("client not initialized, build KubeUtils with connect() or new()")]
    ApiNotInitialized,

    /// Requested key is absent from the fetched secret payload
    #[error("key {key} not found in secret {namespace}/{secret}")]
    SecretKeyNotFound {
        /// Namespace of the secret
        namespace: String,
        /// Name of the secret
        secret: String,
        /// Missing key
        key: String,
    },

    /// Secret value is not valid base64 or not valid UTF-8
    #[error("failed to decode key {key} of secret {namespace}/{secret}: {message}")]
    SecretDecode {
        /// Namespace of the secret
        namespace: String,
        /// Name of the secret
        secret: String,
        /// Key whose value failed to decode
        key: String,
        /// Decoder message
        message: String,
    },

    /// No pod matched the selector before the allocation timeout
    #[error(
        "pod matching '{label_selector}' in {namespace} was not allocated after {:.0}s",
        elapsed.as_secs_f64()
    )]
    PodAllocationTimeout {
        /// Namespace that was searched
        namespace: String,
        /// Label selector used for the search
        label_selector: String,
        /// Time spent waiting
        elapsed: Duration,
    },

    /// Pod stayed out of Running for longer than the pending timeout
    #[error(
        "waiting pod timeout: {namespace}/{pod} still pending after {:.0}s",
        elapsed.as_secs_f64()
    )]
    PendingTimeout {
        /// Namespace of the pod
        namespace: String,
        /// Pod name
        pod: String,
        /// Time spent waiting
        elapsed: Duration,
    },

    /// Log stream ran past its timeout
    #[error(
        "pod running timeout: log stream of {namespace}/{pod} exceeded {:.0}s",
        elapsed.as_secs_f64()
    )]
    LogStreamTimeout {
        /// Namespace of the pod
        namespace: String,
        /// Pod name
        pod: String,
        /// Time spent streaming
        elapsed: Duration,
    },

    /// Pod was observed in the Failed phase
    #[error("pod {namespace}/{pod} failed")]
    PodFailed {
        /// Namespace of the pod
        namespace: String,
        /// Pod name
        pod: String,
    },

    /// Reading from the log stream failed
    #[error("log stream error for {namespace}/{pod}: {message}")]
    LogStream {
        /// Namespace of the pod
        namespace: String,
        /// Pod name
        pod: String,
        /// Description of what failed
        message: String,
    },

    /// A wait was cancelled through its cancellation token
    #[error("{operation} cancelled")]
    Cancelled {
        /// The wait that was interrupted
        operation: String,
    },

    /// Manifest accessed before it was loaded
    #[error("manifest not loaded, load a manifest first")]
    ManifestNotLoaded,

    /// Manifest file could not be read, parsed or written
    #[error("manifest error [{path}]: {message}")]
    Manifest {
        /// Path of the manifest file
        path: String,
        /// Description of what failed
        message: String,
    },

    /// Input failed validation
    #[error("validation error: {message}")]
    Validation {
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred
        context: String,
    },
}

impl Error {
    /// Create a missing-key error for a secret
    pub fn secret_key_not_found(
        namespace: impl Into<String>,
        secret: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self::SecretKeyNotFound {
            namespace: namespace.into(),
            secret: secret.into(),
            key: key.into(),
        }
    }

    /// Create a decode error for a secret value
    pub fn secret_decode(
        namespace: impl Into<String>,
        secret: impl Into<String>,
        key: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::SecretDecode {
            namespace: namespace.into(),
            secret: secret.into(),
            key: key.into(),
            message: msg.into(),
        }
    }

    /// Create a pod-failed error
    pub fn pod_failed(namespace: impl Into<String>, pod: impl Into<String>) -> Self {
        Self::PodFailed {
            namespace: namespace.into(),
            pod: pod.into(),
        }
    }

    /// Create a log stream error
    pub fn log_stream(
        namespace: impl Into<String>,
        pod: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::LogStream {
            namespace: namespace.into(),
            pod: pod.into(),
            message: msg.into(),
        }
    }

    /// Create a cancellation error for the named wait
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a manifest error for the given path
    pub fn manifest(path: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
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

    /// Check if this error is one of the wait timeouts
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::PodAllocationTimeout { .. }
                | Error::PendingTimeout { .. }
                | Error::LogStreamTimeout { .. }
        )
    }

    /// Get the pod name if this error is associated with a specific pod
    pub fn pod(&self) -> Option<&str> {
        match self {
            Error::PendingTimeout { pod, .. }
            | Error::LogStreamTimeout { pod, .. }
            | Error::PodFailed { pod, .. }
            | Error::LogStream { pod, .. } => Some(pod),
            _ => None,
        }
    }

    /// Get the namespace if this error has one
    pub fn namespace(&self) -> Option<&str> {
        match self {
            Error::SecretKeyNotFound { namespace, .. }
            | Error::SecretDecode { namespace, .. }
            | Error::PodAllocationTimeout { namespace, .. }
            | Error::PendingTimeout { namespace, .. }
            | Error::LogStreamTimeout { namespace, .. }
            | Error::PodFailed { namespace, .. }
            | Error::LogStream { namespace, .. } => Some(namespace),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::serialization(e.to_string())
    }
}
