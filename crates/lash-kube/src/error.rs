//! Error types for lash-kube

use std::time::Duration;

use thiserror::Error;

/// Result type for lash-kube operations
pub type Result<T> = std::result::Result<T, KubeError>;

/// Errors that can occur while driving resources on a cluster
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KubeError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Api(#[from] kube::Error),

    /// The kind is not served by the cluster (CRD never installed)
    #[error("kind '{kind}' is not known to the cluster")]
    KindNotFound { kind: String },

    /// A named object does not exist
    #[error("{kind} '{name}' not found")]
    ObjectNotFound { kind: String, name: String },

    /// Kubeconfig could not be parsed or the context could not be selected
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The watch stream ended before the stop condition held
    #[error("watch on {target} closed before the condition was met")]
    StreamClosed { target: String },

    /// The caller cancelled the watch
    #[error("watch on {target} was cancelled")]
    Cancelled { target: String },

    /// The stop condition did not hold within the deadline
    #[error("watch on {target} timed out after {}s", timeout.as_secs())]
    TimedOut { target: String, timeout: Duration },

    /// The server rejected a write
    #[error("conflict applying {kind} '{name}': {message}")]
    ApplyConflict {
        kind: String,
        name: String,
        message: String,
    },

    /// Invalid manifest
    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Chart install/uninstall failed
    #[error("framework error: {0}")]
    Framework(String),

    /// Catalog, fetch or prompt collaborator failed
    #[error("{0}")]
    Collaborator(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A fatal failure inside a named workflow step
    #[error("{step}: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<KubeError>,
    },
}

impl From<serde_json::Error> for KubeError {
    fn from(e: serde_json::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl From<serde_yaml::Error> for KubeError {
    fn from(e: serde_yaml::Error) -> Self {
        KubeError::Serialization(e.to_string())
    }
}

impl KubeError {
    /// Check if this is a Kubernetes 404 Not Found error
    pub fn is_not_found(&self) -> bool {
        match self {
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 404,
            KubeError::ObjectNotFound { .. } => true,
            KubeError::Step { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Check if this is a conflict error (409)
    pub fn is_conflict(&self) -> bool {
        match self {
            KubeError::Api(kube::Error::Api(resp)) => resp.code == 409,
            KubeError::ApplyConflict { .. } => true,
            KubeError::Step { source, .. } => source.is_conflict(),
            _ => false,
        }
    }

    /// Check if the kind itself is unknown to the cluster
    pub fn is_kind_not_found(&self) -> bool {
        match self {
            KubeError::KindNotFound { .. } => true,
            KubeError::Step { source, .. } => source.is_kind_not_found(),
            _ => false,
        }
    }

    /// Attach the name of the workflow step that failed
    pub fn in_step(self, step: impl Into<String>) -> Self {
        KubeError::Step {
            step: step.into(),
            source: Box::new(self),
        }
    }
}

/// Build an API error response with the given status code
pub(crate) fn api_error(code: u16, reason: &str, message: impl Into<String>) -> KubeError {
    KubeError::Api(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: message.into(),
        reason: reason.to_string(),
        code,
    }))
}
