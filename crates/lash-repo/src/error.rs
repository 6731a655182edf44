//! Error types for remote sources and configuration

use lash_kube::KubeError;
use thiserror::Error;

/// Remote source and configuration errors
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RepoError {
    // ============ Network Errors ============
    #[error("HTTP error: {status} fetching {url}")]
    HttpError { status: u16, url: String },

    #[error("Network error: {message}")]
    NetworkError { message: String },

    #[error("Request timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("Invalid URL: {url} - {reason}")]
    InvalidUrl { url: String, reason: String },

    // ============ Chart Index Errors ============
    #[error("Invalid index format: {message}")]
    InvalidIndex { message: String },

    #[error("Chart not found in index: {name}")]
    ChartNotFound { name: String },

    #[error("Version not found: {name}@{version}")]
    VersionNotFound { name: String, version: String },

    #[error("No versions available for chart: {name}")]
    NoVersionsAvailable { name: String },

    #[error("Chart {name}@{version} has no download URL")]
    NoDownloadUrl { name: String, version: String },

    // ============ Catalog Errors ============
    #[error("Invalid catalog: {message}")]
    InvalidCatalog { message: String },

    // ============ Configuration Errors ============
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // ============ IO Errors ============
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for remote source operations
pub type Result<T> = std::result::Result<T, RepoError>;

/// Seconds before an HTTP request is abandoned
pub(crate) const REQUEST_TIMEOUT_SECS: u64 = 30;

impl From<reqwest::Error> for RepoError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            RepoError::Timeout {
                seconds: REQUEST_TIMEOUT_SECS,
            }
        } else if let Some(status) = e.status() {
            RepoError::HttpError {
                status: status.as_u16(),
                url: e.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else if e.is_connect() {
            RepoError::NetworkError {
                message: format!("Connection failed: {}", e),
            }
        } else {
            RepoError::NetworkError {
                message: e.to_string(),
            }
        }
    }
}

impl From<serde_yaml::Error> for RepoError {
    fn from(e: serde_yaml::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(e: serde_json::Error) -> Self {
        RepoError::Serialization(e.to_string())
    }
}

impl From<url::ParseError> for RepoError {
    fn from(e: url::ParseError) -> Self {
        RepoError::InvalidUrl {
            url: String::new(),
            reason: e.to_string(),
        }
    }
}

impl From<semver::Error> for RepoError {
    fn from(e: semver::Error) -> Self {
        RepoError::InvalidIndex {
            message: format!("Invalid semver: {}", e),
        }
    }
}

/// Collaborator failures surface to the drivers as [`KubeError::Collaborator`]
impl From<RepoError> for KubeError {
    fn from(e: RepoError) -> Self {
        KubeError::Collaborator(e.to_string())
    }
}
