//! CLI error types with exit code handling
//!
//! Library errors are folded into [`CliError`] so that every failure maps to
//! an exit code and, where we can suggest something, a help line.

use lash_kube::KubeError;
use lash_repo::RepoError;
use miette::Diagnostic;
use thiserror::Error;

use crate::exit_codes;

/// CLI-specific error type that includes exit code information
#[derive(Error, Debug, Diagnostic, Clone)]
pub enum CliError {
    /// The cluster rejected a call or a wait did not complete
    #[error("{message}")]
    #[diagnostic(code(lash::cli::cluster))]
    Cluster {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Kubeconfig or context unusable
    #[error("{message}")]
    #[diagnostic(code(lash::cli::credentials))]
    Credentials {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// IO error (file not found, permissions, etc.)
    #[error("IO error: {message}")]
    #[diagnostic(code(lash::cli::io))]
    Io { message: String },

    /// Invalid arguments or configuration
    #[error("{message}")]
    #[diagnostic(code(lash::cli::usage))]
    Usage {
        message: String,
        #[help]
        help: Option<String>,
    },

    /// Wrapped error for passthrough
    #[error("{message}")]
    #[diagnostic(code(lash::cli::error))]
    Other { message: String },
}

impl CliError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Cluster { .. } => exit_codes::CLUSTER_ERROR,
            CliError::Credentials { .. } => exit_codes::CREDENTIALS_ERROR,
            CliError::Io { .. } => exit_codes::IO_ERROR,
            CliError::Usage { .. } => exit_codes::USAGE_ERROR,
            CliError::Other { .. } => exit_codes::ERROR,
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage {
            message: message.into(),
            help: None,
        }
    }
}

/// Innermost error of a step chain
fn root_cause(err: &KubeError) -> &KubeError {
    match err {
        KubeError::Step { source, .. } => root_cause(source),
        other => other,
    }
}

impl From<KubeError> for CliError {
    fn from(err: KubeError) -> Self {
        let message = err.to_string();
        match root_cause(&err) {
            KubeError::InvalidCredentials(_) => CliError::Credentials {
                message,
                help: Some("Check --kubeconfig and --context".to_string()),
            },
            KubeError::Io(_) => CliError::Io { message },
            KubeError::TimedOut { .. } => CliError::Cluster {
                message,
                help: Some("Raise --timeout or inspect the resource with kubectl".to_string()),
            },
            KubeError::Collaborator(_)
            | KubeError::Framework(_)
            | KubeError::InvalidManifest(_)
            | KubeError::Serialization(_) => CliError::Other { message },
            _ => CliError::Cluster {
                message,
                help: None,
            },
        }
    }
}

impl From<RepoError> for CliError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::InvalidConfig { .. } => CliError::Usage {
                message: err.to_string(),
                help: Some("See --config and the LASH_* environment variables".to_string()),
            },
            RepoError::Io(e) => CliError::Io {
                message: e.to_string(),
            },
            other => CliError::Other {
                message: other.to_string(),
            },
        }
    }
}

impl From<std::io::Error> for CliError {
    fn from(err: std::io::Error) -> Self {
        CliError::Io {
            message: err.to_string(),
        }
    }
}

/// Result type alias for CLI operations
pub type Result<T> = std::result::Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_exit_codes() {
        assert_eq!(CliError::usage("bad").exit_code(), exit_codes::USAGE_ERROR);
        assert_eq!(
            CliError::Other { message: "x".to_string() }.exit_code(),
            exit_codes::ERROR
        );
    }

    #[test]
    fn test_step_classified_by_source() {
        let err = KubeError::TimedOut {
            target: "Configuration/landscape-core".to_string(),
            timeout: Duration::from_secs(5),
        }
        .in_step("installing package 'landscape-core'");

        let cli: CliError = err.into();
        assert_eq!(cli.exit_code(), exit_codes::CLUSTER_ERROR);
        assert!(cli.to_string().starts_with("installing package 'landscape-core'"));
    }

    #[test]
    fn test_credentials() {
        let cli: CliError = KubeError::InvalidCredentials("no context 'prod'".to_string()).into();
        assert_eq!(cli.exit_code(), exit_codes::CREDENTIALS_ERROR);
    }

    #[test]
    fn test_repo_config_is_usage() {
        let cli: CliError = RepoError::InvalidConfig {
            message: "config file not found: nope.yaml".to_string(),
        }
        .into();
        assert_eq!(cli.exit_code(), exit_codes::USAGE_ERROR);
    }
}
