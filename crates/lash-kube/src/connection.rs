//! Cluster credentials
//!
//! A kubeconfig document is resolved once per invocation into a
//! [`ConnectionContext`]; everything after that talks to the cluster the
//! context selects.

use std::path::Path;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use crate::error::{KubeError, Result};

/// A kubeconfig with one context selected
#[derive(Debug, Clone)]
pub struct ConnectionContext {
    /// Selected context name
    pub context: String,
    /// Cluster the context points at
    pub cluster: String,
    /// User entry the context authenticates as
    pub user: Option<String>,
    /// Default namespace of the context, if any
    pub namespace: Option<String>,
    kubeconfig: Kubeconfig,
}

impl ConnectionContext {
    /// Build a client for the selected context
    pub async fn client(&self) -> Result<Client> {
        let options = KubeConfigOptions {
            context: Some(self.context.clone()),
            cluster: None,
            user: None,
        };

        let config = Config::from_custom_kubeconfig(self.kubeconfig.clone(), &options)
            .await
            .map_err(|e| KubeError::InvalidCredentials(e.to_string()))?;

        Client::try_from(config).map_err(KubeError::Api)
    }
}

/// Parse a kubeconfig document and select a context
///
/// Uses `context` when given, otherwise the document's `current-context`.
/// Fails with [`KubeError::InvalidCredentials`] on malformed input, on an
/// unknown context name, or when the context names a cluster the document
/// does not define.
pub fn resolve_connection(raw: &[u8], context: Option<&str>) -> Result<ConnectionContext> {
    let text = std::str::from_utf8(raw)
        .map_err(|e| KubeError::InvalidCredentials(format!("kubeconfig is not UTF-8: {}", e)))?;

    let kubeconfig = Kubeconfig::from_yaml(text)
        .map_err(|e| KubeError::InvalidCredentials(format!("malformed kubeconfig: {}", e)))?;

    let selected = match context.filter(|c| !c.is_empty()) {
        Some(name) => name.to_string(),
        None => kubeconfig
            .current_context
            .clone()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                KubeError::InvalidCredentials(
                    "no context given and kubeconfig has no current-context".to_string(),
                )
            })?,
    };

    let named = kubeconfig
        .contexts
        .iter()
        .find(|c| c.name == selected)
        .ok_or_else(|| {
            KubeError::InvalidCredentials(format!("context '{}' not found in kubeconfig", selected))
        })?;

    let details = named.context.as_ref().ok_or_else(|| {
        KubeError::InvalidCredentials(format!("context '{}' has no details", selected))
    })?;

    if !kubeconfig.clusters.iter().any(|c| c.name == details.cluster) {
        return Err(KubeError::InvalidCredentials(format!(
            "context '{}' refers to unknown cluster '{}'",
            selected, details.cluster
        )));
    }

    Ok(ConnectionContext {
        context: selected,
        cluster: details.cluster.clone(),
        user: details.user.clone().into(),
        namespace: details.namespace.clone(),
        kubeconfig,
    })
}

/// Read a kubeconfig file and select a context
pub fn load_connection(path: &Path, context: Option<&str>) -> Result<ConnectionContext> {
    let raw = std::fs::read(path)?;
    resolve_connection(&raw, context)
}
