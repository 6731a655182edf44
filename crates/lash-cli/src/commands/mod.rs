//! CLI commands

pub mod create;
pub mod init;
pub mod uninstall;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use lash_kube::{ClusterClient, ConnectionContext, load_connection};
use lash_repo::LashConfig;
use tracing::debug;

use crate::error::Result;

/// Flags selecting the cluster, shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct ClusterArgs {
    /// Absolute path to the kubeconfig file
    #[arg(long, env = "KUBECONFIG", value_name = "FILE")]
    pub kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long)]
    pub context: Option<String>,

    /// Namespace where Landscape IDP is installed [default: landscape-system]
    #[arg(short, long)]
    pub namespace: Option<String>,
}

impl ClusterArgs {
    pub fn namespace(&self, config: &LashConfig) -> String {
        self.namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| config.namespace.clone())
    }

    pub fn kubeconfig_path(&self, config: &LashConfig) -> Result<PathBuf> {
        match self.kubeconfig.clone().filter(|p| !p.as_os_str().is_empty()) {
            Some(path) => Ok(path),
            None => Ok(config.kubeconfig_path()?),
        }
    }

    fn context<'a>(&'a self, config: &'a LashConfig) -> Option<&'a str> {
        self.context.as_deref().or(config.context.as_deref())
    }

    /// Resolve the kubeconfig into a connection context
    pub fn connection(&self, config: &LashConfig) -> Result<(PathBuf, ConnectionContext)> {
        let path = self.kubeconfig_path(config)?;
        let connection = load_connection(&path, self.context(config))?;
        debug!(
            kubeconfig = %path.display(),
            context = %connection.context,
            cluster = %connection.cluster,
            "connection resolved"
        );
        Ok((path, connection))
    }
}

/// Client for the cluster selected by `connection`
pub async fn cluster_client(connection: &ConnectionContext) -> Result<Arc<ClusterClient>> {
    let client = connection.client().await?;
    Ok(Arc::new(ClusterClient::new(client)))
}
