//! Base controller framework
//!
//! The framework is installed from a Helm chart. Detection looks for its
//! running pod; installing and removing the chart goes through
//! [`ChartManager`], whose default implementation drives the `helm` binary.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::client::ResourceClient;
use crate::error::{KubeError, Result};
use crate::kinds::POD;
use crate::object::ObjectExt;

/// Helm release name of the framework
pub const RELEASE_NAME: &str = "crossplane";

/// Label selector matching the framework's pod
pub const POD_SELECTOR: &str = "app=crossplane";

/// A running framework instance
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameworkInstance {
    /// Pod the framework runs in
    pub pod: String,
    /// Container image of the pod's first container
    pub image: String,
    /// Tag of the image, if it has one
    pub version: Option<String>,
}

impl FrameworkInstance {
    /// Version for display, "unknown" when the image is untagged
    pub fn display_version(&self) -> &str {
        self.version.as_deref().unwrap_or("unknown")
    }
}

/// Locate the framework pod in `namespace`
pub async fn detect<C>(client: &C, namespace: &str) -> Result<Option<FrameworkInstance>>
where
    C: ResourceClient + ?Sized,
{
    let pods = client
        .list_or_empty(&POD.kind_ref(), Some(namespace), Some(POD_SELECTOR))
        .await?;

    let Some(pod) = pods.first() else {
        debug!(namespace, "framework pod not found");
        return Ok(None);
    };

    let image = pod
        .field(&["spec", "containers"])
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("image"))
        .and_then(|i| i.as_str())
        .unwrap_or_default()
        .to_string();

    Ok(Some(FrameworkInstance {
        pod: pod.name().to_string(),
        version: image_version(&image).map(str::to_string),
        image,
    }))
}

/// Tag of a container image reference
///
/// - "crossplane/crossplane:v1.18.0" -> "v1.18.0"
/// - "registry:5000/crossplane/crossplane" -> None
/// - "crossplane/crossplane:v1.18.0@sha256:..." -> "v1.18.0"
pub fn image_version(image: &str) -> Option<&str> {
    let without_digest = image.split_once('@').map_or(image, |(name, _)| name);
    let last_segment = without_digest.rsplit('/').next().unwrap_or(without_digest);
    last_segment
        .rsplit_once(':')
        .map(|(_, tag)| tag)
        .filter(|tag| !tag.is_empty())
}

/// Proxy settings forwarded to the framework's pods
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxySettings {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
}

impl ProxySettings {
    /// Chart values setting the proxy environment of the framework pods
    pub fn chart_values(&self) -> Vec<(String, String)> {
        [
            ("HTTP_PROXY", &self.http_proxy),
            ("HTTPS_PROXY", &self.https_proxy),
            ("NO_PROXY", &self.no_proxy),
        ]
        .into_iter()
        .filter_map(|(name, value)| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(|v| (format!("extraEnvVarsCrossplane.{}", name), v.to_string()))
        })
        .collect()
    }
}

/// A chart install request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartInstall {
    pub release: String,
    /// Chart archive URL
    pub chart_url: String,
    pub namespace: String,
    /// `key=value` pairs passed as strings
    pub values: Vec<(String, String)>,
}

/// Installs and removes Helm releases
#[async_trait]
pub trait ChartManager: Send + Sync {
    /// Install a chart, creating the namespace if needed
    async fn install(&self, request: &ChartInstall) -> Result<()>;

    /// Remove a release; a release that does not exist counts as removed
    async fn uninstall(&self, release: &str, namespace: &str) -> Result<()>;
}

/// [`ChartManager`] backed by the `helm` binary
#[derive(Debug, Clone, Default)]
pub struct HelmCli {
    binary: Option<PathBuf>,
    kubeconfig: Option<PathBuf>,
    context: Option<String>,
}

impl HelmCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific helm binary instead of the one on PATH
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    /// Target the cluster of a kubeconfig file and context
    pub fn with_kubeconfig(mut self, kubeconfig: impl Into<PathBuf>, context: Option<String>) -> Self {
        self.kubeconfig = Some(kubeconfig.into());
        self.context = context;
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(
            self.binary
                .clone()
                .unwrap_or_else(|| PathBuf::from("helm")),
        );
        if let Some(kubeconfig) = &self.kubeconfig {
            command.arg("--kubeconfig").arg(kubeconfig);
        }
        if let Some(context) = &self.context {
            command.arg("--kube-context").arg(context);
        }
        command.kill_on_drop(true);
        command
    }

    async fn run(&self, args: &[String]) -> Result<String> {
        debug!(?args, "running helm");
        let output = self
            .command()
            .args(args)
            .output()
            .await
            .map_err(|e| KubeError::Framework(format!("failed to execute helm: {}", e)))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(KubeError::Framework(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ))
        }
    }
}

/// Helm splits `--set-string` values on commas
fn escape_value(value: &str) -> String {
    value.replace(',', "\\,")
}

fn install_args(request: &ChartInstall) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        "--install".to_string(),
        request.release.clone(),
        request.chart_url.clone(),
        "--namespace".to_string(),
        request.namespace.clone(),
        "--create-namespace".to_string(),
        "--wait".to_string(),
    ];
    for (key, value) in &request.values {
        args.push("--set-string".to_string());
        args.push(format!("{}={}", key, escape_value(value)));
    }
    args
}

#[async_trait]
impl ChartManager for HelmCli {
    async fn install(&self, request: &ChartInstall) -> Result<()> {
        self.run(&install_args(request)).await?;
        info!(release = %request.release, namespace = %request.namespace, "chart installed");
        Ok(())
    }

    async fn uninstall(&self, release: &str, namespace: &str) -> Result<()> {
        let args = [
            "uninstall".to_string(),
            release.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
        ];
        match self.run(&args).await {
            Ok(_) => {
                info!(release, namespace, "release uninstalled");
                Ok(())
            }
            Err(KubeError::Framework(message)) if message.contains("not found") => {
                debug!(release, namespace, "release already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
