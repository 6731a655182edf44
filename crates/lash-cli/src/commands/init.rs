//! Init command - install Landscape IDP into a cluster

use std::sync::Arc;
use std::time::Duration;

use clap::Args;
use console::style;
use lash_kube::{
    Collaborators, EventBus, HelmCli, InstallOptions, InstallSummary, Installer, Prompter,
    ProxySettings,
};
use lash_repo::{HttpCatalog, HttpChartIndex, HttpClient, HttpFetcher, LashConfig};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ClusterArgs, cluster_client};
use crate::display::ProgressRenderer;
use crate::error::{CliError, Result};
use crate::prompt::{InteractivePrompter, NonInteractivePrompter};

#[derive(Args, Debug, Clone, Default)]
pub struct InitArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Dump verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Use the specified HTTP proxy
    #[arg(long, env = "HTTP_PROXY")]
    pub http_proxy: Option<String>,

    /// Use the specified HTTPS proxy
    #[arg(long, env = "HTTPS_PROXY")]
    pub https_proxy: Option<String>,

    /// Comma-separated list of hosts and domains which do not use the proxy
    #[arg(long, env = "NO_PROXY")]
    pub no_proxy: Option<String>,

    /// GitOps URL for the control plane
    #[arg(long)]
    pub catalog_url: Option<String>,

    /// Do not install crossplane
    #[arg(long)]
    pub no_crossplane: bool,

    /// Create a management cluster
    #[arg(short, long)]
    pub management_cluster: bool,

    /// Values used in the core module (key=value)
    #[arg(long = "set", hide = true)]
    pub set: Vec<String>,

    /// Seconds to wait for each component to become ready
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,
}

impl InitArgs {
    fn options(&self, config: &LashConfig) -> InstallOptions {
        InstallOptions {
            namespace: self.cluster.namespace(config),
            catalog_url: self
                .catalog_url
                .clone()
                .unwrap_or_else(|| config.catalog_url.clone()),
            no_framework: self.no_crossplane,
            management_cluster: self.management_cluster,
            set_values: self.set.clone(),
            proxy: ProxySettings {
                http_proxy: self.http_proxy.clone(),
                https_proxy: self.https_proxy.clone(),
                no_proxy: self.no_proxy.clone(),
            },
            chart_values: config.crossplane_chart.set_values(),
            core_version: config.core_version.clone(),
            timeout: self
                .timeout
                .map(Duration::from_secs)
                .unwrap_or_else(|| config.watch_timeout()),
            verbose: self.verbose,
        }
    }

    fn prompter(&self, config: &LashConfig) -> Arc<dyn Prompter> {
        if config.interactive && console::user_attended() {
            Arc::new(InteractivePrompter)
        } else {
            Arc::new(NonInteractivePrompter::from_set_values(&self.set))
        }
    }
}

/// Run the init command
pub async fn run(config: &LashConfig, args: &InitArgs) -> Result<()> {
    if let Some(bad) = args.set.iter().find(|v| !v.contains('=')) {
        return Err(CliError::usage(format!(
            "invalid --set value '{}', expected key=value",
            bad
        )));
    }

    let (kubeconfig, connection) = args.cluster.connection(config)?;
    let client = cluster_client(&connection).await?;
    let options = args.options(config);

    let http = HttpClient::new()?;
    let chart = &config.crossplane_chart;
    let collaborators = Collaborators {
        catalog: Arc::new(HttpCatalog::new(http.clone(), config.catalog_index.clone())),
        fetcher: Arc::new(HttpFetcher::new(http.clone())),
        chart_index: Arc::new(
            HttpChartIndex::new(http, &chart.repository, chart.name.clone())
                .with_version(chart.version.clone()),
        ),
        charts: Arc::new(HelmCli::new().with_kubeconfig(kubeconfig, Some(connection.context.clone()))),
        prompter: args.prompter(config),
    };

    eprintln!(
        "{} Installing Landscape IDP into namespace {} of {}",
        style("→").blue().bold(),
        style(&options.namespace).yellow(),
        style(&connection.context).cyan()
    );

    let bus = EventBus::new();
    let renderer = Arc::new(ProgressRenderer::new(args.verbose));
    let subscriptions = renderer.attach(&bus);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            interrupt.cancel();
        }
    });

    let installer = Installer::new(client, collaborators, bus, options).with_cancellation(cancel);
    let result = installer.run().await;
    drop(subscriptions);

    let summary = result?;
    debug!(?summary, "install finished");
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &InstallSummary) {
    if let Some(version) = &summary.framework_installed {
        println!("  crossplane  {}", style(version).cyan());
    }
    for provider in &summary.providers {
        println!("  provider    {}", provider);
    }
    for package in &summary.packages {
        println!("  package     {}", package);
    }
    if summary.claim_values.is_none() {
        crate::display::warning("core XRD not found, no claims were created");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_flags_and_config() {
        let config = LashConfig {
            watch_timeout_secs: 120,
            ..Default::default()
        };
        let args = InitArgs {
            https_proxy: Some("http://proxy:3128".to_string()),
            management_cluster: true,
            set: vec!["domain=idp.example.org".to_string()],
            ..Default::default()
        };

        let options = args.options(&config);
        assert_eq!(options.namespace, "landscape-system");
        assert_eq!(options.catalog_url, config.catalog_url);
        assert_eq!(options.timeout, Duration::from_secs(120));
        assert!(options.management_cluster);
        assert_eq!(
            options.proxy.chart_values(),
            vec![(
                "extraEnvVarsCrossplane.HTTPS_PROXY".to_string(),
                "http://proxy:3128".to_string()
            )]
        );
    }

    #[test]
    fn test_timeout_flag_wins() {
        let args = InitArgs {
            timeout: Some(30),
            no_crossplane: true,
            ..Default::default()
        };
        let options = args.options(&LashConfig::default());
        assert_eq!(options.timeout, Duration::from_secs(30));
        assert!(options.no_framework);
    }
}
