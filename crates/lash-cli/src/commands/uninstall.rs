//! Uninstall command - remove Landscape IDP from a cluster

use std::sync::Arc;

use clap::Args;
use console::style;
use lash_kube::{EventBus, HelmCli, Teardown, TeardownOptions, TeardownReport};
use lash_repo::LashConfig;

use super::{ClusterArgs, cluster_client};
use crate::display::{ProgressRenderer, warning};
use crate::error::Result;

#[derive(Args, Debug, Clone, Default)]
pub struct UninstallArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Dump verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Preview the objects that would be deleted, without deleting them
    #[arg(long)]
    pub dry_run: bool,
}

impl UninstallArgs {
    fn options(&self, config: &LashConfig) -> TeardownOptions {
        let mut options = TeardownOptions::new(self.cluster.namespace(config));
        if self.dry_run {
            options = options.dry_run();
        }
        if self.verbose {
            options = options.verbose();
        }
        options
    }
}

/// Run the uninstall command
pub async fn run(config: &LashConfig, args: &UninstallArgs) -> Result<()> {
    let (kubeconfig, connection) = args.cluster.connection(config)?;
    let client = cluster_client(&connection).await?;
    let charts = Arc::new(HelmCli::new().with_kubeconfig(kubeconfig, Some(connection.context.clone())));
    let options = args.options(config);

    eprintln!(
        "{} Uninstalling Landscape IDP from namespace {} of {}",
        style("→").blue().bold(),
        style(&options.namespace).yellow(),
        style(&connection.context).cyan()
    );
    if args.dry_run {
        eprintln!("{} Dry run, nothing will be deleted", style("⚠").yellow());
    }

    let bus = EventBus::new();
    let renderer = Arc::new(ProgressRenderer::new(args.verbose || args.dry_run));
    let subscriptions = renderer.attach(&bus);

    let teardown = Teardown::new(client, charts, bus, options);
    let result = teardown.run().await;
    drop(subscriptions);

    print_summary(&result?);
    Ok(())
}

fn print_summary(report: &TeardownReport) {
    if report.dry_run {
        let found: usize = report.steps.iter().map(|s| s.found).sum();
        println!("{} object(s) would be deleted", style(found).bold());
        return;
    }

    println!("{} object(s) deleted", style(report.total_deleted()).bold());
    let failed = report.total_failed();
    if failed > 0 {
        warning(&format!(
            "{} object(s) could not be removed during cleanup, rerun with --verbose for details",
            failed
        ));
    }
}
