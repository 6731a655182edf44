//! Create command - create a catalog repository
//!
//! Only validates the connection for now; no repository is created.

use std::sync::Arc;

use clap::Args;
use lash_kube::EventBus;
use lash_repo::LashConfig;
use tracing::debug;

use super::ClusterArgs;
use crate::display::ProgressRenderer;
use crate::error::Result;

#[derive(Args, Debug, Clone, Default)]
pub struct CreateArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Dump verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Repository source
    #[arg(long)]
    pub source: Option<String>,

    /// Repository destination
    #[arg(long)]
    pub destination: Option<String>,
}

/// Run the create command
pub async fn run(config: &LashConfig, args: &CreateArgs) -> Result<()> {
    let (_, connection) = args.cluster.connection(config)?;

    let bus = EventBus::new();
    let renderer = Arc::new(ProgressRenderer::new(args.verbose));
    let _subscriptions = renderer.attach(&bus);

    debug!(
        context = %connection.context,
        source = ?args.source,
        destination = ?args.destination,
        "create requested"
    );
    bus.start_wait("creating catalog repository...");
    bus.done("Created");
    Ok(())
}
