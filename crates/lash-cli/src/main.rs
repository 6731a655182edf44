//! Lash CLI - install and tear down the Landscape platform on Kubernetes

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use lash_repo::LashConfig;
use tracing_subscriber::EnvFilter;

mod commands;
mod display;
mod error;
mod exit_codes;
mod prompt;

use commands::create::CreateArgs;
use commands::init::InitArgs;
use commands::uninstall::UninstallArgs;
use error::Result;

#[derive(Parser)]
#[command(name = "lash")]
#[command(version)]
#[command(about = "Install and tear down the Landscape IDP on Kubernetes", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file [default: ./config.yaml, then ~/.lash/config.yaml]
    #[arg(long, global = true, env = "LASH_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install crossplane, the catalog packages and the core claims
    Init(InitArgs),

    /// Remove everything installed by init
    Uninstall(UninstallArgs),

    /// Create a catalog repository
    Create(CreateArgs),
}

impl Commands {
    fn verbose(&self) -> bool {
        match self {
            Commands::Init(args) => args.verbose,
            Commands::Uninstall(args) => args.verbose,
            Commands::Create(args) => args.verbose,
        }
    }
}

fn init_tracing(config: &LashConfig, verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("warn,lash=debug,lash_kube=debug,lash_repo=debug")
        } else {
            EnvFilter::new(config.log_level.as_deref().unwrap_or("warn"))
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = LashConfig::load(cli.config.as_deref())?;
    init_tracing(&config, cli.command.verbose());

    match &cli.command {
        Commands::Init(args) => commands::init::run(&config, args).await,
        Commands::Uninstall(args) => commands::uninstall::run(&config, args).await,
        Commands::Create(args) => commands::create::run(&config, args).await,
    }
}

#[tokio::main]
async fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => e.exit(),
        Err(e) => {
            let _ = e.print();
            std::process::exit(exit_codes::USAGE_ERROR);
        }
    };

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
    std::process::exit(exit_codes::SUCCESS);
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_init_flags() {
        let cli = Cli::try_parse_from([
            "lash",
            "init",
            "-n",
            "platform",
            "-m",
            "--no-crossplane",
            "--set",
            "domain=idp.example.org",
            "--set",
            "replicas=3",
        ])
        .unwrap();

        let Commands::Init(args) = cli.command else {
            panic!("expected init");
        };
        assert_eq!(args.cluster.namespace.as_deref(), Some("platform"));
        assert!(args.management_cluster);
        assert!(args.no_crossplane);
        assert_eq!(args.set, vec!["domain=idp.example.org", "replicas=3"]);
    }

    #[test]
    fn test_parse_uninstall_dry_run() {
        let cli = Cli::try_parse_from(["lash", "uninstall", "--dry-run", "-v"]).unwrap();
        assert!(cli.command.verbose());
        let Commands::Uninstall(args) = cli.command else {
            panic!("expected uninstall");
        };
        assert!(args.dry_run);
    }
}
