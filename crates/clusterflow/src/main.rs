mod commands;
mod context;
mod output;

use clap::{Parser, Subcommand};
use clusterflow_bootstrap::BootstrapError;
use clusterflow_cloud_digitalocean::DigitalOceanError;
use clusterflow_config::ConfigError;
use clusterflow_core::ClusterError;
use clusterflow_reconciler::{EXIT_CONFIG, EXIT_FAILURE, ReconcileError};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "clusterflow")]
#[command(about = "Declarative Kubernetes cluster infrastructure", long_about = None)]
struct Cli {
    /// Cluster definition file (searched for when omitted)
    #[arg(short, long, global = true)]
    file: Option<PathBuf>,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new cluster from its definition
    Create,
    /// Reconcile an existing cluster towards its definition
    Apply,
    /// Delete every resource of a cluster
    Delete {
        /// Cluster name (defaults to the one in the definition)
        name: Option<String>,
        /// Skip the confirmation prompt
        #[arg(short = 'y', long)]
        yes: bool,
    },
    /// Show the last persisted state of a cluster
    Get {
        /// Cluster name (defaults to the one in the definition)
        name: Option<String>,
        /// Print the snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show what create or apply would change
    Plan,
    /// Check the definition without calling the cloud
    Validate,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), err);
        if let Some(ReconcileError::Apply {
            retry_safe: false, ..
        }) = err.downcast_ref::<ReconcileError>()
        {
            eprintln!(
                "{}",
                "Inspect the cluster before running the command again.".yellow()
            );
        }
        std::process::exit(exit_code(&err));
    }
}

/// Logs go to stderr; `RUST_LOG` wins over `-v`
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let file = cli.file.as_deref();
    match cli.command {
        Commands::Create => commands::create::handle(file).await,
        Commands::Apply => commands::apply::handle(file).await,
        Commands::Delete { name, yes } => commands::delete::handle(file, name, yes).await,
        Commands::Get { name, json } => commands::get::handle(file, name, json).await,
        Commands::Plan => commands::plan::handle(file).await,
        Commands::Validate => commands::validate::handle(file),
        Commands::Version => {
            println!("clusterflow {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// 2 for problems found before any cloud call, 1 for everything else
fn exit_code(err: &anyhow::Error) -> i32 {
    if let Some(err) = err.downcast_ref::<ReconcileError>() {
        return err.exit_code();
    }

    let config = err.downcast_ref::<ClusterError>().is_some()
        || err.downcast_ref::<ConfigError>().is_some()
        || err.downcast_ref::<BootstrapError>().is_some()
        || matches!(
            err.downcast_ref::<DigitalOceanError>(),
            Some(DigitalOceanError::MissingToken)
        );

    if config { EXIT_CONFIG } else { EXIT_FAILURE }
}
