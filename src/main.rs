//! clusterctl - operator CLI for the wallet cluster graph
//!
//! Works against a JSON snapshot of the in-memory graph store. Mutating
//! commands (ingest, onboard, sweep, watch) write the snapshot back.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::EnvFilter;

// Use the library crate
use cluster_intel::cli::commands;
use cluster_intel::config::Config;

/// Coordinated-wallet cluster intelligence
#[derive(Parser)]
#[command(name = "clusterctl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value = "config.toml")]
    config: String,

    /// Graph snapshot file (overrides store.snapshot_path)
    #[arg(short, long, global = true, env = "CLUSTERCTL_SNAPSHOT")]
    snapshot: Option<String>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load wallets, trades and launches from a JSON file and run batch detection
    Ingest {
        /// JSON file with `wallets`, `trades` and `launches` arrays
        file: String,
    },

    /// Onboard a wallet: relationship detection, network expansion, clustering
    Onboard {
        /// Wallet address
        address: String,
    },

    /// Run one catchup sweep over unclustered wallets
    Sweep,

    /// Run the catchup sweep loop until Ctrl-C
    Watch,

    /// Show the cluster a wallet belongs to
    Lookup {
        /// Wallet address
        address: String,
    },

    /// Check live cluster activity for a wallet entering a token
    Amplify {
        /// Wallet address
        address: String,

        /// Token mint address
        token: String,

        /// Evaluation time (RFC 3339), defaults to now
        #[arg(long)]
        at: Option<String>,
    },

    /// Show graph statistics and clusters
    Stats,

    /// Show effective configuration
    Config,
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cluster_intel=info"));

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    init_tracing(cli.json_logs);

    // Load configuration
    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    let snapshot = cli.snapshot.as_deref();

    // Execute command
    let result = match cli.command {
        Commands::Ingest { file } => commands::ingest(&config, snapshot, &file).await,
        Commands::Onboard { address } => commands::onboard(&config, snapshot, &address).await,
        Commands::Sweep => commands::sweep(&config, snapshot).await,
        Commands::Watch => commands::watch(&config, snapshot).await,
        Commands::Lookup { address } => commands::lookup(&config, snapshot, &address).await,
        Commands::Amplify { address, token, at } => {
            commands::amplify(&config, snapshot, &address, &token, at.as_deref()).await
        }
        Commands::Stats => commands::stats(&config, snapshot).await,
        Commands::Config => commands::show_config(&config),
    };

    if let Err(e) = result {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
