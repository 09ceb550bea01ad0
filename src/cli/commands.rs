//! CLI command implementations

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::cluster::{ClusterAmplifier, ClusterService};
use crate::config::Config;
use crate::detect::{CoOccurrenceAnalyzer, SyncBuyDetector};
use crate::graph::{GraphStore, InMemoryGraphStore};
use crate::onboarding::{CatchupSweep, NetworkOnboarder, OnboardingResult};
use crate::types::{validate_address, TokenLaunchInfo, TradeEvent, WalletNode};

/// Records accepted by `ingest`
#[derive(Debug, Default, Deserialize)]
pub struct IngestBatch {
    #[serde(default)]
    pub wallets: Vec<WalletNode>,
    #[serde(default)]
    pub trades: Vec<TradeEvent>,
    #[serde(default)]
    pub launches: Vec<TokenLaunchInfo>,
}

/// Store opened from the snapshot file, if any
struct Session {
    store: Arc<InMemoryGraphStore>,
    snapshot: Option<PathBuf>,
}

impl Session {
    /// `--snapshot` wins over `store.snapshot_path`
    fn open(config: &Config, snapshot: Option<&str>) -> Result<Self> {
        let snapshot = snapshot
            .map(PathBuf::from)
            .or_else(|| config.store.snapshot_path.as_ref().map(PathBuf::from));

        let store = match &snapshot {
            Some(path) => InMemoryGraphStore::load_or_default(path)
                .with_context(|| format!("Failed to load snapshot {}", path.display()))?,
            None => {
                warn!("No snapshot configured - changes will not be persisted");
                InMemoryGraphStore::new()
            }
        };

        Ok(Self {
            store: Arc::new(store),
            snapshot,
        })
    }

    fn save(&self) -> Result<()> {
        if let Some(path) = &self.snapshot {
            self.store
                .save_snapshot(path)
                .with_context(|| format!("Failed to save snapshot {}", path.display()))?;
        }
        Ok(())
    }

    fn onboarder(&self, config: &Config) -> Arc<NetworkOnboarder> {
        Arc::new(NetworkOnboarder::new(
            config,
            self.store.clone(),
            self.store.clone(),
        ))
    }
}

/// Load wallets, trades and launches, then run batch detection
pub async fn ingest(config: &Config, snapshot: Option<&str>, file: &str) -> Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("Failed to read {}", file))?;
    let batch: IngestBatch =
        serde_json::from_str(&raw).with_context(|| format!("Failed to parse {}", file))?;

    let session = Session::open(config, snapshot)?;
    let store = &session.store;

    let mut wallets = 0;
    for wallet in batch.wallets {
        store.upsert_wallet(wallet).await?;
        wallets += 1;
    }
    // Wallets only seen through trades still need a registry node
    for trade in &batch.trades {
        if store.get_wallet(&trade.wallet).await?.is_none() {
            store.upsert_wallet(WalletNode::new(&trade.wallet)).await?;
            wallets += 1;
        }
    }

    let buys: Vec<TradeEvent> = batch.trades.iter().filter(|t| t.is_buy()).cloned().collect();
    let recorded = store.record_trades(batch.trades);
    for launch in &batch.launches {
        store.record_launch(launch.clone());
    }
    info!(wallets, trades = recorded, launches = batch.launches.len(), "Batch ingested");

    let timeout = config.store.timeout();
    let sync = SyncBuyDetector::new(config.sync.clone(), store.clone(), timeout)
        .detect(&buys)
        .await;
    let co = CoOccurrenceAnalyzer::new(config.co_occurrence.clone(), store.clone(), timeout)
        .analyze(&batch.launches, &buys)
        .await;

    session.save()?;

    println!("\n=== INGEST ===\n");
    println!("Wallets registered: {}", wallets);
    println!("Trades recorded: {}", recorded);
    println!("Launches recorded: {}", batch.launches.len());
    println!(
        "Synced buys: {} events, {} new / {} updated edges ({} high-frequency pairs)",
        sync.sync_events, sync.edges_created, sync.edges_updated, sync.high_frequency_pairs
    );
    println!(
        "Co-occurrence: {} tokens, {} new / {} updated edges",
        co.tokens_analyzed, co.edges_created, co.edges_updated
    );
    let errors = sync.errors + co.errors;
    if errors > 0 {
        println!("Errors: {}", errors);
    }

    Ok(())
}

/// Onboard one wallet and its network
pub async fn onboard(config: &Config, snapshot: Option<&str>, address: &str) -> Result<()> {
    validate_address(address)?;

    let session = Session::open(config, snapshot)?;
    let result = session.onboarder(config).onboard_address(address).await;
    session.save()?;

    print_onboarding(&result);
    Ok(())
}

fn print_onboarding(result: &OnboardingResult) {
    println!("\n=== ONBOARDING: {} ===\n", result.address);
    println!("Status: {:?}", result.status);
    println!(
        "Edges created: {} (funded_by {}, synced_buy {}, co_occurs {})",
        result.edges_created.total(),
        result.edges_created.funded_by,
        result.edges_created.synced_buy,
        result.edges_created.co_occurs
    );
    println!(
        "Network: {} neighbors, {} qualified, {} recursed",
        result.network_size, result.qualified_count, result.recursed_count
    );
    match &result.cluster_id {
        Some(id) => {
            println!("Cluster: {} ({} members)", id, result.cluster_size);
            println!(
                "Leader: {}",
                result.leader_address.as_deref().unwrap_or("(none)")
            );
        }
        None => println!("Cluster: (none)"),
    }
    if result.errors > 0 {
        println!("Errors: {}", result.errors);
    }
}

/// Run a single catchup sweep
pub async fn sweep(config: &Config, snapshot: Option<&str>) -> Result<()> {
    let session = Session::open(config, snapshot)?;
    let sweep = CatchupSweep::new(
        config.catchup.clone(),
        session.store.clone(),
        session.onboarder(config),
        config.store.timeout(),
    );
    let report = sweep.run_once().await;
    session.save()?;

    println!("\n=== CATCHUP SWEEP ===\n");
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Run the sweep loop until Ctrl-C
pub async fn watch(config: &Config, snapshot: Option<&str>) -> Result<()> {
    if !config.catchup.enabled {
        anyhow::bail!("catchup.enabled is false - nothing to watch");
    }

    let session = Session::open(config, snapshot)?;
    let sweep = CatchupSweep::new(
        config.catchup.clone(),
        session.store.clone(),
        session.onboarder(config),
        config.store.timeout(),
    );

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = tokio::spawn(async move { sweep.start(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutdown requested");
    let _ = shutdown_tx.send(());
    handle.await.context("Sweep task panicked")?;

    session.save()?;
    Ok(())
}

/// Show cluster membership for a wallet
pub async fn lookup(config: &Config, snapshot: Option<&str>, address: &str) -> Result<()> {
    let session = Session::open(config, snapshot)?;
    let info = ClusterService::new(session.store.clone(), config.store.timeout())
        .cluster_info(address)
        .await;

    println!("\n=== CLUSTER LOOKUP: {} ===\n", address);
    match &info.cluster_id {
        Some(id) => {
            println!("Cluster: {}", id);
            println!("Size: {}", info.cluster_size);
            println!("Leader: {}", if info.is_leader { "yes" } else { "no" });
            println!("Amplification: {:.2}x", info.amplification_factor);
        }
        None => println!("Not in a cluster"),
    }
    Ok(())
}

/// Check live cluster activity for a wallet entering a token
pub async fn amplify(
    config: &Config,
    snapshot: Option<&str>,
    address: &str,
    token: &str,
    at: Option<&str>,
) -> Result<()> {
    let at: DateTime<Utc> = match at {
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .with_context(|| format!("Invalid timestamp {}", raw))?
            .with_timezone(&Utc),
        None => Utc::now(),
    };

    let session = Session::open(config, snapshot)?;
    let amplifier = ClusterAmplifier::new(
        config.amplification.clone(),
        session.store.clone(),
        session.store.clone(),
        config.store.timeout(),
    );
    let check = amplifier.check_activity(address, token, at).await;

    println!("\n=== AMPLIFICATION: {} on {} ===\n", address, token);
    println!("{}", serde_json::to_string_pretty(&check)?);
    Ok(())
}

/// Show store statistics and clusters
pub async fn stats(config: &Config, snapshot: Option<&str>) -> Result<()> {
    let session = Session::open(config, snapshot)?;
    let stats = session.store.stats();

    println!("\n=== GRAPH STATS ===\n");
    println!("Wallets: {}", stats.wallets);
    println!("Trades: {}", stats.trades);
    for (kind, count) in &stats.edges_by_kind {
        println!("Edges {}: {}", kind, count);
    }
    println!("Active clusters: {}", stats.active_clusters);
    println!("Clustered wallets: {}", stats.clustered_wallets);
    println!("Largest cluster: {}", stats.largest_cluster);

    let clusters = session.store.clusters();
    if !clusters.is_empty() {
        println!("\n=== CLUSTERS ===\n");
        for cluster in clusters {
            println!(
                "{} size={} strength={:.3} factor={:.2} leader={} status={:?}",
                cluster.id,
                cluster.size(),
                cluster.strength,
                cluster.amplification_factor,
                cluster.leader.as_deref().unwrap_or("-"),
                cluster.status
            );
        }
    }
    Ok(())
}

/// Show effective configuration
pub fn show_config(config: &Config) -> Result<()> {
    println!("{}", config.display());
    Ok(())
}
