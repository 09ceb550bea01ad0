//! Catchup sweep
//!
//! Periodically onboards wallets that were profiled but never clustered,
//! e.g. because onboarding failed or their peers arrived later.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use super::onboarder::{NetworkOnboarder, OnboardingResult, OnboardingStatus};
use crate::graph::store::{bounded, GraphStore};

/// Configuration for the catchup sweep
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatchupConfig {
    /// Run the periodic sweep
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Seconds between sweeps
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Maximum wallets onboarded per sweep
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Wallets younger than this are left to regular onboarding
    #[serde(default = "default_min_wallet_age_secs")]
    pub min_wallet_age_secs: u64,

    /// Concurrent onboardings per sweep
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

fn default_enabled() -> bool {
    true
}
fn default_interval_secs() -> u64 {
    300
}
fn default_batch_size() -> usize {
    50
}
fn default_min_wallet_age_secs() -> u64 {
    3600
}
fn default_concurrency() -> usize {
    4
}

impl Default for CatchupConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_secs: default_interval_secs(),
            batch_size: default_batch_size(),
            min_wallet_age_secs: default_min_wallet_age_secs(),
            concurrency: default_concurrency(),
        }
    }
}

/// Outcome of one sweep
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepReport {
    pub candidates: usize,
    pub onboarded: usize,
    pub clusters_formed: usize,
    pub edges_created: usize,
    pub errors: usize,
}

impl SweepReport {
    fn absorb(&mut self, result: &OnboardingResult) {
        if result.status == OnboardingStatus::Done {
            self.onboarded += 1;
        }
        if result.cluster_formed {
            self.clusters_formed += 1;
        }
        self.edges_created += result.edges_created.total();
        self.errors += result.errors;
    }
}

/// Sweeps unclustered wallets through the onboarder
pub struct CatchupSweep {
    config: CatchupConfig,
    store: Arc<dyn GraphStore>,
    onboarder: Arc<NetworkOnboarder>,
    timeout: Duration,
}

impl CatchupSweep {
    pub fn new(
        config: CatchupConfig,
        store: Arc<dyn GraphStore>,
        onboarder: Arc<NetworkOnboarder>,
        timeout: Duration,
    ) -> Self {
        Self {
            config,
            store,
            onboarder,
            timeout,
        }
    }

    /// One sweep pass. Never fails; problems are counted in the report.
    pub async fn run_once(&self) -> SweepReport {
        self.run_once_at(Utc::now()).await
    }

    async fn run_once_at(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let min_age = ChronoDuration::seconds(self.config.min_wallet_age_secs as i64);

        let candidates = match bounded(
            self.timeout,
            "unclustered_wallets",
            self.store
                .unclustered_wallets(min_age, now, self.config.batch_size),
        )
        .await
        {
            Ok(c) => c,
            Err(e) => {
                error!(error = %e, "Catchup sweep could not list candidates");
                report.errors += 1;
                return report;
            }
        };
        report.candidates = candidates.len();

        if candidates.is_empty() {
            debug!("Catchup sweep found no unclustered wallets");
            return report;
        }

        let results: Vec<OnboardingResult> = stream::iter(candidates)
            .map(|wallet| {
                let onboarder = self.onboarder.clone();
                async move { onboarder.onboard_address(&wallet.address).await }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect()
            .await;

        for result in &results {
            report.absorb(result);
        }

        info!(
            candidates = report.candidates,
            onboarded = report.onboarded,
            clusters = report.clusters_formed,
            edges = report.edges_created,
            errors = report.errors,
            "Catchup sweep complete"
        );
        report
    }

    /// Run sweeps on an interval until shutdown
    pub async fn start(&self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            info!("Catchup sweep disabled");
            return;
        }

        info!(
            "Starting catchup sweep (every {}s, batch {}, concurrency {})",
            self.config.interval_secs, self.config.batch_size, self.config.concurrency
        );

        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_once().await;
                }
                _ = shutdown.recv() => {
                    info!("Catchup sweep shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::graph::memory::InMemoryGraphStore;
    use crate::graph::testing::FailingStore;
    use crate::types::{TradeEvent, WalletNode};

    async fn seeded_store() -> Arc<InMemoryGraphStore> {
        let store = Arc::new(InMemoryGraphStore::new());
        let t0 = Utc::now() - ChronoDuration::hours(1);
        for (i, wallet) in ["A", "B", "C"].iter().enumerate() {
            let mut node = WalletNode::new(wallet).with_stats(20, 0.8);
            node.first_seen = Utc::now() - ChronoDuration::hours(2);
            store.upsert_wallet(node).await.unwrap();
            store.record_trades(vec![TradeEvent::buy(
                wallet,
                "T",
                1.0,
                t0 + ChronoDuration::seconds(30 * i as i64),
            )]);
        }
        // Too young for the sweep
        store.upsert_wallet(WalletNode::new("fresh")).await.unwrap();
        store
    }

    fn sweep(store: Arc<InMemoryGraphStore>, config: CatchupConfig) -> CatchupSweep {
        let onboarder = Arc::new(NetworkOnboarder::new(
            &Config::default(),
            store.clone(),
            store.clone(),
        ));
        CatchupSweep::new(config, store, onboarder, Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_sweep_clusters_orphans_once() {
        let store = seeded_store().await;
        let s = sweep(store.clone(), CatchupConfig::default());

        let report = s.run_once().await;
        assert_eq!(report.candidates, 3);
        assert_eq!(report.onboarded, 3);
        assert!(report.clusters_formed >= 1);
        assert_eq!(report.errors, 0);
        assert_eq!(store.stats().active_clusters, 1);
        assert_eq!(store.stats().clustered_wallets, 3);

        let again = s.run_once().await;
        assert_eq!(again.candidates, 0);
    }

    #[tokio::test]
    async fn test_batch_size_limits_candidates() {
        let store = seeded_store().await;
        let config = CatchupConfig {
            batch_size: 1,
            ..CatchupConfig::default()
        };
        let report = sweep(store, config).run_once().await;
        assert_eq!(report.candidates, 1);
    }

    #[tokio::test]
    async fn test_listing_failure_is_reported() {
        let failing = Arc::new(FailingStore::new());
        let onboarder = Arc::new(NetworkOnboarder::new(
            &Config::default(),
            failing.clone(),
            failing.clone(),
        ));
        let s = CatchupSweep::new(
            CatchupConfig::default(),
            failing,
            onboarder,
            Duration::from_millis(100),
        );
        let report = s.run_once().await;
        assert_eq!(report.candidates, 0);
        assert_eq!(report.errors, 1);
    }

    #[tokio::test]
    async fn test_start_stops_on_shutdown() {
        let store = seeded_store().await;
        let s = sweep(store.clone(), CatchupConfig::default());
        let (tx, rx) = broadcast::channel(1);

        let handle = tokio::spawn(async move { s.start(rx).await });
        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("sweep loop exits")
            .unwrap();
        // The first tick fires immediately
        assert_eq!(store.stats().active_clusters, 1);
    }
}
