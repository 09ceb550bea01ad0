//! Recursive network onboarding
//!
//! Onboarding a profiled wallet walks a fixed sequence of stages:
//!
//! Start -> FundingAnalysis -> SyncAnalysis -> NetworkDiscovery ->
//! Qualification -> Recurse -> ClusterFormation -> LeaderDetection ->
//! Amplification -> Done
//!
//! A wallet already visited in the current run, or beyond the depth limit,
//! is Skipped. A failing stage is logged and counted; later stages still run.

use chrono::{Duration as ChronoDuration, Utc};
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::cluster::{ClusterAmplifier, ClusterGrouper, GroupingOutcome, LeaderIdentifier};
use crate::config::Config;
use crate::detect::{CoOccurrenceAnalyzer, FundingAnalyzer, PairFocus, SyncBuyDetector};
use crate::graph::edges::RelationshipKind;
use crate::graph::store::{bounded, GraphStore, TradeHistory};
use crate::types::{short, TradeEvent, WalletNode, WalletProfiled};

/// Configuration for network onboarding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingConfig {
    /// Recursion depth limit (the seed is depth 0)
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Maximum neighbors considered per wallet
    #[serde(default = "default_max_network_size")]
    pub max_network_size: usize,

    /// Quick score a neighbor needs to qualify
    #[serde(default = "default_min_qualifying_score")]
    pub min_qualifying_score: f64,

    /// Trade count at which the activity part of the quick score saturates
    #[serde(default = "default_quick_score_trade_cap")]
    pub quick_score_trade_cap: u32,

    /// History fetched for wallets without a profiler payload (hours)
    #[serde(default = "default_history_lookback_hours")]
    pub history_lookback_hours: u64,
}

fn default_max_depth() -> u32 {
    1
}
fn default_max_network_size() -> usize {
    20
}
fn default_min_qualifying_score() -> f64 {
    0.4
}
fn default_quick_score_trade_cap() -> u32 {
    20
}
fn default_history_lookback_hours() -> u64 {
    168
}

impl Default for OnboardingConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            max_network_size: default_max_network_size(),
            min_qualifying_score: default_min_qualifying_score(),
            quick_score_trade_cap: default_quick_score_trade_cap(),
            history_lookback_hours: default_history_lookback_hours(),
        }
    }
}

/// Onboarding stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStage {
    Start,
    FundingAnalysis,
    SyncAnalysis,
    NetworkDiscovery,
    Qualification,
    Recurse,
    ClusterFormation,
    LeaderDetection,
    Amplification,
    Done,
    Skipped,
}

/// Terminal status of one onboarding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStatus {
    Done,
    Skipped,
}

/// Edges created per relationship kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EdgeTally {
    pub funded_by: usize,
    pub synced_buy: usize,
    pub co_occurs: usize,
}

impl EdgeTally {
    pub fn total(&self) -> usize {
        self.funded_by + self.synced_buy + self.co_occurs
    }

    pub fn add(&mut self, other: &EdgeTally) {
        self.funded_by += other.funded_by;
        self.synced_buy += other.synced_buy;
        self.co_occurs += other.co_occurs;
    }
}

/// State of one top-level onboarding call
///
/// `visited` holds every wallet claimed by the run (processed or queued for
/// recursion). `analyzed` holds wallets whose pair detection already ran, so
/// later wallets in the run skip pairs with them.
#[derive(Debug, Default)]
pub struct OnboardingRun {
    pub visited: HashSet<String>,
    pub analyzed: HashSet<String>,
    /// (wallet, depth) in processing order
    pub processed: Vec<(String, u32)>,
}

impl OnboardingRun {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Summary of one onboarding
#[derive(Debug, Clone, Serialize)]
pub struct OnboardingResult {
    pub address: String,
    pub status: OnboardingStatus,
    pub depth: u32,
    pub edges_created: EdgeTally,
    pub network_size: usize,
    pub qualified_count: usize,
    pub recursed_count: usize,
    /// A cluster was created or extended with this wallet's candidates
    pub cluster_formed: bool,
    pub cluster_id: Option<String>,
    pub cluster_size: usize,
    pub leader_address: Option<String>,
    pub errors: usize,
    /// Stages reached, in order
    pub stages: Vec<OnboardingStage>,
}

impl OnboardingResult {
    fn new(address: &str, depth: u32) -> Self {
        Self {
            address: address.to_string(),
            status: OnboardingStatus::Done,
            depth,
            edges_created: EdgeTally::default(),
            network_size: 0,
            qualified_count: 0,
            recursed_count: 0,
            cluster_formed: false,
            cluster_id: None,
            cluster_size: 0,
            leader_address: None,
            errors: 0,
            stages: vec![OnboardingStage::Start],
        }
    }

    fn skipped(address: &str, depth: u32) -> Self {
        let mut result = Self::new(address, depth);
        result.status = OnboardingStatus::Skipped;
        result.stages.push(OnboardingStage::Skipped);
        result
    }

    fn enter(&mut self, stage: OnboardingStage) {
        debug!(wallet = %short(&self.address), depth = self.depth, stage = ?stage, "Onboarding stage");
        self.stages.push(stage);
    }
}

/// Cheap qualification score from registry stats (0.0 to 1.0)
///
/// Unknown, inactive and blacklisted wallets score zero.
pub fn quick_score(config: &OnboardingConfig, node: Option<&WalletNode>) -> f64 {
    let node = match node {
        Some(n) if n.is_active() => n,
        _ => return 0.0,
    };
    let activity = if config.quick_score_trade_cap == 0 {
        0.0
    } else {
        (node.trade_count as f64 / config.quick_score_trade_cap as f64).min(1.0)
    };
    (0.6 * node.win_rate.clamp(0.0, 1.0) + 0.4 * activity).clamp(0.0, 1.0)
}

/// Orchestrates detection, grouping and scoring for a wallet and its network
pub struct NetworkOnboarder {
    config: OnboardingConfig,
    store: Arc<dyn GraphStore>,
    history: Arc<dyn TradeHistory>,
    funding: FundingAnalyzer,
    sync: SyncBuyDetector,
    co_occurrence: CoOccurrenceAnalyzer,
    grouper: ClusterGrouper,
    leader: LeaderIdentifier,
    amplifier: ClusterAmplifier,
    timeout: Duration,
}

impl NetworkOnboarder {
    /// Build the onboarder and all detectors from configuration
    pub fn new(config: &Config, store: Arc<dyn GraphStore>, history: Arc<dyn TradeHistory>) -> Self {
        let timeout = config.store.timeout();
        Self {
            config: config.onboarding.clone(),
            funding: FundingAnalyzer::new(config.funding.clone(), store.clone(), timeout),
            sync: SyncBuyDetector::new(config.sync.clone(), store.clone(), timeout),
            co_occurrence: CoOccurrenceAnalyzer::new(config.co_occurrence.clone(), store.clone(), timeout),
            grouper: ClusterGrouper::new(config.cluster.clone(), store.clone(), timeout),
            leader: LeaderIdentifier::new(config.leader.clone(), store.clone(), history.clone(), timeout),
            amplifier: ClusterAmplifier::new(
                config.amplification.clone(),
                store.clone(),
                history.clone(),
                timeout,
            ),
            store,
            history,
            timeout,
        }
    }

    pub fn config(&self) -> &OnboardingConfig {
        &self.config
    }

    /// Onboard a freshly profiled wallet, reusing its fetched history
    pub async fn onboard(&self, event: WalletProfiled) -> OnboardingResult {
        let mut errors = 0;
        if let Err(e) = self.register_wallet(&event).await {
            warn!(wallet = %short(&event.address), error = %e, "Failed to register wallet node");
            errors += 1;
        }

        let mut run = OnboardingRun::new();
        let mut result = self
            .onboard_in_run(event.address, event.trade_history, 0, &mut run)
            .await;
        result.errors += errors;
        result
    }

    /// Onboard a wallet by address, fetching its history first
    pub async fn onboard_address(&self, address: &str) -> OnboardingResult {
        let (history, fetch_failed) = self.fetch_history(address).await;
        let mut run = OnboardingRun::new();
        let mut result = self
            .onboard_in_run(address.to_string(), history, 0, &mut run)
            .await;
        if fetch_failed {
            result.errors += 1;
        }
        result
    }

    /// Onboard within an existing run, sharing its state
    pub async fn onboard_in_run(
        &self,
        address: String,
        history: Vec<TradeEvent>,
        depth: u32,
        run: &mut OnboardingRun,
    ) -> OnboardingResult {
        if depth > self.config.max_depth || !run.visited.insert(address.clone()) {
            debug!(wallet = %short(&address), depth = depth, "Onboarding skipped");
            return OnboardingResult::skipped(&address, depth);
        }
        self.process(address, history, depth, run).await
    }

    async fn register_wallet(&self, event: &WalletProfiled) -> crate::error::Result<()> {
        let existing = bounded(self.timeout, "get_wallet", self.store.get_wallet(&event.address)).await?;
        let mut node = existing.unwrap_or_else(|| WalletNode::new(&event.address));
        if event.score.is_some() {
            node.score = event.score;
        }
        bounded(self.timeout, "upsert_wallet", self.store.upsert_wallet(node)).await
    }

    async fn fetch_history(&self, address: &str) -> (Vec<TradeEvent>, bool) {
        let since = Utc::now() - ChronoDuration::hours(self.config.history_lookback_hours as i64);
        match bounded(self.timeout, "wallet_trades", self.history.wallet_trades(address, since)).await {
            Ok(history) => (history, false),
            Err(e) => {
                warn!(wallet = %short(address), error = %e, transient = e.is_transient(), "Failed to fetch wallet history");
                (Vec::new(), true)
            }
        }
    }

    /// Runs every stage for a wallet already marked visited
    fn process<'a>(
        &'a self,
        address: String,
        history: Vec<TradeEvent>,
        depth: u32,
        run: &'a mut OnboardingRun,
    ) -> BoxFuture<'a, OnboardingResult> {
        async move {
            let mut result = OnboardingResult::new(&address, depth);
            run.processed.push((address.clone(), depth));

            result.enter(OnboardingStage::FundingAnalysis);
            let funding = self.funding.analyze(&address, &history).await;
            result.edges_created.funded_by = funding.edges_created;
            result.errors += funding.errors;

            result.enter(OnboardingStage::SyncAnalysis);
            self.sync_analysis(&address, &history, &run.analyzed, &mut result)
                .await;
            run.analyzed.insert(address.clone());

            result.enter(OnboardingStage::NetworkDiscovery);
            let neighbors = match bounded(
                self.timeout,
                "neighbors",
                self.store
                    .neighbors(&address, &RelationshipKind::ALL, self.config.max_network_size),
            )
            .await
            {
                Ok(n) => n,
                Err(e) => {
                    warn!(wallet = %short(&address), error = %e, "Network discovery failed");
                    result.errors += 1;
                    Vec::new()
                }
            };
            result.network_size = neighbors.len();

            result.enter(OnboardingStage::Qualification);
            let mut qualified = Vec::new();
            for neighbor in neighbors.iter().filter(|n| !run.visited.contains(&n.address)) {
                match bounded(self.timeout, "get_wallet", self.store.get_wallet(&neighbor.address)).await {
                    Ok(node) => {
                        let score = quick_score(&self.config, node.as_ref());
                        if score >= self.config.min_qualifying_score {
                            qualified.push(neighbor.address.clone());
                        }
                    }
                    Err(e) => {
                        warn!(wallet = %short(&neighbor.address), error = %e, "Qualification lookup failed");
                        result.errors += 1;
                    }
                }
            }
            result.qualified_count = qualified.len();

            if depth < self.config.max_depth && !qualified.is_empty() {
                result.enter(OnboardingStage::Recurse);
                for wallet in &qualified {
                    run.visited.insert(wallet.clone());
                }
                for wallet in &qualified {
                    let (child_history, fetch_failed) = self.fetch_history(wallet).await;
                    if fetch_failed {
                        result.errors += 1;
                    }
                    let child = self
                        .process(wallet.clone(), child_history, depth + 1, &mut *run)
                        .await;
                    debug!(
                        parent = %short(&address),
                        wallet = %short(wallet),
                        edges = child.edges_created.total(),
                        errors = child.errors,
                        "Neighbor onboarded"
                    );
                    result.edges_created.add(&child.edges_created);
                    result.errors += child.errors;
                    result.recursed_count += 1;
                }
            }

            result.enter(OnboardingStage::ClusterFormation);
            let mut candidates = Vec::with_capacity(qualified.len() + 1);
            candidates.push(address.clone());
            candidates.extend(qualified);

            let outcome = match self.grouper.form_or_extend(&candidates).await {
                Ok(o) => o,
                Err(e) => {
                    warn!(wallet = %short(&address), error = %e, transient = e.is_transient(), "Cluster formation failed");
                    result.errors += 1;
                    GroupingOutcome::NotFormed {
                        candidates: candidates.len(),
                    }
                }
            };

            if let Some(cluster_id) = outcome.cluster_id().map(str::to_string) {
                result.cluster_formed = outcome.changed_membership();
                result.cluster_size = outcome.size();
                result.cluster_id = Some(cluster_id.clone());

                result.enter(OnboardingStage::LeaderDetection);
                match self.leader.identify(&cluster_id).await {
                    Ok(report) => result.leader_address = report.primary,
                    Err(e) => {
                        warn!(cluster = %cluster_id, error = %e, "Leader detection failed");
                        result.errors += 1;
                    }
                }

                result.enter(OnboardingStage::Amplification);
                if let Err(e) = self.amplifier.recompute(&cluster_id).await {
                    warn!(cluster = %cluster_id, error = %e, "Amplification recompute failed");
                    result.errors += 1;
                }
            }

            result.enter(OnboardingStage::Done);
            info!(
                wallet = %short(&address),
                depth = depth,
                edges = result.edges_created.total(),
                network = result.network_size,
                qualified = result.qualified_count,
                cluster = ?result.cluster_id,
                errors = result.errors,
                "Wallet onboarded"
            );
            result
        }
        .boxed()
    }

    /// Synced-buy and co-occurrence detection over the wallet's bought tokens
    async fn sync_analysis(
        &self,
        address: &str,
        history: &[TradeEvent],
        settled: &HashSet<String>,
        result: &mut OnboardingResult,
    ) {
        let own_buys: Vec<TradeEvent> = history
            .iter()
            .filter(|t| t.is_buy() && t.wallet == address)
            .cloned()
            .collect();
        if own_buys.is_empty() {
            return;
        }

        let tokens: Vec<String> = own_buys
            .iter()
            .map(|b| b.token.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let since = Utc::now() - ChronoDuration::hours(self.config.history_lookback_hours as i64);
        let mut buys = own_buys;
        for token in &tokens {
            match bounded(self.timeout, "token_buys", self.history.token_buys(token, since)).await {
                Ok(peer_buys) => buys.extend(peer_buys.into_iter().filter(|b| b.wallet != address)),
                Err(e) => {
                    warn!(wallet = %short(address), token = %short(token), error = %e, "Failed to fetch token buys");
                    result.errors += 1;
                }
            }
        }

        let focus = PairFocus::in_run(address, settled);
        let sync = self.sync.detect_focused(focus, &buys).await;
        result.edges_created.synced_buy = sync.edges_created;
        result.errors += sync.errors;

        let launches = match bounded(self.timeout, "token_launches", self.history.token_launches(&tokens)).await {
            Ok(l) => l,
            Err(e) => {
                warn!(wallet = %short(address), error = %e, "Failed to fetch launch info");
                result.errors += 1;
                Vec::new()
            }
        };
        if !launches.is_empty() {
            let co = self
                .co_occurrence
                .analyze_focused(focus, &launches, &buys)
                .await;
            result.edges_created.co_occurs = co.edges_created;
            result.errors += co.errors;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::memory::InMemoryGraphStore;
    use crate::graph::testing::FailingStore;
    use crate::error::Error;
    use crate::graph::edges::EdgeKey;
    use crate::types::{TokenLaunchInfo, WalletStatus};
    use chrono::DateTime;

    fn onboarder(store: Arc<InMemoryGraphStore>, config: Config) -> NetworkOnboarder {
        NetworkOnboarder::new(&config, store.clone(), store)
    }

    async fn add_wallet(store: &InMemoryGraphStore, address: &str, trades: u32, win_rate: f64) {
        let mut node = WalletNode::new(address).with_stats(trades, win_rate);
        node.first_seen = Utc::now() - ChronoDuration::hours(3);
        store.upsert_wallet(node).await.unwrap();
    }

    /// S, A and B buy T within two minutes; A and B are strong traders
    async fn seeded_store() -> (Arc<InMemoryGraphStore>, Vec<TradeEvent>) {
        let store = Arc::new(InMemoryGraphStore::new());
        let t0 = Utc::now() - ChronoDuration::hours(1);
        let seed_history = vec![TradeEvent::buy("S", "T", 1.0, t0)];
        store.record_trades(seed_history.clone());
        store.record_trades(vec![
            TradeEvent::buy("A", "T", 1.0, t0 + ChronoDuration::seconds(60)),
            TradeEvent::buy("B", "T", 1.0, t0 + ChronoDuration::seconds(120)),
        ]);
        add_wallet(&store, "A", 20, 0.8).await;
        add_wallet(&store, "B", 20, 0.8).await;
        (store, seed_history)
    }

    fn profiled(address: &str, history: Vec<TradeEvent>) -> WalletProfiled {
        WalletProfiled {
            address: address.to_string(),
            trade_history: history,
            score: Some(0.7),
        }
    }

    #[test]
    fn test_quick_score() {
        let config = OnboardingConfig::default();
        assert_eq!(quick_score(&config, None), 0.0);

        let strong = WalletNode::new("w").with_stats(40, 0.5);
        assert!((quick_score(&config, Some(&strong)) - 0.7).abs() < 1e-9);

        let weak = WalletNode::new("w").with_stats(2, 0.3);
        // 0.18 + 0.04
        assert!((quick_score(&config, Some(&weak)) - 0.22).abs() < 1e-9);

        let mut banned = strong.clone();
        banned.status = WalletStatus::Blacklisted;
        assert_eq!(quick_score(&config, Some(&banned)), 0.0);
    }

    #[tokio::test]
    async fn test_onboard_forms_cluster() {
        let (store, history) = seeded_store().await;
        let o = onboarder(store.clone(), Config::default());

        let result = o.onboard(profiled("S", history)).await;
        assert_eq!(result.status, OnboardingStatus::Done);
        // S-A and S-B from the seed, A-B from the recursed A
        assert_eq!(result.edges_created.synced_buy, 3);
        assert_eq!(result.network_size, 2);
        assert_eq!(result.qualified_count, 2);
        assert_eq!(result.recursed_count, 2);
        assert!(result.cluster_formed);
        assert_eq!(result.cluster_size, 3);
        assert_eq!(result.errors, 0);
        assert_eq!(result.stages.last(), Some(&OnboardingStage::Done));

        let (cluster, _) = store.cluster_of("A").await.unwrap().unwrap();
        assert_eq!(Some(cluster.id), result.cluster_id);
        assert_eq!(store.stats().active_clusters, 1);

        // Seed registered in the graph
        let seed = store.get_wallet("S").await.unwrap().unwrap();
        assert_eq!(seed.score, Some(0.7));
    }

    #[tokio::test]
    async fn test_repeat_onboarding_is_idempotent_for_clusters() {
        let (store, history) = seeded_store().await;
        let o = onboarder(store.clone(), Config::default());

        let first = o.onboard(profiled("S", history.clone())).await;
        let second = o.onboard(profiled("S", history)).await;
        assert_eq!(first.cluster_id, second.cluster_id);
        assert!(first.cluster_formed);
        assert!(!second.cluster_formed);
        assert_eq!(second.cluster_size, 3);
        assert_eq!(second.edges_created.synced_buy, 0);
        assert_eq!(store.stats().edges_by_kind[&RelationshipKind::SyncedBuy], 3);
    }

    #[tokio::test]
    async fn test_skip_when_visited_or_too_deep() {
        let (store, history) = seeded_store().await;
        let o = onboarder(store, Config::default());

        let mut run = OnboardingRun::new();
        run.visited.insert("S".to_string());
        let result = o
            .onboard_in_run("S".to_string(), history.clone(), 0, &mut run)
            .await;
        assert_eq!(result.status, OnboardingStatus::Skipped);
        assert!(run.processed.is_empty());

        let mut fresh = OnboardingRun::new();
        let result = o.onboard_in_run("S".to_string(), history, 2, &mut fresh).await;
        assert_eq!(result.status, OnboardingStatus::Skipped);
        assert_eq!(result.edges_created.total(), 0);
    }

    #[tokio::test]
    async fn test_no_recursion_at_depth_zero_limit() {
        let (store, history) = seeded_store().await;
        let mut config = Config::default();
        config.onboarding.max_depth = 0;
        let o = onboarder(store, config);

        let result = o.onboard(profiled("S", history)).await;
        assert_eq!(result.qualified_count, 2);
        assert_eq!(result.recursed_count, 0);
        assert!(!result.stages.contains(&OnboardingStage::Recurse));
        assert!(result.cluster_formed);
    }

    #[tokio::test]
    async fn test_network_size_cap() {
        let store = Arc::new(InMemoryGraphStore::new());
        let t0 = Utc::now() - ChronoDuration::hours(1);
        let history = vec![TradeEvent::buy("S", "T", 1.0, t0)];
        store.record_trades(history.clone());
        for (i, peer) in ["P1", "P2", "P3", "P4", "P5"].iter().enumerate() {
            store.record_trades(vec![TradeEvent::buy(
                peer,
                "T",
                1.0,
                t0 + ChronoDuration::seconds(10 * (i as i64 + 1)),
            )]);
        }

        let mut config = Config::default();
        config.onboarding.max_network_size = 2;
        let o = onboarder(store, config);

        let result = o.onboard(profiled("S", history)).await;
        assert_eq!(result.edges_created.synced_buy, 5);
        assert_eq!(result.network_size, 2);
        // Unknown peers never qualify
        assert_eq!(result.qualified_count, 0);
        assert!(!result.cluster_formed);
    }

    #[tokio::test]
    async fn test_co_occurrence_during_onboarding() {
        let (store, history) = seeded_store().await;
        let launch = history[0].timestamp - ChronoDuration::seconds(30);
        store.record_launch(TokenLaunchInfo {
            token: "T".to_string(),
            launch_timestamp: launch,
        });
        let o = onboarder(store, Config::default());

        let result = o.onboard(profiled("S", history)).await;
        assert_eq!(result.edges_created.co_occurs, 3);
    }

    #[tokio::test]
    async fn test_single_run_merges_each_observation_once() {
        let (store, history) = seeded_store().await;
        store.record_launch(TokenLaunchInfo {
            token: "T".to_string(),
            launch_timestamp: history[0].timestamp - ChronoDuration::seconds(30),
        });
        let o = onboarder(store.clone(), Config::default());

        let result = o.onboard(profiled("S", history)).await;
        assert_eq!(result.recursed_count, 2);

        for kind in [RelationshipKind::SyncedBuy, RelationshipKind::CoOccurs] {
            for (x, y) in [("S", "A"), ("S", "B"), ("A", "B")] {
                let key = EdgeKey::new(kind, x, y).unwrap();
                let edge = store.get_edge(&key).await.unwrap().expect("edge exists");
                assert_eq!(edge.count(), 1, "{} {}-{}", kind, x, y);
            }
        }
    }

    /// Trade history that fails for selected wallets or tokens
    struct FlakyHistory {
        inner: Arc<InMemoryGraphStore>,
        failing_wallet: Option<&'static str>,
        failing_token: Option<&'static str>,
    }

    #[async_trait::async_trait]
    impl TradeHistory for FlakyHistory {
        async fn wallet_trades(
            &self,
            address: &str,
            since: DateTime<Utc>,
        ) -> crate::error::Result<Vec<TradeEvent>> {
            if self.failing_wallet == Some(address) {
                return Err(Error::Store("history unavailable".to_string()));
            }
            self.inner.wallet_trades(address, since).await
        }

        async fn token_buys(&self, token: &str, since: DateTime<Utc>) -> crate::error::Result<Vec<TradeEvent>> {
            if self.failing_token == Some(token) {
                return Err(Error::Store("history unavailable".to_string()));
            }
            self.inner.token_buys(token, since).await
        }

        async fn buys_for_wallets(
            &self,
            wallets: &[String],
            since: DateTime<Utc>,
        ) -> crate::error::Result<Vec<TradeEvent>> {
            self.inner.buys_for_wallets(wallets, since).await
        }

        async fn token_launches(&self, tokens: &[String]) -> crate::error::Result<Vec<TokenLaunchInfo>> {
            self.inner.token_launches(tokens).await
        }
    }

    #[tokio::test]
    async fn test_recursed_errors_and_edges_reach_the_parent() {
        let (store, history) = seeded_store().await;
        let t0 = history[0].timestamp;
        // Only B trades T2, so only B's analysis asks for it
        store.record_trades(vec![
            TradeEvent::buy("B", "T2", 1.0, t0 + ChronoDuration::seconds(600)),
            TradeEvent::buy("C", "T2", 1.0, t0 + ChronoDuration::seconds(630)),
        ]);
        let flaky = Arc::new(FlakyHistory {
            inner: store.clone(),
            failing_wallet: None,
            failing_token: Some("T2"),
        });
        let o = NetworkOnboarder::new(&Config::default(), store.clone(), flaky);

        let result = o.onboard(profiled("S", history.clone())).await;
        assert_eq!(result.recursed_count, 2);
        assert_eq!(result.errors, 1);
        assert_eq!(result.edges_created.synced_buy, 3);

        // A failed history fetch for a recursed wallet is counted once
        let (store, history) = seeded_store().await;
        let flaky = Arc::new(FlakyHistory {
            inner: store.clone(),
            failing_wallet: Some("A"),
            failing_token: None,
        });
        let o = NetworkOnboarder::new(&Config::default(), store.clone(), flaky);
        let result = o.onboard(profiled("S", history)).await;
        assert_eq!(result.errors, 1);
        assert_eq!(result.recursed_count, 2);
    }

    #[tokio::test]
    async fn test_deep_recursion_over_a_cycle_visits_each_wallet_once() {
        // S, A and B trade T together (a triangle); B and C trade T2
        let (store, history) = seeded_store().await;
        let t0 = history[0].timestamp;
        store.record_trades(vec![
            TradeEvent::buy("B", "T2", 1.0, t0 + ChronoDuration::seconds(600)),
            TradeEvent::buy("C", "T2", 1.0, t0 + ChronoDuration::seconds(630)),
        ]);
        add_wallet(&store, "C", 20, 0.8).await;

        let mut config = Config::default();
        config.onboarding.max_depth = 2;
        let o = onboarder(store.clone(), config);

        let mut run = OnboardingRun::new();
        let result = o.onboard_in_run("S".to_string(), history, 0, &mut run).await;
        assert_eq!(result.status, OnboardingStatus::Done);

        let mut wallets: Vec<&str> = run.processed.iter().map(|(w, _)| w.as_str()).collect();
        wallets.sort_unstable();
        assert_eq!(wallets, vec!["A", "B", "C", "S"]);
        assert!(run.processed.iter().all(|(_, depth)| *depth <= 2));
        assert!(run.processed.contains(&("S".to_string(), 0)));
        assert!(run.processed.contains(&("C".to_string(), 2)));

        let bc = EdgeKey::new(RelationshipKind::SyncedBuy, "B", "C").unwrap();
        assert_eq!(store.get_edge(&bc).await.unwrap().unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_store_outage_never_fails_onboarding() {
        let failing = Arc::new(FailingStore::new());
        let o = NetworkOnboarder::new(&Config::default(), failing.clone(), failing);
        let history = vec![
            TradeEvent::buy("S", "T", 1.0, Utc::now()),
            TradeEvent::transfer("S", "F", "S", 1.0, Utc::now()),
        ];

        let result = o.onboard(profiled("S", history)).await;
        assert_eq!(result.status, OnboardingStatus::Done);
        assert!(result.errors > 0);
        assert!(!result.cluster_formed);

        let by_address = o.onboard_address("S").await;
        assert_eq!(by_address.status, OnboardingStatus::Done);
        assert!(by_address.errors > 0);
    }
}
