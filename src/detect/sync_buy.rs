//! Synced buy detection
//!
//! Finds groups of distinct wallets buying the same token within a short
//! window and records a SYNCED_BUY edge for every pair in the group.
//!
//! Scanning per token is greedy: a window starts at buy `i` and takes every
//! buy within `window_secs` of it. A window with enough distinct wallets is a
//! sync event and scanning resumes after it; otherwise it moves on by one buy.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{secs_between, unordered_pairs, PairFocus};
use crate::graph::edges::{
    capped_ratio, insert_bounded, running_average, EdgeData, EdgeKey, MergeOutcome,
    RelationshipEdge, RelationshipKind, SyncedBuyEdge, WalletPair,
};
use crate::graph::store::{bounded, GraphStore};
use crate::types::{short, TradeEvent};

/// Configuration for synced buy detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncDetectionConfig {
    /// Maximum distance from the first buy of a window (seconds)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,

    /// Minimum distinct wallets in a window to count as a sync event
    #[serde(default = "default_min_participants")]
    pub min_participants: usize,

    /// Only buys newer than this are scanned
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u64,

    /// Post-merge sync count at which a pair is reported as high-frequency
    #[serde(default = "default_high_frequency_threshold")]
    pub high_frequency_threshold: u32,

    /// Maximum tokens remembered per edge
    #[serde(default = "default_max_tokens_per_edge")]
    pub max_tokens_per_edge: usize,

    /// Sync count at which the count component of strength saturates
    #[serde(default = "default_strength_count_cap")]
    pub strength_count_cap: u32,

    /// Distinct token count at which the token component saturates
    #[serde(default = "default_strength_token_cap")]
    pub strength_token_cap: usize,
}

fn default_window_secs() -> u64 {
    300
}
fn default_min_participants() -> usize {
    2
}
fn default_lookback_hours() -> u64 {
    24
}
fn default_high_frequency_threshold() -> u32 {
    5
}
fn default_max_tokens_per_edge() -> usize {
    50
}
fn default_strength_count_cap() -> u32 {
    10
}
fn default_strength_token_cap() -> usize {
    5
}

impl Default for SyncDetectionConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            min_participants: default_min_participants(),
            lookback_hours: default_lookback_hours(),
            high_frequency_threshold: default_high_frequency_threshold(),
            max_tokens_per_edge: default_max_tokens_per_edge(),
            strength_count_cap: default_strength_count_cap(),
            strength_token_cap: default_strength_token_cap(),
        }
    }
}

/// A detected sync event (transient)
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub token: String,
    /// First buy of each participating wallet, in time order
    pub buys: Vec<TradeEvent>,
    pub wallets: Vec<String>,
}

/// Outcome of one detection run
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncDetectionReport {
    pub tokens_scanned: usize,
    pub sync_events: usize,
    pub edges_created: usize,
    pub edges_updated: usize,
    /// Distinct pairs whose sync count reached the high-frequency threshold
    pub high_frequency_pairs: usize,
    pub errors: usize,
}

/// One pair observation to fold into a SYNCED_BUY edge
struct SyncObservation {
    token: String,
    delta_secs: f64,
    first_at: DateTime<Utc>,
    last_at: DateTime<Utc>,
    volume: f64,
}

/// Strength of a synced-buy edge (0.0 to 1.0)
pub fn synced_buy_strength(edge: &SyncedBuyEdge, config: &SyncDetectionConfig) -> f64 {
    let count = capped_ratio(edge.sync_count as f64, config.strength_count_cap as f64);
    let tightness = if config.window_secs == 0 {
        0.0
    } else {
        (1.0 - edge.avg_delta_secs / config.window_secs as f64).max(0.0)
    };
    let breadth = capped_ratio(edge.tokens.len() as f64, config.strength_token_cap as f64);

    (0.5 * count + 0.3 * tightness + 0.2 * breadth).clamp(0.0, 1.0)
}

fn merge_synced_buy(
    existing: Option<RelationshipEdge>,
    pair: WalletPair,
    obs: &SyncObservation,
    config: &SyncDetectionConfig,
) -> RelationshipEdge {
    if let Some(mut edge) = existing {
        if let EdgeData::SyncedBuy(e) = &mut edge.data {
            e.sync_count += 1;
            insert_bounded(&mut e.tokens, &obs.token, config.max_tokens_per_edge);
            e.avg_delta_secs = running_average(e.avg_delta_secs, e.sync_count, obs.delta_secs);
            e.first_sync_at = e.first_sync_at.min(obs.first_at);
            e.last_sync_at = e.last_sync_at.max(obs.last_at);
            e.total_volume += obs.volume;
            e.strength = synced_buy_strength(e, config);
            edge.updated_at = Utc::now();
            return edge;
        }
    }

    let mut tokens = BTreeSet::new();
    insert_bounded(&mut tokens, &obs.token, config.max_tokens_per_edge);
    let mut data = SyncedBuyEdge {
        sync_count: 1,
        tokens,
        avg_delta_secs: obs.delta_secs,
        first_sync_at: obs.first_at,
        last_sync_at: obs.last_at,
        total_volume: obs.volume,
        strength: 0.0,
    };
    data.strength = synced_buy_strength(&data, config);
    RelationshipEdge::new(pair, EdgeData::SyncedBuy(data))
}

/// Synced buy detector
pub struct SyncBuyDetector {
    config: SyncDetectionConfig,
    store: Arc<dyn GraphStore>,
    timeout: Duration,
}

impl SyncBuyDetector {
    pub fn new(config: SyncDetectionConfig, store: Arc<dyn GraphStore>, timeout: Duration) -> Self {
        Self {
            config,
            store,
            timeout,
        }
    }

    pub fn config(&self) -> &SyncDetectionConfig {
        &self.config
    }

    /// Find sync events among buys newer than the lookback
    pub fn find_sync_events(&self, buys: &[TradeEvent], now: DateTime<Utc>) -> Vec<SyncEvent> {
        let cutoff = now - ChronoDuration::hours(self.config.lookback_hours as i64);

        let mut by_token: BTreeMap<&str, Vec<&TradeEvent>> = BTreeMap::new();
        for buy in buys.iter().filter(|b| b.is_buy() && b.timestamp >= cutoff) {
            by_token.entry(buy.token.as_str()).or_default().push(buy);
        }

        let mut events = Vec::new();
        for (token, mut token_buys) in by_token {
            token_buys.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.wallet.cmp(&b.wallet)));
            events.extend(self.scan_token(token, &token_buys));
        }
        events
    }

    fn scan_token(&self, token: &str, sorted: &[&TradeEvent]) -> Vec<SyncEvent> {
        let window = self.config.window_secs as f64;
        let mut events = Vec::new();
        let mut i = 0;

        while i < sorted.len() {
            let start = sorted[i].timestamp;
            let mut end = i;
            while end < sorted.len() && secs_between(sorted[end].timestamp, start) <= window {
                end += 1;
            }

            let mut seen = HashSet::new();
            let firsts: Vec<TradeEvent> = sorted[i..end]
                .iter()
                .filter(|b| seen.insert(b.wallet.as_str()))
                .map(|b| (*b).clone())
                .collect();

            if firsts.len() >= self.config.min_participants.max(2) {
                debug!(
                    token = %short(token),
                    wallets = firsts.len(),
                    "Sync event detected"
                );
                events.push(SyncEvent {
                    token: token.to_string(),
                    wallets: firsts.iter().map(|b| b.wallet.clone()).collect(),
                    buys: firsts,
                });
                i = end;
            } else {
                i += 1;
            }
        }
        events
    }

    /// Detect sync events and merge edges for every participating pair
    pub async fn detect(&self, buys: &[TradeEvent]) -> SyncDetectionReport {
        self.detect_at(buys, None, Utc::now()).await
    }

    /// Detect sync events, merging only pairs that include `wallet`
    pub async fn detect_for_wallet(&self, wallet: &str, buys: &[TradeEvent]) -> SyncDetectionReport {
        self.detect_at(buys, Some(PairFocus::wallet(wallet)), Utc::now()).await
    }

    /// Like [`detect_for_wallet`](Self::detect_for_wallet), skipping pairs with `focus.settled` peers
    pub async fn detect_focused(&self, focus: PairFocus<'_>, buys: &[TradeEvent]) -> SyncDetectionReport {
        self.detect_at(buys, Some(focus), Utc::now()).await
    }

    async fn detect_at(
        &self,
        buys: &[TradeEvent],
        focus: Option<PairFocus<'_>>,
        now: DateTime<Utc>,
    ) -> SyncDetectionReport {
        let mut report = SyncDetectionReport::default();
        report.tokens_scanned = buys
            .iter()
            .filter(|b| b.is_buy())
            .map(|b| b.token.as_str())
            .collect::<HashSet<_>>()
            .len();

        let events = self.find_sync_events(buys, now);
        let mut high_frequency: HashSet<WalletPair> = HashSet::new();

        for event in &events {
            if let Some(focus) = &focus {
                if !event.wallets.iter().any(|w| w == focus.wallet) {
                    continue;
                }
            }
            report.sync_events += 1;

            for (a, b) in unordered_pairs(&event.buys) {
                if let Some(focus) = &focus {
                    if !focus.accepts(&a.wallet, &b.wallet) {
                        continue;
                    }
                }
                self.merge_pair(&event.token, a, b, &mut report, &mut high_frequency)
                    .await;
            }
        }

        report.high_frequency_pairs = high_frequency.len();
        if report.sync_events > 0 {
            info!(
                events = report.sync_events,
                created = report.edges_created,
                updated = report.edges_updated,
                high_frequency = report.high_frequency_pairs,
                "Synced buy detection complete"
            );
        }
        report
    }

    async fn merge_pair(
        &self,
        token: &str,
        a: &TradeEvent,
        b: &TradeEvent,
        report: &mut SyncDetectionReport,
        high_frequency: &mut HashSet<WalletPair>,
    ) {
        let key = match EdgeKey::new(RelationshipKind::SyncedBuy, &a.wallet, &b.wallet) {
            Ok(k) => k,
            Err(e) => {
                warn!(error = %e, "Skipping synced buy pair");
                report.errors += 1;
                return;
            }
        };

        let obs = SyncObservation {
            token: token.to_string(),
            delta_secs: secs_between(a.timestamp, b.timestamp),
            first_at: a.timestamp.min(b.timestamp),
            last_at: a.timestamp.max(b.timestamp),
            volume: a.amount + b.amount,
        };
        let pair = key.pair.clone();
        let config = &self.config;

        let merged = bounded(
            self.timeout,
            "merge_synced_buy",
            self.store.merge_edge(
                key,
                Box::new(move |existing| merge_synced_buy(existing, pair, &obs, config)),
            ),
        )
        .await;

        match merged {
            Ok((edge, outcome)) => {
                match outcome {
                    MergeOutcome::Created => report.edges_created += 1,
                    MergeOutcome::Updated => report.edges_updated += 1,
                }
                if edge.count() >= self.config.high_frequency_threshold {
                    high_frequency.insert(edge.pair.clone());
                }
            }
            Err(e) => {
                warn!(
                    wallet_a = %short(&a.wallet),
                    wallet_b = %short(&b.wallet),
                    token = %short(token),
                    error = %e,
                    "Failed to merge synced buy edge"
                );
                report.errors += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::memory::InMemoryGraphStore;
    use crate::graph::testing::FailingStore;

    fn detector(store: Arc<dyn GraphStore>) -> SyncBuyDetector {
        SyncBuyDetector::new(
            SyncDetectionConfig::default(),
            store,
            Duration::from_millis(500),
        )
    }

    fn base() -> DateTime<Utc> {
        Utc::now() - ChronoDuration::hours(1)
    }

    fn buy(wallet: &str, token: &str, offset_secs: i64) -> TradeEvent {
        TradeEvent::buy(wallet, token, 1.0, base() + ChronoDuration::seconds(offset_secs))
    }

    fn scenario_buys() -> Vec<TradeEvent> {
        vec![buy("A", "T", 0), buy("B", "T", 60), buy("C", "T", 120)]
    }

    async fn synced_edge(store: &InMemoryGraphStore, x: &str, y: &str) -> RelationshipEdge {
        let key = EdgeKey::new(RelationshipKind::SyncedBuy, x, y).unwrap();
        store.get_edge(&key).await.unwrap().expect("edge exists")
    }

    #[test]
    fn test_single_window_event() {
        let d = detector(Arc::new(InMemoryGraphStore::new()));
        let events = d.find_sync_events(&scenario_buys(), Utc::now());
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].wallets, vec!["A", "B", "C"]);
    }

    #[test]
    fn test_scan_resumes_after_event() {
        let d = detector(Arc::new(InMemoryGraphStore::new()));
        let buys = vec![
            buy("A", "T", 0),
            buy("B", "T", 100),
            buy("C", "T", 400),
            buy("D", "T", 450),
        ];
        let events = d.find_sync_events(&buys, Utc::now());
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].wallets, vec!["C", "D"]);
    }

    #[test]
    fn test_same_wallet_repeats_are_not_a_sync() {
        let d = detector(Arc::new(InMemoryGraphStore::new()));
        let buys = vec![buy("A", "T", 0), buy("A", "T", 10), buy("B", "T", 400)];
        assert!(d.find_sync_events(&buys, Utc::now()).is_empty());
    }

    #[test]
    fn test_window_boundary_inclusive() {
        let d = detector(Arc::new(InMemoryGraphStore::new()));
        let inside = vec![buy("A", "T", 0), buy("B", "T", 300)];
        assert_eq!(d.find_sync_events(&inside, Utc::now()).len(), 1);

        let outside = vec![buy("A", "T", 0), buy("B", "T", 301)];
        assert!(d.find_sync_events(&outside, Utc::now()).is_empty());
    }

    #[test]
    fn test_lookback_excludes_old_buys() {
        let d = detector(Arc::new(InMemoryGraphStore::new()));
        let old = Utc::now() - ChronoDuration::hours(48);
        let buys = vec![
            TradeEvent::buy("A", "T", 1.0, old),
            TradeEvent::buy("B", "T", 1.0, old + ChronoDuration::seconds(5)),
        ];
        assert!(d.find_sync_events(&buys, Utc::now()).is_empty());
    }

    #[tokio::test]
    async fn test_detect_creates_pair_edges() {
        let store = Arc::new(InMemoryGraphStore::new());
        let d = detector(store.clone());

        let report = d.detect(&scenario_buys()).await;
        assert_eq!(report.sync_events, 1);
        assert_eq!(report.edges_created, 3);
        assert_eq!(report.errors, 0);

        let ab = synced_edge(&store, "A", "B").await;
        let ac = synced_edge(&store, "A", "C").await;
        let bc = synced_edge(&store, "B", "C").await;
        assert_eq!(ab.count(), 1);
        assert_eq!(ab.as_synced_buy().unwrap().avg_delta_secs, 60.0);
        assert_eq!(ac.as_synced_buy().unwrap().avg_delta_secs, 120.0);
        assert_eq!(bc.as_synced_buy().unwrap().avg_delta_secs, 60.0);
        assert!(ab.as_synced_buy().unwrap().tokens.contains("T"));
        assert_eq!(ab.as_synced_buy().unwrap().total_volume, 2.0);
    }

    #[tokio::test]
    async fn test_replay_increments_without_duplicates() {
        let store = Arc::new(InMemoryGraphStore::new());
        let d = detector(store.clone());

        d.detect(&scenario_buys()).await;
        let report = d.detect(&scenario_buys()).await;
        assert_eq!(report.edges_created, 0);
        assert_eq!(report.edges_updated, 3);

        assert_eq!(synced_edge(&store, "A", "B").await.count(), 2);
        assert_eq!(store.stats().edges_by_kind[&RelationshipKind::SyncedBuy], 3);
    }

    #[tokio::test]
    async fn test_high_frequency_pairs() {
        let store = Arc::new(InMemoryGraphStore::new());
        let d = detector(store.clone());

        let mut last = SyncDetectionReport::default();
        for _ in 0..5 {
            last = d.detect(&scenario_buys()).await;
        }
        assert_eq!(last.high_frequency_pairs, 3);
    }

    #[tokio::test]
    async fn test_detect_for_wallet_only_touches_its_pairs() {
        let store = Arc::new(InMemoryGraphStore::new());
        let d = detector(store.clone());

        let report = d.detect_for_wallet("A", &scenario_buys()).await;
        assert_eq!(report.edges_created, 2);

        let bc = EdgeKey::new(RelationshipKind::SyncedBuy, "B", "C").unwrap();
        assert!(store.get_edge(&bc).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_settled_peers_are_not_merged_again() {
        let store = Arc::new(InMemoryGraphStore::new());
        let d = detector(store.clone());

        d.detect_for_wallet("A", &scenario_buys()).await;
        let settled = HashSet::from(["A".to_string()]);
        let report = d.detect_focused(PairFocus::in_run("B", &settled), &scenario_buys()).await;
        assert_eq!(report.edges_created, 1);
        assert_eq!(report.edges_updated, 0);

        assert_eq!(synced_edge(&store, "A", "B").await.count(), 1);
        assert_eq!(synced_edge(&store, "B", "C").await.count(), 1);
    }

    #[test]
    fn test_strength_formula() {
        let config = SyncDetectionConfig::default();
        let now = Utc::now();
        let edge = SyncedBuyEdge {
            sync_count: 1,
            tokens: BTreeSet::from(["T".to_string()]),
            avg_delta_secs: 60.0,
            first_sync_at: now,
            last_sync_at: now,
            total_volume: 2.0,
            strength: 0.0,
        };
        // 0.5 * 0.1 + 0.3 * 0.8 + 0.2 * 0.2
        assert!((synced_buy_strength(&edge, &config) - 0.33).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_store_failures_are_counted() {
        let d = detector(Arc::new(FailingStore::new()));
        let report = d.detect(&scenario_buys()).await;
        assert_eq!(report.sync_events, 1);
        assert_eq!(report.errors, 3);
        assert_eq!(report.edges_created, 0);
    }
}
