//! Early co-entry analysis
//!
//! Wallets that keep showing up together in the first minutes of token
//! launches get a CO_OCCURS edge. Only a wallet's first buy on a token is its
//! entry; an entry counts as early when it falls inside the inclusive window
//! `[launch, launch + early_window_secs]`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{secs_between, unordered_pairs, PairFocus};
use crate::graph::edges::{
    capped_ratio, insert_bounded, running_average, CoOccurrenceFlag, CoOccursEdge, EdgeData,
    EdgeKey, MergeOutcome, RelationshipEdge, RelationshipKind, WalletPair,
};
use crate::graph::store::{bounded, GraphStore};
use crate::types::{short, TokenLaunchInfo, TradeEvent};

/// Configuration for co-occurrence analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoOccurrenceConfig {
    /// Early-entry window after launch (seconds, inclusive)
    #[serde(default = "default_early_window_secs")]
    pub early_window_secs: u64,

    /// Minimum early entrants for a token to be analyzed
    #[serde(default = "default_min_participants")]
    pub min_participants: usize,

    /// Maximum shared tokens remembered per edge
    #[serde(default = "default_max_shared_tokens")]
    pub max_shared_tokens: usize,

    #[serde(default = "default_count_weight")]
    pub count_weight: f64,

    #[serde(default = "default_recency_weight")]
    pub recency_weight: f64,

    #[serde(default = "default_consistency_weight")]
    pub consistency_weight: f64,

    /// Count at which the count component saturates
    #[serde(default = "default_count_cap")]
    pub count_cap: u32,

    /// Days after which the recency component reaches zero
    #[serde(default = "default_recency_decay_days")]
    pub recency_decay_days: f64,

    #[serde(default = "default_high_threshold")]
    pub high_threshold: u32,

    #[serde(default = "default_very_high_threshold")]
    pub very_high_threshold: u32,
}

fn default_early_window_secs() -> u64 {
    600
}
fn default_min_participants() -> usize {
    2
}
fn default_max_shared_tokens() -> usize {
    50
}
fn default_count_weight() -> f64 {
    0.4
}
fn default_recency_weight() -> f64 {
    0.3
}
fn default_consistency_weight() -> f64 {
    0.3
}
fn default_count_cap() -> u32 {
    10
}
fn default_recency_decay_days() -> f64 {
    30.0
}
fn default_high_threshold() -> u32 {
    5
}
fn default_very_high_threshold() -> u32 {
    10
}

impl Default for CoOccurrenceConfig {
    fn default() -> Self {
        Self {
            early_window_secs: default_early_window_secs(),
            min_participants: default_min_participants(),
            max_shared_tokens: default_max_shared_tokens(),
            count_weight: default_count_weight(),
            recency_weight: default_recency_weight(),
            consistency_weight: default_consistency_weight(),
            count_cap: default_count_cap(),
            recency_decay_days: default_recency_decay_days(),
            high_threshold: default_high_threshold(),
            very_high_threshold: default_very_high_threshold(),
        }
    }
}

/// A wallet's early entry on a token (transient)
#[derive(Debug, Clone, PartialEq)]
pub struct EarlyEntry {
    pub wallet: String,
    pub token: String,
    /// Seconds after launch
    pub entry_delta_secs: f64,
    pub entered_at: DateTime<Utc>,
}

/// Outcome of one analysis run
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoOccurrenceReport {
    pub tokens_analyzed: usize,
    /// Tokens with too few early entrants
    pub tokens_skipped: usize,
    pub pairs_observed: usize,
    pub edges_created: usize,
    pub edges_updated: usize,
    pub errors: usize,
}

struct CoEntryObservation {
    token: String,
    delta_secs: f64,
    seen_at: DateTime<Utc>,
}

/// Strength of a co-occurrence edge (0.0 to 1.0)
pub fn co_occurs_strength(edge: &CoOccursEdge, config: &CoOccurrenceConfig, now: DateTime<Utc>) -> f64 {
    let count = capped_ratio(edge.count.min(config.count_cap) as f64, config.count_cap as f64);

    let recency = if config.recency_decay_days > 0.0 {
        let days_since = (now - edge.last_seen_at).num_seconds().max(0) as f64 / 86_400.0;
        (1.0 - days_since / config.recency_decay_days).max(0.0)
    } else {
        0.0
    };

    let consistency = if config.early_window_secs > 0 {
        (1.0 - edge.avg_entry_delta_secs / config.early_window_secs as f64).max(0.0)
    } else {
        0.0
    };

    (config.count_weight * count
        + config.recency_weight * recency
        + config.consistency_weight * consistency)
        .clamp(0.0, 1.0)
}

fn merge_co_occurs(
    existing: Option<RelationshipEdge>,
    pair: WalletPair,
    obs: &CoEntryObservation,
    config: &CoOccurrenceConfig,
) -> RelationshipEdge {
    let now = Utc::now();

    if let Some(mut edge) = existing {
        if let EdgeData::CoOccurs(e) = &mut edge.data {
            e.count += 1;
            insert_bounded(&mut e.shared_tokens, &obs.token, config.max_shared_tokens);
            e.avg_entry_delta_secs = running_average(e.avg_entry_delta_secs, e.count, obs.delta_secs);
            e.first_seen_at = e.first_seen_at.min(obs.seen_at);
            e.last_seen_at = e.last_seen_at.max(obs.seen_at);
            e.flag = CoOccurrenceFlag::from_count(
                e.count,
                config.high_threshold,
                config.very_high_threshold,
            );
            e.strength = co_occurs_strength(e, config, now);
            edge.updated_at = now;
            return edge;
        }
    }

    let mut shared_tokens = BTreeSet::new();
    insert_bounded(&mut shared_tokens, &obs.token, config.max_shared_tokens);
    let mut data = CoOccursEdge {
        count: 1,
        shared_tokens,
        flag: CoOccurrenceFlag::from_count(1, config.high_threshold, config.very_high_threshold),
        avg_entry_delta_secs: obs.delta_secs,
        first_seen_at: obs.seen_at,
        last_seen_at: obs.seen_at,
        strength: 0.0,
    };
    data.strength = co_occurs_strength(&data, config, now);
    RelationshipEdge::new(pair, EdgeData::CoOccurs(data))
}

/// Co-occurrence analyzer
pub struct CoOccurrenceAnalyzer {
    config: CoOccurrenceConfig,
    store: Arc<dyn GraphStore>,
    timeout: Duration,
}

impl CoOccurrenceAnalyzer {
    pub fn new(config: CoOccurrenceConfig, store: Arc<dyn GraphStore>, timeout: Duration) -> Self {
        Self {
            config,
            store,
            timeout,
        }
    }

    pub fn config(&self) -> &CoOccurrenceConfig {
        &self.config
    }

    /// Early entries on one token, in entry order
    pub fn early_entries(&self, launch: &TokenLaunchInfo, buys: &[TradeEvent]) -> Vec<EarlyEntry> {
        let mut token_buys: Vec<&TradeEvent> = buys
            .iter()
            .filter(|b| b.is_buy() && b.token == launch.token)
            .collect();
        token_buys.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.wallet.cmp(&b.wallet)));

        let window = self.config.early_window_secs as f64;
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for buy in token_buys {
            // Only the first buy is the entry
            if !seen.insert(buy.wallet.as_str()) {
                continue;
            }
            if buy.timestamp < launch.launch_timestamp {
                continue;
            }
            let delta = secs_between(buy.timestamp, launch.launch_timestamp);
            if delta <= window {
                entries.push(EarlyEntry {
                    wallet: buy.wallet.clone(),
                    token: launch.token.clone(),
                    entry_delta_secs: delta,
                    entered_at: buy.timestamp,
                });
            }
        }
        entries
    }

    /// Analyze all launched tokens and merge edges for every early pair
    pub async fn analyze(&self, launches: &[TokenLaunchInfo], buys: &[TradeEvent]) -> CoOccurrenceReport {
        self.analyze_inner(launches, buys, None).await
    }

    /// Analyze, merging only pairs that include `wallet`
    pub async fn analyze_for_wallet(
        &self,
        wallet: &str,
        launches: &[TokenLaunchInfo],
        buys: &[TradeEvent],
    ) -> CoOccurrenceReport {
        self.analyze_inner(launches, buys, Some(PairFocus::wallet(wallet))).await
    }

    /// Like [`analyze_for_wallet`](Self::analyze_for_wallet), skipping pairs with `focus.settled` peers
    pub async fn analyze_focused(
        &self,
        focus: PairFocus<'_>,
        launches: &[TokenLaunchInfo],
        buys: &[TradeEvent],
    ) -> CoOccurrenceReport {
        self.analyze_inner(launches, buys, Some(focus)).await
    }

    async fn analyze_inner(
        &self,
        launches: &[TokenLaunchInfo],
        buys: &[TradeEvent],
        focus: Option<PairFocus<'_>>,
    ) -> CoOccurrenceReport {
        let mut report = CoOccurrenceReport::default();

        let mut by_token: HashMap<&str, Vec<TradeEvent>> = HashMap::new();
        for buy in buys.iter().filter(|b| b.is_buy()) {
            by_token.entry(buy.token.as_str()).or_default().push(buy.clone());
        }

        for launch in launches {
            let token_buys = match by_token.get(launch.token.as_str()) {
                Some(b) => b,
                None => {
                    report.tokens_skipped += 1;
                    continue;
                }
            };

            let entries = self.early_entries(launch, token_buys);
            if entries.len() < self.config.min_participants.max(2) {
                debug!(
                    token = %short(&launch.token),
                    early = entries.len(),
                    "Not enough early entrants"
                );
                report.tokens_skipped += 1;
                continue;
            }
            if let Some(focus) = &focus {
                if !entries.iter().any(|e| e.wallet == focus.wallet) {
                    report.tokens_skipped += 1;
                    continue;
                }
            }
            report.tokens_analyzed += 1;

            for (a, b) in unordered_pairs(&entries) {
                if let Some(focus) = &focus {
                    if !focus.accepts(&a.wallet, &b.wallet) {
                        continue;
                    }
                }
                report.pairs_observed += 1;
                self.merge_pair(a, b, &mut report).await;
            }
        }

        if report.tokens_analyzed > 0 {
            info!(
                tokens = report.tokens_analyzed,
                skipped = report.tokens_skipped,
                created = report.edges_created,
                updated = report.edges_updated,
                "Co-occurrence analysis complete"
            );
        }
        report
    }

    async fn merge_pair(&self, a: &EarlyEntry, b: &EarlyEntry, report: &mut CoOccurrenceReport) {
        let key = match EdgeKey::new(RelationshipKind::CoOccurs, &a.wallet, &b.wallet) {
            Ok(k) => k,
            Err(e) => {
                warn!(error = %e, "Skipping co-occurrence pair");
                report.errors += 1;
                return;
            }
        };

        let obs = CoEntryObservation {
            token: a.token.clone(),
            delta_secs: (a.entry_delta_secs - b.entry_delta_secs).abs(),
            seen_at: a.entered_at.max(b.entered_at),
        };
        let pair = key.pair.clone();
        let config = &self.config;

        let merged = bounded(
            self.timeout,
            "merge_co_occurs",
            self.store.merge_edge(
                key,
                Box::new(move |existing| merge_co_occurs(existing, pair, &obs, config)),
            ),
        )
        .await;

        match merged {
            Ok((_, MergeOutcome::Created)) => report.edges_created += 1,
            Ok((_, MergeOutcome::Updated)) => report.edges_updated += 1,
            Err(e) => {
                warn!(
                    wallet_a = %short(&a.wallet),
                    wallet_b = %short(&b.wallet),
                    token = %short(&a.token),
                    error = %e,
                    "Failed to merge co-occurrence edge"
                );
                report.errors += 1;
            }
        }
    }
}
