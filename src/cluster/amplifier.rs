//! Cluster amplification
//!
//! Turns cluster activity into a signal multiplier in `[1.0, max_factor]`:
//! - Base factor once enough members are active
//! - Participation bonus per extra active member, capped
//! - Leader bonus when a flagged leader is among the active members
//! - Strength bonus from cluster cohesion
//!
//! Lookups degrade to neutral defaults and never fail the caller.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::graph::edges::RelationshipEdge;
use crate::graph::store::{bounded, GraphStore, TradeHistory};
use crate::types::short;

/// Configuration for the amplification factor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AmplificationConfig {
    #[serde(default = "default_base_factor")]
    pub base_factor: f64,

    #[serde(default = "default_max_factor")]
    pub max_factor: f64,

    /// Active members required before any amplification
    #[serde(default = "default_min_active_members")]
    pub min_active_members: usize,

    /// How far back member buys count as activity (seconds)
    #[serde(default = "default_activity_window_secs")]
    pub activity_window_secs: u64,

    #[serde(default = "default_participation_bonus_per_member")]
    pub participation_bonus_per_member: f64,

    #[serde(default = "default_participation_bonus_cap")]
    pub participation_bonus_cap: f64,

    #[serde(default = "default_leader_bonus")]
    pub leader_bonus: f64,

    #[serde(default = "default_strength_bonus_weight")]
    pub strength_bonus_weight: f64,

    /// Clusters weaker than this are never amplified
    #[serde(default = "default_min_cluster_strength")]
    pub min_cluster_strength: f64,
}

fn default_base_factor() -> f64 {
    1.2
}
fn default_max_factor() -> f64 {
    1.8
}
fn default_min_active_members() -> usize {
    2
}
fn default_activity_window_secs() -> u64 {
    600
}
fn default_participation_bonus_per_member() -> f64 {
    0.05
}
fn default_participation_bonus_cap() -> f64 {
    0.2
}
fn default_leader_bonus() -> f64 {
    0.15
}
fn default_strength_bonus_weight() -> f64 {
    0.2
}
fn default_min_cluster_strength() -> f64 {
    0.3
}

impl Default for AmplificationConfig {
    fn default() -> Self {
        Self {
            base_factor: default_base_factor(),
            max_factor: default_max_factor(),
            min_active_members: default_min_active_members(),
            activity_window_secs: default_activity_window_secs(),
            participation_bonus_per_member: default_participation_bonus_per_member(),
            participation_bonus_cap: default_participation_bonus_cap(),
            leader_bonus: default_leader_bonus(),
            strength_bonus_weight: default_strength_bonus_weight(),
            min_cluster_strength: default_min_cluster_strength(),
        }
    }
}

/// Amplification factor for a given activity level (clamped to `[1.0, max_factor]`)
pub fn amplification_factor(
    config: &AmplificationConfig,
    active_members: usize,
    leader_active: bool,
    strength: f64,
) -> f64 {
    let extra = active_members.saturating_sub(config.min_active_members) as f64;
    let participation = (extra * config.participation_bonus_per_member).min(config.participation_bonus_cap);
    let leader = if leader_active { config.leader_bonus } else { 0.0 };
    let cohesion = strength.clamp(0.0, 1.0) * config.strength_bonus_weight;

    (config.base_factor + participation + leader + cohesion).clamp(1.0, config.max_factor.max(1.0))
}

/// Cluster cohesion: mean strength of the edges among members (0 when none)
pub fn cluster_strength(edges: &[RelationshipEdge]) -> f64 {
    if edges.is_empty() {
        return 0.0;
    }
    let total: f64 = edges.iter().map(|e| e.strength()).sum();
    (total / edges.len() as f64).clamp(0.0, 1.0)
}

/// Why a factor was (or was not) applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AmplificationReason {
    Amplified,
    NoCluster,
    InsufficientActivity,
    WeakCluster,
    StoreUnavailable,
}

/// Result of a live activity check
#[derive(Debug, Clone, Serialize)]
pub struct AmplificationCheck {
    pub factor: f64,
    pub cluster_id: Option<String>,
    pub active_members: usize,
    pub leader_active: bool,
    pub strength: f64,
    pub reason: AmplificationReason,
}

impl AmplificationCheck {
    fn neutral(reason: AmplificationReason) -> Self {
        Self {
            factor: 1.0,
            cluster_id: None,
            active_members: 0,
            leader_active: false,
            strength: 0.0,
            reason,
        }
    }
}

/// Persisted cluster scores after a recompute
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClusterScores {
    pub strength: f64,
    pub amplification_factor: f64,
}

/// Computes amplification from cluster activity
pub struct ClusterAmplifier {
    config: AmplificationConfig,
    store: Arc<dyn GraphStore>,
    history: Arc<dyn TradeHistory>,
    timeout: Duration,
}

impl ClusterAmplifier {
    pub fn new(
        config: AmplificationConfig,
        store: Arc<dyn GraphStore>,
        history: Arc<dyn TradeHistory>,
        timeout: Duration,
    ) -> Self {
        Self {
            config,
            store,
            history,
            timeout,
        }
    }

    pub fn config(&self) -> &AmplificationConfig {
        &self.config
    }

    /// Live factor for `wallet` buying `token` at `at`. Never fails.
    pub async fn check_activity(&self, wallet: &str, token: &str, at: DateTime<Utc>) -> AmplificationCheck {
        match self.try_check_activity(wallet, token, at).await {
            Ok(check) => check,
            Err(e) => {
                warn!(
                    wallet = %short(wallet),
                    token = %short(token),
                    error = %e,
                    "Cluster activity check failed, using neutral factor"
                );
                AmplificationCheck::neutral(AmplificationReason::StoreUnavailable)
            }
        }
    }

    async fn try_check_activity(
        &self,
        wallet: &str,
        token: &str,
        at: DateTime<Utc>,
    ) -> Result<AmplificationCheck> {
        let found = bounded(self.timeout, "cluster_of", self.store.cluster_of(wallet)).await?;
        let (cluster, _) = match found {
            Some(c) => c,
            None => return Ok(AmplificationCheck::neutral(AmplificationReason::NoCluster)),
        };

        let members: Vec<String> = cluster.members.iter().cloned().collect();
        let since = at - ChronoDuration::seconds(self.config.activity_window_secs as i64);
        let buys = bounded(
            self.timeout,
            "buys_for_wallets",
            self.history.buys_for_wallets(&members, since),
        )
        .await?;

        let active: HashSet<&str> = buys
            .iter()
            .filter(|b| b.token == token && b.timestamp <= at)
            .map(|b| b.wallet.as_str())
            .collect();

        let leaders: HashSet<String> = bounded(
            self.timeout,
            "cluster_members",
            self.store.cluster_members(&cluster.id),
        )
        .await?
        .into_iter()
        .filter(|m| m.is_leader)
        .map(|m| m.address)
        .collect();
        let leader_active = active.iter().any(|w| leaders.contains(*w));

        let mut check = AmplificationCheck {
            factor: 1.0,
            cluster_id: Some(cluster.id.clone()),
            active_members: active.len(),
            leader_active,
            strength: cluster.strength,
            reason: AmplificationReason::Amplified,
        };

        if active.len() < self.config.min_active_members {
            check.reason = AmplificationReason::InsufficientActivity;
        } else if cluster.strength < self.config.min_cluster_strength {
            check.reason = AmplificationReason::WeakCluster;
        } else {
            check.factor = amplification_factor(&self.config, active.len(), leader_active, cluster.strength);
        }

        debug!(
            wallet = %short(wallet),
            cluster = %cluster.id,
            active = check.active_members,
            factor = check.factor,
            reason = ?check.reason,
            "Cluster activity checked"
        );
        Ok(check)
    }

    /// Recompute and persist cluster strength and the static factor
    pub async fn recompute(&self, cluster_id: &str) -> Result<ClusterScores> {
        let cluster = bounded(self.timeout, "get_cluster", self.store.get_cluster(cluster_id))
            .await?
            .ok_or_else(|| Error::ClusterNotFound(cluster_id.to_string()))?;

        let members: Vec<String> = cluster.members.iter().cloned().collect();
        let edges = bounded(self.timeout, "edges_among", self.store.edges_among(&members)).await?;
        let strength = cluster_strength(&edges);

        let factor = if strength < self.config.min_cluster_strength {
            1.0
        } else {
            amplification_factor(&self.config, cluster.size(), cluster.leader.is_some(), strength)
        };

        bounded(
            self.timeout,
            "set_cluster_scores",
            self.store.set_cluster_scores(cluster_id, strength, factor),
        )
        .await?;

        info!(
            cluster = %cluster_id,
            size = cluster.size(),
            edges = edges.len(),
            strength = %format!("{:.3}", strength),
            factor = %format!("{:.3}", factor),
            "Cluster scores updated"
        );

        Ok(ClusterScores {
            strength,
            amplification_factor: factor,
        })
    }
}

/// Cluster membership summary for a wallet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterInfo {
    pub cluster_id: Option<String>,
    pub is_leader: bool,
    pub amplification_factor: f64,
    pub cluster_size: usize,
}

impl Default for ClusterInfo {
    fn default() -> Self {
        Self {
            cluster_id: None,
            is_leader: false,
            amplification_factor: 1.0,
            cluster_size: 0,
        }
    }
}

/// Read-side cluster lookup for downstream scoring
pub struct ClusterService {
    store: Arc<dyn GraphStore>,
    timeout: Duration,
}

impl ClusterService {
    pub fn new(store: Arc<dyn GraphStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// One bounded query. Any failure or missing membership yields the defaults.
    pub async fn cluster_info(&self, wallet: &str) -> ClusterInfo {
        match bounded(self.timeout, "cluster_of", self.store.cluster_of(wallet)).await {
            Ok(Some((cluster, membership))) => ClusterInfo {
                cluster_size: cluster.size(),
                amplification_factor: cluster.amplification_factor,
                cluster_id: Some(cluster.id),
                is_leader: membership.is_leader,
            },
            Ok(None) => ClusterInfo::default(),
            Err(e) => {
                warn!(wallet = %short(wallet), error = %e, "Cluster lookup failed, using defaults");
                ClusterInfo::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::edges::{EdgeData, FundedByEdge, WalletPair};
    use crate::graph::memory::InMemoryGraphStore;
    use crate::graph::nodes::MemberLeaderStats;
    use crate::graph::testing::FailingStore;
    use crate::types::TradeEvent;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn edge_with_strength(a: &str, b: &str, strength: f64) -> RelationshipEdge {
        let now = Utc::now();
        RelationshipEdge::new(
            WalletPair::new(a, b).unwrap(),
            EdgeData::FundedBy(FundedByEdge {
                funder: a.to_string(),
                funded: b.to_string(),
                bidirectional: false,
                total_amount: 1.0,
                transfer_count: 1,
                first_funded_at: now,
                last_funded_at: now,
                strength,
            }),
        )
    }

    async fn seeded_cluster(store: &InMemoryGraphStore, strength: f64) -> String {
        let created = store.create_cluster(&names(&["A", "B", "C"])).await.unwrap();
        let id = created.cluster().id.clone();
        store.set_cluster_scores(&id, strength, 1.0).await.unwrap();
        id
    }

    fn amplifier(store: Arc<InMemoryGraphStore>) -> ClusterAmplifier {
        ClusterAmplifier::new(
            AmplificationConfig::default(),
            store.clone(),
            store,
            Duration::from_millis(500),
        )
    }

    #[test]
    fn test_factor_formula() {
        let config = AmplificationConfig::default();
        // base 1.2 + 0 participation + 0.15 leader + 0.7 * 0.2
        assert!((amplification_factor(&config, 2, true, 0.7) - 1.49).abs() < 1e-9);
        // participation capped at 0.2, total clamped to 1.8
        assert!((amplification_factor(&config, 20, true, 1.0) - 1.75).abs() < 1e-9);
        let generous = AmplificationConfig {
            leader_bonus: 0.5,
            ..AmplificationConfig::default()
        };
        assert_eq!(amplification_factor(&generous, 20, true, 1.0), 1.8);
    }

    #[test]
    fn test_cluster_strength_mean() {
        assert_eq!(cluster_strength(&[]), 0.0);
        let edges = vec![edge_with_strength("a", "b", 0.2), edge_with_strength("b", "c", 0.6)];
        assert!((cluster_strength(&edges) - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_live_activity_with_leader() {
        let store = Arc::new(InMemoryGraphStore::new());
        let id = seeded_cluster(&store, 0.7).await;

        let mut leader = MemberLeaderStats::empty("A");
        leader.is_leader = true;
        store.set_member_leader_stats(&id, &leader).await.unwrap();

        let at = Utc::now();
        store.record_trades(vec![
            TradeEvent::buy("A", "T", 1.0, at - ChronoDuration::seconds(120)),
            TradeEvent::buy("B", "T", 1.0, at - ChronoDuration::seconds(60)),
            TradeEvent::buy("C", "OTHER", 1.0, at - ChronoDuration::seconds(30)),
        ]);

        let check = amplifier(store).check_activity("B", "T", at).await;
        assert_eq!(check.reason, AmplificationReason::Amplified);
        assert_eq!(check.active_members, 2);
        assert!(check.leader_active);
        assert!((check.factor - 1.49).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_single_active_member_is_neutral() {
        let store = Arc::new(InMemoryGraphStore::new());
        seeded_cluster(&store, 0.9).await;
        let at = Utc::now();
        store.record_trades(vec![TradeEvent::buy("A", "T", 1.0, at - ChronoDuration::seconds(10))]);

        let check = amplifier(store).check_activity("A", "T", at).await;
        assert_eq!(check.factor, 1.0);
        assert_eq!(check.reason, AmplificationReason::InsufficientActivity);
    }

    #[tokio::test]
    async fn test_weak_cluster_is_neutral() {
        let store = Arc::new(InMemoryGraphStore::new());
        seeded_cluster(&store, 0.1).await;
        let at = Utc::now();
        store.record_trades(vec![
            TradeEvent::buy("A", "T", 1.0, at - ChronoDuration::seconds(10)),
            TradeEvent::buy("B", "T", 1.0, at - ChronoDuration::seconds(5)),
        ]);

        let check = amplifier(store).check_activity("A", "T", at).await;
        assert_eq!(check.factor, 1.0);
        assert_eq!(check.reason, AmplificationReason::WeakCluster);
    }

    #[tokio::test]
    async fn test_no_cluster_and_failures_are_neutral() {
        let store = Arc::new(InMemoryGraphStore::new());
        let check = amplifier(store).check_activity("nobody", "T", Utc::now()).await;
        assert_eq!(check.reason, AmplificationReason::NoCluster);

        let failing = Arc::new(FailingStore::new());
        let a = ClusterAmplifier::new(
            AmplificationConfig::default(),
            failing.clone(),
            failing,
            Duration::from_millis(100),
        );
        let check = a.check_activity("A", "T", Utc::now()).await;
        assert_eq!(check.factor, 1.0);
        assert_eq!(check.reason, AmplificationReason::StoreUnavailable);
    }

    #[tokio::test]
    async fn test_recompute_static_factor() {
        let store = Arc::new(InMemoryGraphStore::new());
        let id = seeded_cluster(&store, 0.0).await;
        for (a, b) in [("A", "B"), ("B", "C")] {
            let edge = edge_with_strength(a, b, 0.5);
            store
                .merge_edge(edge.key(), Box::new(move |_| edge))
                .await
                .unwrap();
        }
        store.set_cluster_leader(&id, Some("A".into())).await.unwrap();

        let scores = amplifier(store.clone()).recompute(&id).await.unwrap();
        assert!((scores.strength - 0.5).abs() < 1e-9);
        // 1.2 + min(1 * 0.05, 0.2) + 0.15 + 0.5 * 0.2
        assert!((scores.amplification_factor - 1.5).abs() < 1e-9);

        let info = ClusterService::new(store.clone(), Duration::from_millis(500))
            .cluster_info("B")
            .await;
        assert_eq!(info.cluster_id.as_deref(), Some(id.as_str()));
        assert_eq!(info.cluster_size, 3);
        assert!((info.amplification_factor - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_cluster_info_defaults() {
        let store = Arc::new(InMemoryGraphStore::new());
        let info = ClusterService::new(store, Duration::from_millis(500))
            .cluster_info("unknown")
            .await;
        assert_eq!(info, ClusterInfo::default());

        let slow = Arc::new(FailingStore::slow(Duration::from_millis(200)));
        let info = ClusterService::new(slow, Duration::from_millis(20))
            .cluster_info("A")
            .await;
        assert_eq!(info, ClusterInfo::default());
        assert_eq!(info.amplification_factor, 1.0);
    }
}
