//! Persistence contract for the relationship graph
//!
//! The subsystem never talks to a concrete database. Anything that can offer
//! atomic create-or-merge on edges and memberships (a graph database, or
//! adjacency tables in a relational store) can implement [`GraphStore`].

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use super::edges::{EdgeKey, MergeOutcome, RelationshipEdge, RelationshipKind};
use super::nodes::{Cluster, ClusterMembership, MemberLeaderStats, Neighbor};
use crate::error::{Error, Result};
use crate::types::{TokenLaunchInfo, TradeEvent, WalletNode};

/// Store access configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Upper bound for every store call (milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// JSON snapshot backing the in-memory store (CLI only)
    #[serde(default)]
    pub snapshot_path: Option<String>,
}

fn default_timeout_ms() -> u64 {
    2000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            snapshot_path: None,
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Merge function applied atomically by the store.
///
/// Receives the current edge (None when absent) and returns the edge to store.
pub type EdgeMergeFn<'a> = Box<dyn FnOnce(Option<RelationshipEdge>) -> RelationshipEdge + Send + 'a>;

/// Result of a guarded cluster creation
#[derive(Debug, Clone)]
pub enum ClusterCreation {
    /// A brand-new cluster was created
    Created(Cluster),
    /// Another run created an overlapping cluster first; candidates were merged into it
    Merged { cluster: Cluster, added: usize },
}

impl ClusterCreation {
    pub fn cluster(&self) -> &Cluster {
        match self {
            ClusterCreation::Created(c) => c,
            ClusterCreation::Merged { cluster, .. } => cluster,
        }
    }
}

/// Graph store operations required by the cluster subsystem
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Create or replace a wallet node
    async fn upsert_wallet(&self, wallet: WalletNode) -> Result<()>;

    async fn get_wallet(&self, address: &str) -> Result<Option<WalletNode>>;

    /// Create-or-merge a typed edge with the given merge function (atomic per key)
    async fn merge_edge(
        &self,
        key: EdgeKey,
        merge: EdgeMergeFn<'_>,
    ) -> Result<(RelationshipEdge, MergeOutcome)>;

    async fn get_edge(&self, key: &EdgeKey) -> Result<Option<RelationshipEdge>>;

    /// 1-hop neighbors over the given kinds, strongest first, at most `limit`
    async fn neighbors(
        &self,
        address: &str,
        kinds: &[RelationshipKind],
        limit: usize,
    ) -> Result<Vec<Neighbor>>;

    /// All edges whose both endpoints are in `members`
    async fn edges_among(&self, members: &[String]) -> Result<Vec<RelationshipEdge>>;

    /// First active cluster containing any of the given wallets
    async fn find_cluster_for_any(&self, addresses: &[String]) -> Result<Option<Cluster>>;

    /// Active cluster and membership for one wallet
    async fn cluster_of(&self, address: &str) -> Result<Option<(Cluster, ClusterMembership)>>;

    /// Create a cluster, re-checking overlap inside a single-writer section
    async fn create_cluster(&self, members: &[String]) -> Result<ClusterCreation>;

    /// Union members into a cluster. Returns how many were new.
    ///
    /// Wallets already in a different active cluster keep that membership.
    async fn add_cluster_members(&self, cluster_id: &str, members: &[String]) -> Result<usize>;

    async fn get_cluster(&self, cluster_id: &str) -> Result<Option<Cluster>>;

    async fn cluster_members(&self, cluster_id: &str) -> Result<Vec<ClusterMembership>>;

    /// Clear `is_leader` on every member and the cluster's leader field
    async fn reset_leader_flags(&self, cluster_id: &str) -> Result<()>;

    async fn set_member_leader_stats(
        &self,
        cluster_id: &str,
        stats: &MemberLeaderStats,
    ) -> Result<()>;

    async fn set_cluster_leader(&self, cluster_id: &str, leader: Option<String>) -> Result<()>;

    async fn set_cluster_scores(
        &self,
        cluster_id: &str,
        strength: f64,
        amplification_factor: f64,
    ) -> Result<()>;

    /// Active wallets without cluster membership, first seen at least `min_age` ago
    async fn unclustered_wallets(
        &self,
        min_age: ChronoDuration,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WalletNode>>;
}

/// Trade history collaborator (indexed trades, launch times)
#[async_trait]
pub trait TradeHistory: Send + Sync {
    /// All events of one wallet since `since`
    async fn wallet_trades(&self, address: &str, since: DateTime<Utc>) -> Result<Vec<TradeEvent>>;

    /// Buy events on one token since `since`
    async fn token_buys(&self, token: &str, since: DateTime<Utc>) -> Result<Vec<TradeEvent>>;

    /// Buy events of a set of wallets since `since`
    async fn buys_for_wallets(
        &self,
        wallets: &[String],
        since: DateTime<Utc>,
    ) -> Result<Vec<TradeEvent>>;

    /// Launch info for the tokens that have it
    async fn token_launches(&self, tokens: &[String]) -> Result<Vec<TokenLaunchInfo>>;
}

/// Run a store call with a bounded timeout
pub async fn bounded<T, F>(timeout: Duration, operation: &'static str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::StoreTimeout {
            operation,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
