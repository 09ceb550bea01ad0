//! Test doubles for store failure paths

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::time::Duration;

use super::edges::{EdgeKey, MergeOutcome, RelationshipEdge, RelationshipKind};
use super::nodes::{Cluster, ClusterMembership, MemberLeaderStats, Neighbor};
use super::store::{ClusterCreation, EdgeMergeFn, GraphStore, TradeHistory};
use crate::error::{Error, Result};
use crate::types::{TokenLaunchInfo, TradeEvent, WalletNode};

/// Store whose every call fails, optionally after a delay
#[derive(Default)]
pub struct FailingStore {
    delay: Option<Duration>,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hang for `delay` before failing (exercises timeouts)
    pub fn slow(delay: Duration) -> Self {
        Self { delay: Some(delay) }
    }

    async fn fail<T>(&self) -> Result<T> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Err(Error::Store("store unreachable".to_string()))
    }
}

#[async_trait]
impl GraphStore for FailingStore {
    async fn upsert_wallet(&self, _wallet: WalletNode) -> Result<()> {
        self.fail().await
    }

    async fn get_wallet(&self, _address: &str) -> Result<Option<WalletNode>> {
        self.fail().await
    }

    async fn merge_edge(
        &self,
        _key: EdgeKey,
        _merge: EdgeMergeFn<'_>,
    ) -> Result<(RelationshipEdge, MergeOutcome)> {
        self.fail().await
    }

    async fn get_edge(&self, _key: &EdgeKey) -> Result<Option<RelationshipEdge>> {
        self.fail().await
    }

    async fn neighbors(
        &self,
        _address: &str,
        _kinds: &[RelationshipKind],
        _limit: usize,
    ) -> Result<Vec<Neighbor>> {
        self.fail().await
    }

    async fn edges_among(&self, _members: &[String]) -> Result<Vec<RelationshipEdge>> {
        self.fail().await
    }

    async fn find_cluster_for_any(&self, _addresses: &[String]) -> Result<Option<Cluster>> {
        self.fail().await
    }

    async fn cluster_of(&self, _address: &str) -> Result<Option<(Cluster, ClusterMembership)>> {
        self.fail().await
    }

    async fn create_cluster(&self, _members: &[String]) -> Result<ClusterCreation> {
        self.fail().await
    }

    async fn add_cluster_members(&self, _cluster_id: &str, _members: &[String]) -> Result<usize> {
        self.fail().await
    }

    async fn get_cluster(&self, _cluster_id: &str) -> Result<Option<Cluster>> {
        self.fail().await
    }

    async fn cluster_members(&self, _cluster_id: &str) -> Result<Vec<ClusterMembership>> {
        self.fail().await
    }

    async fn reset_leader_flags(&self, _cluster_id: &str) -> Result<()> {
        self.fail().await
    }

    async fn set_member_leader_stats(
        &self,
        _cluster_id: &str,
        _stats: &MemberLeaderStats,
    ) -> Result<()> {
        self.fail().await
    }

    async fn set_cluster_leader(&self, _cluster_id: &str, _leader: Option<String>) -> Result<()> {
        self.fail().await
    }

    async fn set_cluster_scores(
        &self,
        _cluster_id: &str,
        _strength: f64,
        _amplification_factor: f64,
    ) -> Result<()> {
        self.fail().await
    }

    async fn unclustered_wallets(
        &self,
        _min_age: ChronoDuration,
        _now: DateTime<Utc>,
        _limit: usize,
    ) -> Result<Vec<WalletNode>> {
        self.fail().await
    }
}

#[async_trait]
impl TradeHistory for FailingStore {
    async fn wallet_trades(&self, _address: &str, _since: DateTime<Utc>) -> Result<Vec<TradeEvent>> {
        self.fail().await
    }

    async fn token_buys(&self, _token: &str, _since: DateTime<Utc>) -> Result<Vec<TradeEvent>> {
        self.fail().await
    }

    async fn buys_for_wallets(
        &self,
        _wallets: &[String],
        _since: DateTime<Utc>,
    ) -> Result<Vec<TradeEvent>> {
        self.fail().await
    }

    async fn token_launches(&self, _tokens: &[String]) -> Result<Vec<TokenLaunchInfo>> {
        self.fail().await
    }
}
