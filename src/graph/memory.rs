//! In-memory graph store
//!
//! DashMap-backed implementation of [`GraphStore`] and [`TradeHistory`].
//! Edge and membership writes use per-key entry locking, so concurrent
//! onboarding runs merge safely. Cluster creation is the only operation
//! serialized behind a single-writer lock.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::edges::{EdgeKey, MergeOutcome, RelationshipEdge, RelationshipKind};
use super::nodes::{Cluster, ClusterMembership, MemberLeaderStats, Neighbor};
use super::store::{ClusterCreation, EdgeMergeFn, GraphStore, TradeHistory};
use crate::error::{Error, Result};
use crate::types::{short, TokenLaunchInfo, TradeEvent, WalletNode};

/// Serializable image of the whole store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub wallets: Vec<WalletNode>,
    #[serde(default)]
    pub edges: Vec<RelationshipEdge>,
    #[serde(default)]
    pub clusters: Vec<Cluster>,
    #[serde(default)]
    pub memberships: Vec<ClusterMembership>,
    #[serde(default)]
    pub trades: Vec<TradeEvent>,
    #[serde(default)]
    pub launches: Vec<TokenLaunchInfo>,
}

/// Store statistics
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub wallets: usize,
    pub edges_by_kind: BTreeMap<RelationshipKind, usize>,
    pub active_clusters: usize,
    pub clustered_wallets: usize,
    pub largest_cluster: usize,
    pub trades: usize,
}

/// In-memory graph store
#[derive(Default)]
pub struct InMemoryGraphStore {
    wallets: DashMap<String, WalletNode>,
    edges: DashMap<EdgeKey, RelationshipEdge>,
    /// wallet -> keys of edges touching it
    adjacency: DashMap<String, HashSet<EdgeKey>>,
    clusters: DashMap<String, Cluster>,
    /// wallet -> its (single) active membership
    memberships: DashMap<String, ClusterMembership>,
    /// wallet -> events
    trades: DashMap<String, Vec<TradeEvent>>,
    /// token -> buy events
    token_buys: DashMap<String, Vec<TradeEvent>>,
    launches: DashMap<String, TokenLaunchInfo>,
    create_lock: Mutex<()>,
}

impl InMemoryGraphStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Record trade events (duplicate signatures for the same wallet are ignored)
    pub fn record_trades<I>(&self, events: I) -> usize
    where
        I: IntoIterator<Item = TradeEvent>,
    {
        let mut recorded = 0;
        for event in events {
            let mut history = self.trades.entry(event.wallet.clone()).or_default();
            if let Some(sig) = &event.signature {
                if history
                    .iter()
                    .any(|e| e.signature.as_deref() == Some(sig.as_str()))
                {
                    continue;
                }
            }
            history.push(event.clone());
            drop(history);

            if event.is_buy() {
                self.token_buys
                    .entry(event.token.clone())
                    .or_default()
                    .push(event);
            }
            recorded += 1;
        }
        recorded
    }

    /// Record a token launch
    pub fn record_launch(&self, info: TokenLaunchInfo) {
        self.launches.insert(info.token.clone(), info);
    }

    /// Build a store from a snapshot
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        let store = Self::new();
        for wallet in snapshot.wallets {
            store.wallets.insert(wallet.address.clone(), wallet);
        }
        for edge in snapshot.edges {
            store.index_edge(&edge.key());
            store.edges.insert(edge.key(), edge);
        }
        for cluster in snapshot.clusters {
            store.clusters.insert(cluster.id.clone(), cluster);
        }
        for membership in snapshot.memberships {
            store
                .memberships
                .insert(membership.address.clone(), membership);
        }
        store.record_trades(snapshot.trades);
        for launch in snapshot.launches {
            store.record_launch(launch);
        }
        store
    }

    /// Capture the full store contents
    pub fn snapshot(&self) -> StoreSnapshot {
        let mut edges: Vec<RelationshipEdge> = self.edges.iter().map(|e| e.clone()).collect();
        edges.sort_by(|a, b| a.key().cmp(&b.key()));

        let mut wallets: Vec<WalletNode> = self.wallets.iter().map(|w| w.clone()).collect();
        wallets.sort_by(|a, b| a.address.cmp(&b.address));

        let mut clusters: Vec<Cluster> = self.clusters.iter().map(|c| c.clone()).collect();
        clusters.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        let mut memberships: Vec<ClusterMembership> =
            self.memberships.iter().map(|m| m.clone()).collect();
        memberships.sort_by(|a, b| a.address.cmp(&b.address));

        let mut trades: Vec<TradeEvent> = self
            .trades
            .iter()
            .flat_map(|t| t.value().clone())
            .collect();
        trades.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then(a.wallet.cmp(&b.wallet)));

        let mut launches: Vec<TokenLaunchInfo> = self.launches.iter().map(|l| l.clone()).collect();
        launches.sort_by(|a, b| a.token.cmp(&b.token));

        StoreSnapshot {
            wallets,
            edges,
            clusters,
            memberships,
            trades,
            launches,
        }
    }

    /// Load a snapshot file
    pub fn load_snapshot<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let snapshot: StoreSnapshot = serde_json::from_str(&content)?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Load a snapshot file, or start empty when it does not exist yet
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load_snapshot(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Write a snapshot file
    pub fn save_snapshot<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.snapshot())?;
        std::fs::write(path.as_ref(), json)?;
        info!(path = %path.as_ref().display(), "Graph snapshot saved");
        Ok(())
    }

    /// Get statistics
    pub fn stats(&self) -> StoreStats {
        let mut edges_by_kind = BTreeMap::new();
        for edge in self.edges.iter() {
            *edges_by_kind.entry(edge.key().kind).or_insert(0) += 1;
        }
        let active: Vec<usize> = self
            .clusters
            .iter()
            .filter(|c| c.is_active())
            .map(|c| c.size())
            .collect();

        StoreStats {
            wallets: self.wallets.len(),
            edges_by_kind,
            active_clusters: active.len(),
            clustered_wallets: self.memberships.len(),
            largest_cluster: active.iter().copied().max().unwrap_or(0),
            trades: self.trades.iter().map(|t| t.len()).sum(),
        }
    }

    /// All clusters (for reporting)
    pub fn clusters(&self) -> Vec<Cluster> {
        let mut clusters: Vec<Cluster> = self.clusters.iter().map(|c| c.clone()).collect();
        clusters.sort_by(|a, b| b.size().cmp(&a.size()).then(a.id.cmp(&b.id)));
        clusters
    }

    fn index_edge(&self, key: &EdgeKey) {
        for address in [key.pair.first(), key.pair.second()] {
            self.adjacency
                .entry(address.to_string())
                .or_default()
                .insert(key.clone());
        }
    }

    fn edge_keys_of(&self, address: &str) -> Vec<EdgeKey> {
        self.adjacency
            .get(address)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn active_cluster_for_any(&self, addresses: &[String]) -> Option<Cluster> {
        for address in addresses {
            let cluster_id = match self.memberships.get(address) {
                Some(m) => m.cluster_id.clone(),
                None => continue,
            };
            if let Some(cluster) = self.clusters.get(&cluster_id) {
                if cluster.is_active() {
                    return Some(cluster.clone());
                }
            }
        }
        None
    }

    fn add_members_inner(&self, cluster_id: &str, members: &[String]) -> Result<usize> {
        match self.clusters.get(cluster_id) {
            Some(c) if c.is_active() => {}
            _ => return Err(Error::ClusterNotFound(cluster_id.to_string())),
        }

        let mut newly_added = Vec::new();
        for member in members {
            match self.memberships.entry(member.clone()) {
                Entry::Occupied(existing) => {
                    if existing.get().cluster_id != cluster_id {
                        debug!(
                            wallet = %short(member),
                            cluster = %existing.get().cluster_id,
                            "Wallet already in another cluster, keeping membership"
                        );
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(ClusterMembership::new(cluster_id, member));
                    newly_added.push(member.clone());
                }
            }
        }

        if let Some(mut cluster) = self.clusters.get_mut(cluster_id) {
            for member in &newly_added {
                cluster.add_member(member);
            }
        }

        Ok(newly_added.len())
    }

    fn cluster_snapshot(&self, cluster_id: &str) -> Result<Cluster> {
        self.clusters
            .get(cluster_id)
            .map(|c| c.clone())
            .ok_or_else(|| Error::ClusterNotFound(cluster_id.to_string()))
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn upsert_wallet(&self, wallet: WalletNode) -> Result<()> {
        self.wallets.insert(wallet.address.clone(), wallet);
        Ok(())
    }

    async fn get_wallet(&self, address: &str) -> Result<Option<WalletNode>> {
        Ok(self.wallets.get(address).map(|w| w.clone()))
    }

    async fn merge_edge(
        &self,
        key: EdgeKey,
        merge: EdgeMergeFn<'_>,
    ) -> Result<(RelationshipEdge, MergeOutcome)> {
        let mismatch = |edge: &RelationshipEdge| {
            Error::InvalidEdge(format!(
                "merge produced {} {} for key {} {}",
                edge.kind(),
                edge.pair,
                key.kind,
                key.pair
            ))
        };

        let (edge, outcome) = match self.edges.entry(key.clone()) {
            Entry::Occupied(mut existing) => {
                let merged = merge(Some(existing.get().clone()));
                if merged.key() != key {
                    return Err(mismatch(&merged));
                }
                existing.insert(merged.clone());
                (merged, MergeOutcome::Updated)
            }
            Entry::Vacant(slot) => {
                let created = merge(None);
                if created.key() != key {
                    return Err(mismatch(&created));
                }
                slot.insert(created.clone());
                (created, MergeOutcome::Created)
            }
        };

        if outcome == MergeOutcome::Created {
            self.index_edge(&key);
        }
        Ok((edge, outcome))
    }

    async fn get_edge(&self, key: &EdgeKey) -> Result<Option<RelationshipEdge>> {
        Ok(self.edges.get(key).map(|e| e.clone()))
    }

    async fn neighbors(
        &self,
        address: &str,
        kinds: &[RelationshipKind],
        limit: usize,
    ) -> Result<Vec<Neighbor>> {
        let mut by_address: HashMap<String, Neighbor> = HashMap::new();

        for key in self.edge_keys_of(address) {
            if !kinds.contains(&key.kind) {
                continue;
            }
            let other = match key.pair.other(address) {
                Some(o) => o.to_string(),
                None => continue,
            };
            let strength = match self.edges.get(&key) {
                Some(edge) => edge.strength(),
                None => continue,
            };

            let neighbor = by_address.entry(other.clone()).or_insert_with(|| Neighbor {
                address: other,
                kinds: Vec::new(),
                strength: 0.0,
            });
            if !neighbor.kinds.contains(&key.kind) {
                neighbor.kinds.push(key.kind);
                neighbor.kinds.sort();
            }
            neighbor.strength = neighbor.strength.max(strength);
        }

        let mut neighbors: Vec<Neighbor> = by_address.into_values().collect();
        neighbors.sort_by(|a, b| {
            b.strength
                .partial_cmp(&a.strength)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.address.cmp(&b.address))
        });
        neighbors.truncate(limit);
        Ok(neighbors)
    }

    async fn edges_among(&self, members: &[String]) -> Result<Vec<RelationshipEdge>> {
        let member_set: HashSet<&str> = members.iter().map(String::as_str).collect();
        let mut seen: HashSet<EdgeKey> = HashSet::new();
        let mut edges = Vec::new();

        for member in members {
            for key in self.edge_keys_of(member) {
                if !member_set.contains(key.pair.first()) || !member_set.contains(key.pair.second())
                {
                    continue;
                }
                if !seen.insert(key.clone()) {
                    continue;
                }
                if let Some(edge) = self.edges.get(&key) {
                    edges.push(edge.clone());
                }
            }
        }
        Ok(edges)
    }

    async fn find_cluster_for_any(&self, addresses: &[String]) -> Result<Option<Cluster>> {
        Ok(self.active_cluster_for_any(addresses))
    }

    async fn cluster_of(&self, address: &str) -> Result<Option<(Cluster, ClusterMembership)>> {
        let membership = match self.memberships.get(address) {
            Some(m) => m.clone(),
            None => return Ok(None),
        };
        match self.clusters.get(&membership.cluster_id) {
            Some(cluster) if cluster.is_active() => Ok(Some((cluster.clone(), membership))),
            _ => Ok(None),
        }
    }

    async fn create_cluster(&self, members: &[String]) -> Result<ClusterCreation> {
        let _guard = self.create_lock.lock().await;

        if let Some(existing) = self.active_cluster_for_any(members) {
            let added = self.add_members_inner(&existing.id, members)?;
            let cluster = self.cluster_snapshot(&existing.id)?;
            debug!(
                cluster = %cluster.id,
                added = added,
                "Overlapping cluster created concurrently, merged candidates"
            );
            return Ok(ClusterCreation::Merged { cluster, added });
        }

        let cluster = Cluster::new(Vec::<String>::new());
        let id = cluster.id.clone();
        self.clusters.insert(id.clone(), cluster);
        self.add_members_inner(&id, members)?;
        Ok(ClusterCreation::Created(self.cluster_snapshot(&id)?))
    }

    async fn add_cluster_members(&self, cluster_id: &str, members: &[String]) -> Result<usize> {
        self.add_members_inner(cluster_id, members)
    }

    async fn get_cluster(&self, cluster_id: &str) -> Result<Option<Cluster>> {
        Ok(self.clusters.get(cluster_id).map(|c| c.clone()))
    }

    async fn cluster_members(&self, cluster_id: &str) -> Result<Vec<ClusterMembership>> {
        let cluster = self.cluster_snapshot(cluster_id)?;
        let mut members = Vec::with_capacity(cluster.size());
        for address in &cluster.members {
            if let Some(m) = self.memberships.get(address) {
                if m.cluster_id == cluster_id {
                    members.push(m.clone());
                }
            }
        }
        Ok(members)
    }

    async fn reset_leader_flags(&self, cluster_id: &str) -> Result<()> {
        let cluster = self.cluster_snapshot(cluster_id)?;
        for address in &cluster.members {
            if let Some(mut m) = self.memberships.get_mut(address) {
                if m.cluster_id == cluster_id {
                    m.is_leader = false;
                }
            }
        }
        if let Some(mut c) = self.clusters.get_mut(cluster_id) {
            c.leader = None;
            c.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_member_leader_stats(
        &self,
        cluster_id: &str,
        stats: &MemberLeaderStats,
    ) -> Result<()> {
        match self.memberships.get_mut(&stats.address) {
            Some(mut m) if m.cluster_id == cluster_id => {
                m.apply(stats);
                Ok(())
            }
            _ => Err(Error::Store(format!(
                "{} is not a member of cluster {}",
                stats.address, cluster_id
            ))),
        }
    }

    async fn set_cluster_leader(&self, cluster_id: &str, leader: Option<String>) -> Result<()> {
        let mut cluster = self
            .clusters
            .get_mut(cluster_id)
            .ok_or_else(|| Error::ClusterNotFound(cluster_id.to_string()))?;
        cluster.leader = leader;
        cluster.updated_at = Utc::now();
        Ok(())
    }

    async fn set_cluster_scores(
        &self,
        cluster_id: &str,
        strength: f64,
        amplification_factor: f64,
    ) -> Result<()> {
        let mut cluster = self
            .clusters
            .get_mut(cluster_id)
            .ok_or_else(|| Error::ClusterNotFound(cluster_id.to_string()))?;
        cluster.strength = strength;
        cluster.amplification_factor = amplification_factor;
        cluster.updated_at = Utc::now();
        Ok(())
    }

    async fn unclustered_wallets(
        &self,
        min_age: ChronoDuration,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<WalletNode>> {
        let cutoff = now - min_age;
        let mut wallets: Vec<WalletNode> = self
            .wallets
            .iter()
            .filter(|w| w.is_active() && w.first_seen <= cutoff)
            .filter(|w| !self.memberships.contains_key(&w.address))
            .map(|w| w.clone())
            .collect();
        wallets.sort_by(|a, b| a.first_seen.cmp(&b.first_seen).then(a.address.cmp(&b.address)));
        wallets.truncate(limit);
        Ok(wallets)
    }
}

#[async_trait]
impl TradeHistory for InMemoryGraphStore {
    async fn wallet_trades(&self, address: &str, since: DateTime<Utc>) -> Result<Vec<TradeEvent>> {
        let mut events: Vec<TradeEvent> = self
            .trades
            .get(address)
            .map(|t| t.iter().filter(|e| e.timestamp >= since).cloned().collect())
            .unwrap_or_default();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn token_buys(&self, token: &str, since: DateTime<Utc>) -> Result<Vec<TradeEvent>> {
        let mut events: Vec<TradeEvent> = self
            .token_buys
            .get(token)
            .map(|t| t.iter().filter(|e| e.timestamp >= since).cloned().collect())
            .unwrap_or_default();
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn buys_for_wallets(
        &self,
        wallets: &[String],
        since: DateTime<Utc>,
    ) -> Result<Vec<TradeEvent>> {
        let mut events = Vec::new();
        for wallet in wallets {
            if let Some(history) = self.trades.get(wallet) {
                events.extend(
                    history
                        .iter()
                        .filter(|e| e.is_buy() && e.timestamp >= since)
                        .cloned(),
                );
            }
        }
        events.sort_by_key(|e| e.timestamp);
        Ok(events)
    }

    async fn token_launches(&self, tokens: &[String]) -> Result<Vec<TokenLaunchInfo>> {
        Ok(tokens
            .iter()
            .filter_map(|t| self.launches.get(t).map(|l| l.clone()))
            .collect())
    }
}
