//! Cluster nodes and membership edges

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::edges::RelationshipKind;

/// Cluster lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterStatus {
    #[default]
    Active,
    Archived,
}

/// A persisted group of wallets believed to act in coordination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: String,
    pub members: BTreeSet<String>,
    /// Primary leader (highest leader score)
    pub leader: Option<String>,
    /// Last computed static amplification factor
    pub amplification_factor: f64,
    /// Cohesion score (0.0 to 1.0)
    pub strength: f64,
    pub status: ClusterStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Cluster {
    /// Create a new active cluster with a fresh id
    pub fn new<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            members: members.into_iter().map(Into::into).collect(),
            leader: None,
            amplification_factor: 1.0,
            strength: 0.0,
            status: ClusterStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, address: &str) -> bool {
        self.members.contains(address)
    }

    pub fn is_active(&self) -> bool {
        self.status == ClusterStatus::Active
    }

    /// Add a member. Returns true if it was new.
    pub fn add_member(&mut self, address: &str) -> bool {
        let added = self.members.insert(address.to_string());
        if added {
            self.updated_at = Utc::now();
        }
        added
    }
}

/// Membership edge from a wallet to its cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterMembership {
    pub cluster_id: String,
    pub address: String,
    pub leader_score: f64,
    pub timing_precedence: f64,
    pub follower_count: u32,
    pub avg_lead_time_secs: f64,
    pub is_leader: bool,
    pub joined_at: DateTime<Utc>,
}

impl ClusterMembership {
    pub fn new(cluster_id: &str, address: &str) -> Self {
        Self {
            cluster_id: cluster_id.to_string(),
            address: address.to_string(),
            leader_score: 0.0,
            timing_precedence: 0.0,
            follower_count: 0,
            avg_lead_time_secs: 0.0,
            is_leader: false,
            joined_at: Utc::now(),
        }
    }

    /// Overwrite leadership fields
    pub fn apply(&mut self, stats: &MemberLeaderStats) {
        self.leader_score = stats.leader_score;
        self.timing_precedence = stats.timing_precedence;
        self.follower_count = stats.follower_count;
        self.avg_lead_time_secs = stats.avg_lead_time_secs;
        self.is_leader = stats.is_leader;
    }
}

/// Per-member leadership statistics written by the leader identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberLeaderStats {
    pub address: String,
    pub leader_score: f64,
    pub timing_precedence: f64,
    pub follower_score: f64,
    pub consistency: f64,
    pub follower_count: u32,
    pub avg_lead_time_secs: f64,
    pub times_led: u32,
    pub times_participated: u32,
    pub is_leader: bool,
}

impl MemberLeaderStats {
    pub fn empty(address: &str) -> Self {
        Self {
            address: address.to_string(),
            leader_score: 0.0,
            timing_precedence: 0.0,
            follower_score: 0.0,
            consistency: 0.0,
            follower_count: 0,
            avg_lead_time_secs: 0.0,
            times_led: 0,
            times_participated: 0,
            is_leader: false,
        }
    }
}

/// A 1-hop neighbor of a wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Neighbor {
    pub address: String,
    /// Relationship kinds connecting the two wallets
    pub kinds: Vec<RelationshipKind>,
    /// Strongest edge strength between the two wallets
    pub strength: f64,
}
