//! Relationship edges between wallets
//!
//! Every edge is an aggregated, undirected record keyed by `(kind, pair)`.
//! New observations are merged into the existing edge by the detector that
//! produced them; the store only guarantees that the merge is atomic.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::error::{Error, Result};

/// Relationship type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// One wallet sent native SOL to the other
    FundedBy,
    /// Both wallets bought the same token within the sync window
    SyncedBuy,
    /// Both wallets entered the same tokens early, repeatedly
    CoOccurs,
}

impl RelationshipKind {
    pub const ALL: [RelationshipKind; 3] = [
        RelationshipKind::FundedBy,
        RelationshipKind::SyncedBuy,
        RelationshipKind::CoOccurs,
    ];
}

impl fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationshipKind::FundedBy => "FUNDED_BY",
            RelationshipKind::SyncedBuy => "SYNCED_BUY",
            RelationshipKind::CoOccurs => "CO_OCCURS",
        };
        f.write_str(name)
    }
}

/// Unordered wallet pair, stored in canonical (sorted) order
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WalletPair {
    a: String,
    b: String,
}

impl WalletPair {
    /// Build a canonical pair. Self pairs are rejected.
    pub fn new(x: &str, y: &str) -> Result<Self> {
        if x == y {
            return Err(Error::InvalidEdge(format!("self pair for {}", x)));
        }
        let (a, b) = if x < y { (x, y) } else { (y, x) };
        Ok(Self {
            a: a.to_string(),
            b: b.to_string(),
        })
    }

    pub fn first(&self) -> &str {
        &self.a
    }

    pub fn second(&self) -> &str {
        &self.b
    }

    pub fn contains(&self, address: &str) -> bool {
        self.a == address || self.b == address
    }

    /// The other side of the pair
    pub fn other(&self, address: &str) -> Option<&str> {
        if self.a == address {
            Some(&self.b)
        } else if self.b == address {
            Some(&self.a)
        } else {
            None
        }
    }
}

impl fmt::Display for WalletPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<->{}", self.a, self.b)
    }
}

/// Edge identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EdgeKey {
    pub kind: RelationshipKind,
    pub pair: WalletPair,
}

impl EdgeKey {
    pub fn new(kind: RelationshipKind, x: &str, y: &str) -> Result<Self> {
        Ok(Self {
            kind,
            pair: WalletPair::new(x, y)?,
        })
    }
}

/// Co-occurrence frequency flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoOccurrenceFlag {
    #[default]
    Normal,
    High,
    VeryHigh,
}

impl CoOccurrenceFlag {
    /// Threshold a (post-increment) count
    pub fn from_count(count: u32, high: u32, very_high: u32) -> Self {
        if count >= very_high {
            CoOccurrenceFlag::VeryHigh
        } else if count >= high {
            CoOccurrenceFlag::High
        } else {
            CoOccurrenceFlag::Normal
        }
    }
}

/// Funding relationship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundedByEdge {
    /// Sender of the first observed transfer
    pub funder: String,
    /// Receiver of the first observed transfer
    pub funded: String,
    /// Set once a transfer in the opposite direction is seen
    pub bidirectional: bool,
    pub total_amount: f64,
    pub transfer_count: u32,
    pub first_funded_at: DateTime<Utc>,
    pub last_funded_at: DateTime<Utc>,
    pub strength: f64,
}

/// Synced-buy relationship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncedBuyEdge {
    pub sync_count: u32,
    pub tokens: BTreeSet<String>,
    pub avg_delta_secs: f64,
    pub first_sync_at: DateTime<Utc>,
    pub last_sync_at: DateTime<Utc>,
    pub total_volume: f64,
    pub strength: f64,
}

/// Early co-entry relationship
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoOccursEdge {
    pub count: u32,
    pub shared_tokens: BTreeSet<String>,
    pub flag: CoOccurrenceFlag,
    pub avg_entry_delta_secs: f64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub strength: f64,
}

/// Variant payload
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EdgeData {
    FundedBy(FundedByEdge),
    SyncedBuy(SyncedBuyEdge),
    CoOccurs(CoOccursEdge),
}

/// Aggregated relationship edge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub pair: WalletPair,
    pub data: EdgeData,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RelationshipEdge {
    pub fn new(pair: WalletPair, data: EdgeData) -> Self {
        let now = Utc::now();
        Self {
            pair,
            data,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> RelationshipKind {
        match self.data {
            EdgeData::FundedBy(_) => RelationshipKind::FundedBy,
            EdgeData::SyncedBuy(_) => RelationshipKind::SyncedBuy,
            EdgeData::CoOccurs(_) => RelationshipKind::CoOccurs,
        }
    }

    pub fn key(&self) -> EdgeKey {
        EdgeKey {
            kind: self.kind(),
            pair: self.pair.clone(),
        }
    }

    /// Derived strength in [0, 1]
    pub fn strength(&self) -> f64 {
        match &self.data {
            EdgeData::FundedBy(e) => e.strength,
            EdgeData::SyncedBuy(e) => e.strength,
            EdgeData::CoOccurs(e) => e.strength,
        }
    }

    /// Observation count for this edge
    pub fn count(&self) -> u32 {
        match &self.data {
            EdgeData::FundedBy(e) => e.transfer_count,
            EdgeData::SyncedBuy(e) => e.sync_count,
            EdgeData::CoOccurs(e) => e.count,
        }
    }

    pub fn as_synced_buy(&self) -> Option<&SyncedBuyEdge> {
        match &self.data {
            EdgeData::SyncedBuy(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_co_occurs(&self) -> Option<&CoOccursEdge> {
        match &self.data {
            EdgeData::CoOccurs(e) => Some(e),
            _ => None,
        }
    }

    pub fn as_funded_by(&self) -> Option<&FundedByEdge> {
        match &self.data {
            EdgeData::FundedBy(e) => Some(e),
            _ => None,
        }
    }
}

/// Whether a merge created the edge or updated an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    Created,
    Updated,
}

/// Running average update: `(old_avg * (n - 1) + value) / n`, `n` post-increment
pub fn running_average(old_avg: f64, n: u32, value: f64) -> f64 {
    if n <= 1 {
        return value;
    }
    let n = n as f64;
    (old_avg * (n - 1.0) + value) / n
}

/// Insert into a bounded set. Returns false when full (and the item is new).
pub fn insert_bounded(set: &mut BTreeSet<String>, item: &str, cap: usize) -> bool {
    if set.contains(item) {
        return true;
    }
    if set.len() >= cap {
        return false;
    }
    set.insert(item.to_string());
    true
}

/// `min(value / cap, 1)`, 0 for a non-positive cap
pub fn capped_ratio(value: f64, cap: f64) -> f64 {
    if cap <= 0.0 {
        return 0.0;
    }
    (value / cap).clamp(0.0, 1.0)
}
