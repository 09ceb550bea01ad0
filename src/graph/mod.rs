//! Wallet relationship graph
//!
//! Typed, aggregated edges between wallets, cluster nodes with membership
//! edges, and the store contract that persists them.

pub mod edges;
pub mod memory;
pub mod nodes;
pub mod store;
#[cfg(test)]
pub(crate) mod testing;

pub use edges::{
    CoOccurrenceFlag, CoOccursEdge, EdgeData, EdgeKey, FundedByEdge, MergeOutcome,
    RelationshipEdge, RelationshipKind, SyncedBuyEdge, WalletPair,
};
pub use memory::{InMemoryGraphStore, StoreSnapshot, StoreStats};
pub use nodes::{Cluster, ClusterMembership, ClusterStatus, MemberLeaderStats, Neighbor};
pub use store::{bounded, ClusterCreation, EdgeMergeFn, GraphStore, StoreConfig, TradeHistory};
