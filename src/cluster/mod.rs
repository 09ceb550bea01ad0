//! Clusters of coordinated wallets
//!
//! Grouping, leader identification and the amplification factor consumed by
//! downstream signal scoring.

pub mod amplifier;
pub mod grouper;
pub mod leader;

pub use amplifier::{
    amplification_factor, cluster_strength, AmplificationCheck, AmplificationConfig,
    AmplificationReason, ClusterAmplifier, ClusterInfo, ClusterScores, ClusterService,
};
pub use grouper::{ClusterConfig, ClusterGrouper, GroupingOutcome};
pub use leader::{score_members, LeaderConfig, LeaderIdentifier, LeaderReport};
