//! Coordinated-wallet cluster intelligence
//!
//! Detects relationships between trading wallets (funding, synchronized buys,
//! early-entry co-occurrence), groups related wallets into clusters, ranks
//! cluster leaders and amplifies signals when a cluster moves together.

pub mod cli;
pub mod cluster;
pub mod config;
pub mod detect;
pub mod error;
pub mod graph;
pub mod onboarding;
pub mod types;

// Re-export commonly used types
pub use cluster::{ClusterAmplifier, ClusterGrouper, ClusterInfo, ClusterService, LeaderIdentifier};
pub use config::Config;
pub use error::{Error, Result};
pub use graph::{GraphStore, InMemoryGraphStore, TradeHistory};
pub use onboarding::{CatchupSweep, NetworkOnboarder};
pub use types::{TokenLaunchInfo, TradeEvent, WalletNode, WalletProfiled};
