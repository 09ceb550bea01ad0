//! Shared records exchanged with collaborators
//!
//! Trade events and launch info come in from ingestion/profiling, wallet nodes
//! are the graph-resident view of the external wallet registry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Native SOL as reported by most indexers
pub const NATIVE_TOKEN: &str = "SOL";

/// Wrapped SOL mint, treated as native currency for funding analysis
pub const WRAPPED_SOL_MINT: &str = "So11111111111111111111111111111111111111112";

/// Kind of on-chain activity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeType {
    Buy,
    Sell,
    Transfer,
}

/// A single wallet trade or transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeEvent {
    /// Wallet this event belongs to
    pub wallet: String,
    /// Token mint (or `SOL` for native transfers)
    pub token: String,
    pub trade_type: TradeType,
    /// Amount in SOL (buys/sells: SOL spent/received, transfers: SOL moved)
    pub amount: f64,
    pub timestamp: DateTime<Utc>,
    /// Sender, for transfers
    #[serde(default)]
    pub from: Option<String>,
    /// Receiver, for transfers
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub signature: Option<String>,
}

impl TradeEvent {
    /// Build a buy event
    pub fn buy(wallet: &str, token: &str, amount: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            wallet: wallet.to_string(),
            token: token.to_string(),
            trade_type: TradeType::Buy,
            amount,
            timestamp,
            from: None,
            to: None,
            signature: None,
        }
    }

    /// Build a native transfer event as seen from `wallet`'s history
    pub fn transfer(
        wallet: &str,
        from: &str,
        to: &str,
        amount: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            wallet: wallet.to_string(),
            token: NATIVE_TOKEN.to_string(),
            trade_type: TradeType::Transfer,
            amount,
            timestamp,
            from: Some(from.to_string()),
            to: Some(to.to_string()),
            signature: None,
        }
    }

    pub fn is_buy(&self) -> bool {
        self.trade_type == TradeType::Buy
    }

    pub fn is_transfer(&self) -> bool {
        self.trade_type == TradeType::Transfer
    }

    /// Check if this event moves native currency
    pub fn is_native(&self) -> bool {
        self.token == NATIVE_TOKEN || self.token == WRAPPED_SOL_MINT
    }
}

/// Token launch information (defines the early-entry window)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenLaunchInfo {
    pub token: String,
    pub launch_timestamp: DateTime<Utc>,
}

/// Emitted by the wallet profiler; triggers onboarding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletProfiled {
    pub address: String,
    /// History already fetched by the profiler (reused, never re-fetched)
    #[serde(default)]
    pub trade_history: Vec<TradeEvent>,
    #[serde(default)]
    pub score: Option<f64>,
}

/// Wallet registry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletStatus {
    #[default]
    Active,
    Inactive,
    Blacklisted,
}

/// Graph-resident wallet node with cheap statistics used for qualification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletNode {
    pub address: String,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub status: WalletStatus,
    #[serde(default)]
    pub trade_count: u32,
    /// 0.0 to 1.0
    #[serde(default)]
    pub win_rate: f64,
    #[serde(default = "Utc::now")]
    pub first_seen: DateTime<Utc>,
}

impl WalletNode {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            score: None,
            status: WalletStatus::Active,
            trade_count: 0,
            win_rate: 0.0,
            first_seen: Utc::now(),
        }
    }

    pub fn with_stats(mut self, trade_count: u32, win_rate: f64) -> Self {
        self.trade_count = trade_count;
        self.win_rate = win_rate.clamp(0.0, 1.0);
        self
    }

    pub fn is_active(&self) -> bool {
        self.status == WalletStatus::Active
    }
}

/// Validate a Solana address (base58, 32 bytes)
pub fn validate_address(address: &str) -> Result<()> {
    let bytes = bs58::decode(address)
        .into_vec()
        .map_err(|e| Error::InvalidAddress(format!("{}: {}", address, e)))?;
    if bytes.len() != 32 {
        return Err(Error::InvalidAddress(format!(
            "{}: expected 32 bytes, got {}",
            address,
            bytes.len()
        )));
    }
    Ok(())
}

/// Short form of an address for log lines
pub fn short(address: &str) -> &str {
    let end = address
        .char_indices()
        .nth(8)
        .map(|(i, _)| i)
        .unwrap_or(address.len());
    &address[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_address() {
        assert!(validate_address(WRAPPED_SOL_MINT).is_ok());
        assert!(validate_address("11111111111111111111111111111111").is_ok());
        assert!(validate_address("not-base58!").is_err());
        assert!(validate_address("abc").is_err());
    }

    #[test]
    fn test_native_detection() {
        let now = Utc::now();
        let t = TradeEvent::transfer("w", "f", "w", 1.0, now);
        assert!(t.is_native());
        assert!(t.is_transfer());

        let b = TradeEvent::buy("w", "mint", 0.5, now);
        assert!(!b.is_native());
        assert!(b.is_buy());
    }

    #[test]
    fn test_short_address() {
        assert_eq!(short("abcdefghijkl"), "abcdefgh");
        assert_eq!(short("abc"), "abc");
    }

    #[test]
    fn test_wallet_node_deserialize_defaults() {
        let node: WalletNode = serde_json::from_str(r#"{"address":"w1"}"#).unwrap();
        assert!(node.is_active());
        assert_eq!(node.trade_count, 0);
    }
}
