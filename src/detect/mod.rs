//! Relationship detectors
//!
//! Each detector turns trade activity into merged graph edges:
//! - Synced buys: wallets buying the same token within a short window
//! - Co-occurrence: wallets repeatedly entering tokens early together
//! - Funding: native SOL transfers between wallets

pub mod co_occurrence;
pub mod funding;
pub mod sync_buy;

pub use co_occurrence::{CoOccurrenceAnalyzer, CoOccurrenceConfig, CoOccurrenceReport, EarlyEntry};
pub use funding::{FundingAnalyzer, FundingConfig, FundingReport};
pub use sync_buy::{SyncBuyDetector, SyncDetectionConfig, SyncDetectionReport, SyncEvent};

use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Restricts pair merging to pairs containing `wallet`
///
/// Peers listed in `settled` already had their own pairs merged in the same
/// onboarding run, so pairs with them are skipped.
#[derive(Debug, Clone, Copy)]
pub struct PairFocus<'a> {
    pub wallet: &'a str,
    pub settled: Option<&'a HashSet<String>>,
}

impl<'a> PairFocus<'a> {
    pub fn wallet(wallet: &'a str) -> Self {
        Self {
            wallet,
            settled: None,
        }
    }

    pub fn in_run(wallet: &'a str, settled: &'a HashSet<String>) -> Self {
        Self {
            wallet,
            settled: Some(settled),
        }
    }

    pub(crate) fn accepts(&self, a: &str, b: &str) -> bool {
        let peer = if a == self.wallet {
            b
        } else if b == self.wallet {
            a
        } else {
            return false;
        };
        !self.settled.is_some_and(|s| s.contains(peer))
    }
}

/// Absolute distance between two timestamps in (fractional) seconds
pub(crate) fn secs_between(a: DateTime<Utc>, b: DateTime<Utc>) -> f64 {
    ((a - b).num_milliseconds() as f64 / 1000.0).abs()
}

/// All unordered pairs `(items[i], items[j])` with `i < j`
pub(crate) fn unordered_pairs<T>(items: &[T]) -> Vec<(&T, &T)> {
    let mut pairs = Vec::new();
    for (i, x) in items.iter().enumerate() {
        for y in &items[i + 1..] {
            pairs.push((x, y));
        }
    }
    pairs
}
