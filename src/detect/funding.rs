//! Funding relationship analysis
//!
//! Inspects a wallet's incoming native SOL transfers and links it to each
//! wallet that funded it with a FUNDED_BY edge. Exchange hot wallets and
//! dust transfers are ignored.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::graph::edges::{
    capped_ratio, EdgeData, EdgeKey, FundedByEdge, MergeOutcome, RelationshipEdge,
    RelationshipKind, WalletPair,
};
use crate::graph::store::{bounded, GraphStore};
use crate::types::{short, validate_address, TradeEvent};

/// Configuration for funding analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingConfig {
    /// Minimum SOL amount to consider a funding relationship
    #[serde(default = "default_min_amount")]
    pub min_amount: f64,

    /// Lookback hours for funding transfers
    #[serde(default = "default_lookback_hours")]
    pub lookback_hours: u64,

    /// Known exchange / service wallets that never count as funders
    #[serde(default)]
    pub excluded_sources: Vec<String>,

    /// Total SOL at which the amount component of strength saturates
    #[serde(default = "default_strength_amount_cap")]
    pub strength_amount_cap: f64,

    /// Transfer count at which the count component saturates
    #[serde(default = "default_strength_count_cap")]
    pub strength_count_cap: u32,
}

fn default_min_amount() -> f64 {
    0.1
}
fn default_lookback_hours() -> u64 {
    168
}
fn default_strength_amount_cap() -> f64 {
    10.0
}
fn default_strength_count_cap() -> u32 {
    5
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            min_amount: default_min_amount(),
            lookback_hours: default_lookback_hours(),
            excluded_sources: Vec::new(),
            strength_amount_cap: default_strength_amount_cap(),
            strength_count_cap: default_strength_count_cap(),
        }
    }
}

impl FundingConfig {
    /// Check that every excluded source is a valid address
    pub fn validate_sources(&self) -> crate::error::Result<()> {
        for source in &self.excluded_sources {
            validate_address(source)?;
        }
        Ok(())
    }
}

/// Outcome of one funding analysis
#[derive(Debug, Clone, Default, Serialize)]
pub struct FundingReport {
    /// Transfers that passed the filters
    pub transfers_seen: usize,
    pub edges_created: usize,
    pub edges_updated: usize,
    /// Distinct funders linked to the wallet
    pub funders: Vec<String>,
    pub errors: usize,
}

/// Strength of a funding edge (0.0 to 1.0)
pub fn funded_by_strength(edge: &FundedByEdge, config: &FundingConfig) -> f64 {
    let amount = capped_ratio(edge.total_amount, config.strength_amount_cap);
    let count = capped_ratio(edge.transfer_count as f64, config.strength_count_cap as f64);
    (0.6 * amount + 0.4 * count).clamp(0.0, 1.0)
}

fn merge_funded_by(
    existing: Option<RelationshipEdge>,
    pair: WalletPair,
    funder: &str,
    funded: &str,
    amount: f64,
    at: DateTime<Utc>,
    config: &FundingConfig,
) -> RelationshipEdge {
    if let Some(mut edge) = existing {
        if let EdgeData::FundedBy(e) = &mut edge.data {
            if e.funder != funder {
                e.bidirectional = true;
            }
            e.total_amount += amount;
            e.transfer_count += 1;
            e.first_funded_at = e.first_funded_at.min(at);
            e.last_funded_at = e.last_funded_at.max(at);
            e.strength = funded_by_strength(e, config);
            edge.updated_at = Utc::now();
            return edge;
        }
    }

    let mut data = FundedByEdge {
        funder: funder.to_string(),
        funded: funded.to_string(),
        bidirectional: false,
        total_amount: amount,
        transfer_count: 1,
        first_funded_at: at,
        last_funded_at: at,
        strength: 0.0,
    };
    data.strength = funded_by_strength(&data, config);
    RelationshipEdge::new(pair, EdgeData::FundedBy(data))
}

/// Funding analyzer
pub struct FundingAnalyzer {
    config: FundingConfig,
    store: Arc<dyn GraphStore>,
    timeout: Duration,
}

impl FundingAnalyzer {
    pub fn new(config: FundingConfig, store: Arc<dyn GraphStore>, timeout: Duration) -> Self {
        Self {
            config,
            store,
            timeout,
        }
    }

    pub fn config(&self) -> &FundingConfig {
        &self.config
    }

    /// Incoming native transfers that qualify as funding for `wallet`
    pub fn funding_transfers<'a>(
        &self,
        wallet: &str,
        history: &'a [TradeEvent],
        now: DateTime<Utc>,
    ) -> Vec<&'a TradeEvent> {
        let cutoff = now - ChronoDuration::hours(self.config.lookback_hours as i64);

        history
            .iter()
            .filter(|t| t.is_transfer() && t.is_native())
            .filter(|t| t.to.as_deref() == Some(wallet))
            .filter(|t| match t.from.as_deref() {
                Some(from) => from != wallet && !self.is_excluded(from),
                None => false,
            })
            .filter(|t| t.amount >= self.config.min_amount)
            .filter(|t| t.timestamp >= cutoff)
            .collect()
    }

    fn is_excluded(&self, source: &str) -> bool {
        self.config.excluded_sources.iter().any(|s| s == source)
    }

    /// Merge a FUNDED_BY edge for every qualifying transfer into `wallet`
    pub async fn analyze(&self, wallet: &str, history: &[TradeEvent]) -> FundingReport {
        self.analyze_at(wallet, history, Utc::now()).await
    }

    async fn analyze_at(&self, wallet: &str, history: &[TradeEvent], now: DateTime<Utc>) -> FundingReport {
        let mut report = FundingReport::default();
        let mut funders = BTreeSet::new();

        for transfer in self.funding_transfers(wallet, history, now) {
            report.transfers_seen += 1;
            let funder = match transfer.from.as_deref() {
                Some(f) => f,
                None => continue,
            };

            let key = match EdgeKey::new(RelationshipKind::FundedBy, funder, wallet) {
                Ok(k) => k,
                Err(e) => {
                    warn!(wallet = %short(wallet), error = %e, "Skipping funding transfer");
                    report.errors += 1;
                    continue;
                }
            };
            let pair = key.pair.clone();
            let amount = transfer.amount;
            let at = transfer.timestamp;
            let config = &self.config;

            let merged = bounded(
                self.timeout,
                "merge_funded_by",
                self.store.merge_edge(
                    key,
                    Box::new(move |existing| {
                        merge_funded_by(existing, pair, funder, wallet, amount, at, config)
                    }),
                ),
            )
            .await;

            match merged {
                Ok((_, outcome)) => {
                    match outcome {
                        MergeOutcome::Created => report.edges_created += 1,
                        MergeOutcome::Updated => report.edges_updated += 1,
                    }
                    funders.insert(funder.to_string());
                }
                Err(e) => {
                    warn!(
                        wallet = %short(wallet),
                        funder = %short(funder),
                        error = %e,
                        "Failed to merge funding edge"
                    );
                    report.errors += 1;
                }
            }
        }

        report.funders = funders.into_iter().collect();
        debug!(
            wallet = %short(wallet),
            transfers = report.transfers_seen,
            funders = report.funders.len(),
            "Funding analysis complete"
        );
        report
    }
}
