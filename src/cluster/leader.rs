//! Leader identification
//!
//! A leader is the member that tends to buy first while the rest of the
//! cluster follows shortly after. Scoring is a weighted sum:
//! - Timing precedence (40%): share of its participations where it led
//! - Follower score (30%): average followers when leading, capped
//! - Consistency (30%): share of cluster buy events it participated in

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::detect::secs_between;
use crate::error::Result;
use crate::graph::nodes::MemberLeaderStats;
use crate::graph::store::{bounded, GraphStore, TradeHistory};
use crate::types::{short, TradeEvent};

/// Configuration for leader identification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderConfig {
    /// Member buy history considered (days)
    #[serde(default = "default_lookback_days")]
    pub lookback_days: u64,

    /// Minimum delay after the first mover to count as a follower (seconds)
    #[serde(default = "default_min_lead_secs")]
    pub min_lead_secs: u64,

    /// Maximum delay after the first mover to count as a follower (seconds)
    #[serde(default = "default_first_mover_window_secs")]
    pub first_mover_window_secs: u64,

    /// Average follower count at which the follower score saturates
    #[serde(default = "default_follower_cap")]
    pub follower_cap: f64,

    /// Minimum participations before a member can score
    #[serde(default = "default_min_trades")]
    pub min_trades: u32,

    /// Score a member must exceed to be flagged as leader
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f64,

    #[serde(default = "default_max_leaders")]
    pub max_leaders: usize,

    /// Weight of timing precedence in the leader score
    #[serde(default = "default_timing_weight")]
    pub timing_weight: f64,

    /// Weight of the follower score
    #[serde(default = "default_follower_weight")]
    pub follower_weight: f64,

    /// Weight of participation consistency
    #[serde(default = "default_consistency_weight")]
    pub consistency_weight: f64,
}

fn default_lookback_days() -> u64 {
    30
}
fn default_min_lead_secs() -> u64 {
    30
}
fn default_first_mover_window_secs() -> u64 {
    300
}
fn default_follower_cap() -> f64 {
    5.0
}
fn default_min_trades() -> u32 {
    5
}
fn default_score_threshold() -> f64 {
    0.6
}
fn default_max_leaders() -> usize {
    3
}
fn default_timing_weight() -> f64 {
    0.4
}
fn default_follower_weight() -> f64 {
    0.3
}
fn default_consistency_weight() -> f64 {
    0.3
}

impl Default for LeaderConfig {
    fn default() -> Self {
        Self {
            lookback_days: default_lookback_days(),
            min_lead_secs: default_min_lead_secs(),
            first_mover_window_secs: default_first_mover_window_secs(),
            follower_cap: default_follower_cap(),
            min_trades: default_min_trades(),
            score_threshold: default_score_threshold(),
            max_leaders: default_max_leaders(),
            timing_weight: default_timing_weight(),
            follower_weight: default_follower_weight(),
            consistency_weight: default_consistency_weight(),
        }
    }
}

/// Result of leader identification for one cluster
#[derive(Debug, Clone, Serialize)]
pub struct LeaderReport {
    pub cluster_id: String,
    /// Tokens bought by at least two members
    pub qualifying_events: u32,
    /// Stats for every member, best first
    pub members: Vec<MemberLeaderStats>,
    /// Flagged leaders, best first
    pub leaders: Vec<String>,
    pub primary: Option<String>,
}

#[derive(Default)]
struct Tally {
    participated: u32,
    led: u32,
    followers_total: u32,
    lead_time_total: f64,
    lead_time_samples: u32,
    distinct_followers: HashSet<String>,
}

/// Score every member from their buys (pure)
///
/// Returned stats are sorted by score descending then address, with the
/// leader flag set on at most `max_leaders` members above the threshold.
pub fn score_members(
    config: &LeaderConfig,
    members: &[String],
    buys: &[TradeEvent],
) -> (Vec<MemberLeaderStats>, u32) {
    let member_set: HashSet<&str> = members.iter().map(String::as_str).collect();

    // token -> member -> first buy time
    let mut first_buys: BTreeMap<&str, HashMap<&str, DateTime<Utc>>> = BTreeMap::new();
    for buy in buys.iter().filter(|b| b.is_buy()) {
        if !member_set.contains(buy.wallet.as_str()) {
            continue;
        }
        let per_token = first_buys.entry(buy.token.as_str()).or_default();
        per_token
            .entry(buy.wallet.as_str())
            .and_modify(|t| *t = (*t).min(buy.timestamp))
            .or_insert(buy.timestamp);
    }

    let mut tallies: HashMap<&str, Tally> = HashMap::new();
    let mut qualifying_events = 0u32;
    let min_lead = config.min_lead_secs as f64;
    let window = config.first_mover_window_secs as f64;

    for per_token in first_buys.values() {
        if per_token.len() < 2 {
            continue;
        }
        qualifying_events += 1;

        let mut ordered: Vec<(&str, DateTime<Utc>)> = per_token.iter().map(|(w, t)| (*w, *t)).collect();
        ordered.sort_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(b.0)));

        for (wallet, _) in &ordered {
            tallies.entry(*wallet).or_default().participated += 1;
        }

        let (first_mover, first_at) = ordered[0];
        let followers: Vec<(&str, f64)> = ordered[1..]
            .iter()
            .map(|(w, t)| (*w, secs_between(*t, first_at)))
            .filter(|(_, delta)| *delta >= min_lead && *delta <= window)
            .collect();

        if followers.is_empty() {
            continue;
        }

        let tally = tallies.entry(first_mover).or_default();
        tally.led += 1;
        tally.followers_total += followers.len() as u32;
        for (follower, delta) in followers {
            tally.lead_time_total += delta;
            tally.lead_time_samples += 1;
            tally.distinct_followers.insert(follower.to_string());
        }
    }

    let mut stats: Vec<MemberLeaderStats> = members
        .iter()
        .map(|address| {
            let mut s = MemberLeaderStats::empty(address);
            let tally = match tallies.get(address.as_str()) {
                Some(t) => t,
                None => return s,
            };

            s.times_participated = tally.participated;
            s.times_led = tally.led;
            s.follower_count = tally.distinct_followers.len() as u32;
            if tally.lead_time_samples > 0 {
                s.avg_lead_time_secs = tally.lead_time_total / tally.lead_time_samples as f64;
            }
            if tally.participated > 0 {
                s.timing_precedence = tally.led as f64 / tally.participated as f64;
            }
            if tally.led > 0 && config.follower_cap > 0.0 {
                let avg_followers = tally.followers_total as f64 / tally.led as f64;
                s.follower_score = (avg_followers / config.follower_cap).min(1.0);
            }
            if qualifying_events > 0 {
                s.consistency = tally.participated as f64 / qualifying_events as f64;
            }

            // Not enough data is a zero score, not an error
            if tally.participated >= config.min_trades {
                s.leader_score = (config.timing_weight * s.timing_precedence
                    + config.follower_weight * s.follower_score
                    + config.consistency_weight * s.consistency)
                    .clamp(0.0, 1.0);
            }
            s
        })
        .collect();

    stats.sort_by(|a, b| {
        b.leader_score
            .partial_cmp(&a.leader_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.address.cmp(&b.address))
    });

    let mut flagged = 0;
    for s in stats.iter_mut() {
        if flagged >= config.max_leaders {
            break;
        }
        if s.leader_score > config.score_threshold {
            s.is_leader = true;
            flagged += 1;
        }
    }

    (stats, qualifying_events)
}

/// Identifies and persists cluster leaders
pub struct LeaderIdentifier {
    config: LeaderConfig,
    store: Arc<dyn GraphStore>,
    history: Arc<dyn TradeHistory>,
    timeout: Duration,
}

impl LeaderIdentifier {
    pub fn new(
        config: LeaderConfig,
        store: Arc<dyn GraphStore>,
        history: Arc<dyn TradeHistory>,
        timeout: Duration,
    ) -> Self {
        Self {
            config,
            store,
            history,
            timeout,
        }
    }

    /// Score all members of a cluster and persist leader flags
    ///
    /// Writes are not transactional. If a store write fails partway, the
    /// cluster is left with its leader cleared and only some members' stats
    /// updated; the next successful `identify` overwrites all of it.
    pub async fn identify(&self, cluster_id: &str) -> Result<LeaderReport> {
        let members = bounded(
            self.timeout,
            "cluster_members",
            self.store.cluster_members(cluster_id),
        )
        .await?;
        let addresses: Vec<String> = members.into_iter().map(|m| m.address).collect();

        let since = Utc::now() - ChronoDuration::days(self.config.lookback_days as i64);
        let buys = bounded(
            self.timeout,
            "buys_for_wallets",
            self.history.buys_for_wallets(&addresses, since),
        )
        .await?;

        let (stats, qualifying_events) = score_members(&self.config, &addresses, &buys);

        bounded(
            self.timeout,
            "reset_leader_flags",
            self.store.reset_leader_flags(cluster_id),
        )
        .await?;
        for s in &stats {
            bounded(
                self.timeout,
                "set_member_leader_stats",
                self.store.set_member_leader_stats(cluster_id, s),
            )
            .await?;
        }

        let leaders: Vec<String> = stats
            .iter()
            .filter(|s| s.is_leader)
            .map(|s| s.address.clone())
            .collect();
        let primary = leaders.first().cloned();

        bounded(
            self.timeout,
            "set_cluster_leader",
            self.store.set_cluster_leader(cluster_id, primary.clone()),
        )
        .await?;

        match &primary {
            Some(leader) => info!(
                cluster = %cluster_id,
                leader = %short(leader),
                leaders = leaders.len(),
                "Cluster leader identified"
            ),
            None => debug!(
                cluster = %cluster_id,
                events = qualifying_events,
                "No member qualifies as leader"
            ),
        }

        Ok(LeaderReport {
            cluster_id: cluster_id.to_string(),
            qualifying_events,
            members: stats,
            leaders,
            primary,
        })
    }
}
