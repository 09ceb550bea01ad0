//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

// Re-export component configs
pub use crate::cluster::{AmplificationConfig, ClusterConfig, LeaderConfig};
pub use crate::detect::{CoOccurrenceConfig, FundingConfig, SyncDetectionConfig};
pub use crate::graph::StoreConfig;
pub use crate::onboarding::{CatchupConfig, OnboardingConfig};

/// Longest lookback or window accepted anywhere (ten years)
const MAX_SPAN_SECS: u64 = 10 * 365 * 24 * 3600;

/// Check that a span in `unit_secs` units stays within `MAX_SPAN_SECS`
fn check_span(field: &str, value: u64, unit_secs: u64) -> Result<()> {
    if value > MAX_SPAN_SECS / unit_secs {
        anyhow::bail!(
            "{} is too large ({}), at most {} allowed",
            field,
            value,
            MAX_SPAN_SECS / unit_secs
        );
    }
    Ok(())
}

/// Check that weights are non-negative and sum to 1.0
fn check_weights(section: &str, weights: &[f64]) -> Result<()> {
    if weights.iter().any(|w| *w < 0.0 || !w.is_finite()) {
        anyhow::bail!("{} weights must be finite and non-negative", section);
    }
    let total: f64 = weights.iter().sum();
    if (total - 1.0).abs() > 1e-6 {
        anyhow::bail!("{} weights must sum to 1.0, got {:.3}", section, total);
    }
    Ok(())
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub sync: SyncDetectionConfig,
    #[serde(default)]
    pub co_occurrence: CoOccurrenceConfig,
    #[serde(default)]
    pub funding: FundingConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub leader: LeaderConfig,
    #[serde(default)]
    pub amplification: AmplificationConfig,
    #[serde(default)]
    pub onboarding: OnboardingConfig,
    #[serde(default)]
    pub catchup: CatchupConfig,
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Start with defaults
            .set_default("store.timeout_ms", StoreConfig::default().timeout_ms as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix CLUSTER_)
            .add_source(
                config::Environment::with_prefix("CLUSTER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.store.timeout_ms == 0 {
            anyhow::bail!("store.timeout_ms must be positive");
        }

        // Sync detection
        if self.sync.window_secs == 0 {
            anyhow::bail!("sync.window_secs must be positive");
        }
        if self.sync.min_participants < 2 {
            anyhow::bail!("sync.min_participants must be at least 2");
        }

        // Co-occurrence
        if self.co_occurrence.early_window_secs == 0 {
            anyhow::bail!("co_occurrence.early_window_secs must be positive");
        }
        let co = &self.co_occurrence;
        check_weights(
            "co_occurrence",
            &[co.count_weight, co.recency_weight, co.consistency_weight],
        )?;
        if co.high_threshold > co.very_high_threshold {
            anyhow::bail!("co_occurrence.high_threshold cannot exceed very_high_threshold");
        }

        // Funding
        if self.funding.min_amount < 0.0 {
            anyhow::bail!("funding.min_amount cannot be negative");
        }
        self.funding
            .validate_sources()
            .context("Invalid funding.excluded_sources entry")?;

        // Clustering and leaders
        if self.cluster.min_cluster_size < 2 {
            anyhow::bail!("cluster.min_cluster_size must be at least 2");
        }
        if !(0.0..=1.0).contains(&self.leader.score_threshold) {
            anyhow::bail!("leader.score_threshold must be between 0 and 1");
        }
        if self.leader.max_leaders == 0 {
            anyhow::bail!("leader.max_leaders must be at least 1");
        }
        if self.leader.min_lead_secs > self.leader.first_mover_window_secs {
            anyhow::bail!("leader.min_lead_secs cannot exceed first_mover_window_secs");
        }
        let leader = &self.leader;
        check_weights(
            "leader",
            &[leader.timing_weight, leader.follower_weight, leader.consistency_weight],
        )?;

        // Amplification
        let amp = &self.amplification;
        if amp.max_factor < 1.0 {
            anyhow::bail!("amplification.max_factor must be at least 1.0");
        }
        if amp.base_factor < 1.0 || amp.base_factor > amp.max_factor {
            anyhow::bail!(
                "amplification.base_factor must be between 1.0 and max_factor ({})",
                amp.max_factor
            );
        }
        if !(0.0..=1.0).contains(&amp.min_cluster_strength) {
            anyhow::bail!("amplification.min_cluster_strength must be between 0 and 1");
        }

        // Onboarding and catchup
        if !(0.0..=1.0).contains(&self.onboarding.min_qualifying_score) {
            anyhow::bail!("onboarding.min_qualifying_score must be between 0 and 1");
        }
        if self.onboarding.max_network_size == 0 {
            anyhow::bail!("onboarding.max_network_size must be at least 1");
        }
        if self.catchup.batch_size == 0 || self.catchup.concurrency == 0 {
            anyhow::bail!("catchup.batch_size and catchup.concurrency must be at least 1");
        }

        // Spans turned into chrono durations at runtime
        check_span("sync.window_secs", self.sync.window_secs, 1)?;
        check_span("sync.lookback_hours", self.sync.lookback_hours, 3600)?;
        check_span("co_occurrence.early_window_secs", self.co_occurrence.early_window_secs, 1)?;
        check_span("funding.lookback_hours", self.funding.lookback_hours, 3600)?;
        check_span("leader.lookback_days", self.leader.lookback_days, 86_400)?;
        check_span("leader.first_mover_window_secs", self.leader.first_mover_window_secs, 1)?;
        check_span("amplification.activity_window_secs", self.amplification.activity_window_secs, 1)?;
        check_span("onboarding.history_lookback_hours", self.onboarding.history_lookback_hours, 3600)?;
        check_span("catchup.min_wallet_age_secs", self.catchup.min_wallet_age_secs, 1)?;
        check_span("catchup.interval_secs", self.catchup.interval_secs, 1)?;

        Ok(())
    }

    /// Effective configuration for display
    pub fn display(&self) -> String {
        format!(
            r#"Configuration:
  Store:
    timeout: {}ms
    snapshot: {}
  Sync Detection:
    window: {}s
    lookback: {}h
    high_frequency_threshold: {}
  Co-occurrence:
    early_window: {}s
    weights: count {} / recency {} / consistency {}
  Funding:
    min_amount: {} SOL
    lookback: {}h
    excluded_sources: {}
  Clustering:
    min_cluster_size: {}
    leader_threshold: {}
    max_leaders: {}
    leader_weights: timing {} / followers {} / consistency {}
  Amplification:
    base: {}x, max: {}x
    min_active_members: {}
    activity_window: {}s
  Onboarding:
    max_depth: {}
    max_network_size: {}
    min_qualifying_score: {}
  Catchup:
    enabled: {}
    interval: {}s
    batch_size: {}
"#,
            self.store.timeout_ms,
            self.store.snapshot_path.as_deref().unwrap_or("(none)"),
            self.sync.window_secs,
            self.sync.lookback_hours,
            self.sync.high_frequency_threshold,
            self.co_occurrence.early_window_secs,
            self.co_occurrence.count_weight,
            self.co_occurrence.recency_weight,
            self.co_occurrence.consistency_weight,
            self.funding.min_amount,
            self.funding.lookback_hours,
            self.funding.excluded_sources.len(),
            self.cluster.min_cluster_size,
            self.leader.score_threshold,
            self.leader.max_leaders,
            self.leader.timing_weight,
            self.leader.follower_weight,
            self.leader.consistency_weight,
            self.amplification.base_factor,
            self.amplification.max_factor,
            self.amplification.min_active_members,
            self.amplification.activity_window_secs,
            self.onboarding.max_depth,
            self.onboarding.max_network_size,
            self.onboarding.min_qualifying_score,
            self.catchup.enabled,
            self.catchup.interval_secs,
            self.catchup.batch_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.timeout_ms, 2000);
        assert_eq!(config.sync.window_secs, 300);
        assert_eq!(config.co_occurrence.early_window_secs, 600);
        assert_eq!(config.funding.lookback_hours, 168);
        assert_eq!(config.cluster.min_cluster_size, 3);
        assert_eq!(config.amplification.max_factor, 1.8);
        assert_eq!(config.onboarding.max_depth, 1);
        assert_eq!(config.catchup.batch_size, 50);
    }

    #[test]
    fn test_load_from_file_with_partial_sections() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[sync]
window_secs = 120

[funding]
excluded_sources = ["5Q544fKrFoe6tsEbD7S8EmxGTJYAKtTVhAW5Q5pge4j1"]

[onboarding]
max_depth = 2
"#
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.sync.window_secs, 120);
        assert_eq!(config.sync.lookback_hours, 24);
        assert_eq!(config.funding.excluded_sources.len(), 1);
        assert_eq!(config.onboarding.max_depth, 2);
        assert_eq!(config.leader.max_leaders, 3);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.store.timeout_ms, 2000);
    }

    #[test]
    fn test_rejects_invalid_excluded_source() {
        let mut config = Config::default();
        config.funding.excluded_sources = vec!["not-an-address".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_weights_and_factors() {
        let mut config = Config::default();
        config.co_occurrence.count_weight = 0.9;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.amplification.base_factor = 2.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.catchup.concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_leader_weights() {
        let mut config = Config::default();
        config.leader.timing_weight = 0.5;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.leader.timing_weight = 1.3;
        config.leader.follower_weight = -0.3;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.leader.timing_weight = 0.5;
        config.leader.follower_weight = 0.2;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_oversized_spans() {
        let mut config = Config::default();
        config.sync.lookback_hours = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.leader.lookback_days = 1_000_000;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.amplification.activity_window_secs = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.onboarding.history_lookback_hours = 10 * 365 * 24;
        assert!(config.validate().is_ok());
        config.onboarding.history_lookback_hours += 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_display_mentions_sections() {
        let text = Config::default().display();
        assert!(text.contains("Sync Detection"));
        assert!(text.contains("timeout: 2000ms"));
    }
}
