//! Cluster formation
//!
//! Candidates either join the active cluster one of them already belongs to,
//! or form a new cluster once there are enough of them. Clusters only grow.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::Result;
use crate::graph::store::{bounded, ClusterCreation, GraphStore};

/// Configuration for cluster grouping
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Minimum candidates required to create a new cluster
    #[serde(default = "default_min_cluster_size")]
    pub min_cluster_size: usize,
}

fn default_min_cluster_size() -> usize {
    3
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: default_min_cluster_size(),
        }
    }
}

/// Result of a grouping attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum GroupingOutcome {
    /// Candidates were unioned into an existing cluster
    Extended {
        cluster_id: String,
        added: usize,
        size: usize,
    },
    /// A new cluster was created
    Created { cluster_id: String, size: usize },
    /// Too few candidates and no existing cluster
    NotFormed { candidates: usize },
}

impl GroupingOutcome {
    pub fn cluster_id(&self) -> Option<&str> {
        match self {
            GroupingOutcome::Extended { cluster_id, .. } | GroupingOutcome::Created { cluster_id, .. } => {
                Some(cluster_id)
            }
            GroupingOutcome::NotFormed { .. } => None,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            GroupingOutcome::Extended { size, .. } | GroupingOutcome::Created { size, .. } => *size,
            GroupingOutcome::NotFormed { .. } => 0,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, GroupingOutcome::Created { .. })
    }

    /// A cluster was created or gained members
    pub fn changed_membership(&self) -> bool {
        match self {
            GroupingOutcome::Created { .. } => true,
            GroupingOutcome::Extended { added, .. } => *added > 0,
            GroupingOutcome::NotFormed { .. } => false,
        }
    }
}

/// Groups candidate wallets into clusters
pub struct ClusterGrouper {
    config: ClusterConfig,
    store: Arc<dyn GraphStore>,
    timeout: Duration,
}

impl ClusterGrouper {
    pub fn new(config: ClusterConfig, store: Arc<dyn GraphStore>, timeout: Duration) -> Self {
        Self {
            config,
            store,
            timeout,
        }
    }

    /// Extend the cluster any candidate belongs to, or create one
    pub async fn form_or_extend(&self, candidates: &[String]) -> Result<GroupingOutcome> {
        let mut seen = HashSet::new();
        let unique: Vec<String> = candidates
            .iter()
            .filter(|c| seen.insert(c.as_str()))
            .cloned()
            .collect();

        if unique.is_empty() {
            return Ok(GroupingOutcome::NotFormed { candidates: 0 });
        }

        let existing = bounded(
            self.timeout,
            "find_cluster_for_any",
            self.store.find_cluster_for_any(&unique),
        )
        .await?;

        if let Some(cluster) = existing {
            let added = bounded(
                self.timeout,
                "add_cluster_members",
                self.store.add_cluster_members(&cluster.id, &unique),
            )
            .await?;
            let size = cluster.size() + added;
            if added > 0 {
                info!(cluster = %cluster.id, added = added, size = size, "Cluster extended");
            }
            return Ok(GroupingOutcome::Extended {
                cluster_id: cluster.id,
                added,
                size,
            });
        }

        if unique.len() < self.config.min_cluster_size {
            debug!(
                candidates = unique.len(),
                min = self.config.min_cluster_size,
                "Not enough candidates to form a cluster"
            );
            return Ok(GroupingOutcome::NotFormed {
                candidates: unique.len(),
            });
        }

        let creation = bounded(
            self.timeout,
            "create_cluster",
            self.store.create_cluster(&unique),
        )
        .await?;

        Ok(match creation {
            ClusterCreation::Created(cluster) => {
                info!(cluster = %cluster.id, size = cluster.size(), "Cluster created");
                GroupingOutcome::Created {
                    size: cluster.size(),
                    cluster_id: cluster.id,
                }
            }
            ClusterCreation::Merged { cluster, added } => GroupingOutcome::Extended {
                size: cluster.size(),
                cluster_id: cluster.id,
                added,
            },
        })
    }
}
