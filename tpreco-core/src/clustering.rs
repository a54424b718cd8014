//! Clustering configuration and statistics.

use crate::error::ClusteringError;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;

/// Configuration for the per-plane clustering engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusteringConfig {
    /// Time-gap tolerance (TPC ticks).
    pub tick_limit: u32,
    /// Channel-adjacency tolerance (wires).
    pub channel_limit: u32,
    /// Minimum number of TPs to keep a cluster.
    pub min_tps_to_cluster: usize,
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            tick_limit: 3,
            channel_limit: 1,
            min_tps_to_cluster: 1,
        }
    }
}

impl ClusteringConfig {
    /// Creates a new clustering configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the time-gap tolerance.
    #[must_use]
    pub fn with_tick_limit(mut self, ticks: u32) -> Self {
        self.tick_limit = ticks;
        self
    }

    /// Sets the channel-adjacency tolerance.
    #[must_use]
    pub fn with_channel_limit(mut self, channels: u32) -> Self {
        self.channel_limit = channels;
        self
    }

    /// Sets the minimum cluster size.
    #[must_use]
    pub fn with_min_tps_to_cluster(mut self, size: usize) -> Self {
        self.min_tps_to_cluster = size;
        self
    }

    /// Checks parameter ranges.
    ///
    /// # Errors
    /// Returns an error if `min_tps_to_cluster` is 0.
    pub fn validate(&self) -> Result<(), ClusteringError> {
        if self.min_tps_to_cluster == 0 {
            return Err(ClusteringError::InvalidParameter(
                "min_tps_to_cluster must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Counters accumulated by the clustering engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusteringStatistics {
    /// TPs fed to the engine.
    pub tps_processed: usize,
    /// Candidates opened.
    pub candidates_opened: usize,
    /// Clusters emitted.
    pub clusters_found: usize,
    /// Candidates dropped for being below the size threshold.
    pub candidates_discarded: usize,
    /// Candidate rejections caused by the same-wire veto.
    pub same_wire_vetoes: usize,
}

impl AddAssign for ClusteringStatistics {
    fn add_assign(&mut self, other: Self) {
        self.tps_processed += other.tps_processed;
        self.candidates_opened += other.candidates_opened;
        self.clusters_found += other.clusters_found;
        self.candidates_discarded += other.candidates_discarded;
        self.same_wire_vetoes += other.same_wire_vetoes;
    }
}
