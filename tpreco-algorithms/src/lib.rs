//! tpreco-algorithms: Reconstruction stages for trigger primitives.
//!
//! This crate provides the per-file reconstruction chain:
//! - **Clustering** - channel/time grouping of TPs on one plane of one event
//! - **Selection** - one main (signal, highest-energy) cluster per event and plane
//! - **Matching** - binding main X clusters to U and V clusters by time, event and APA
//! - **Join** - merging the clusters of a match and restamping their TPs
//!
#![warn(missing_docs)]

pub mod adjacency;
mod clustering;
mod config;
pub mod diagnostics;
mod join;
mod matching;
mod pipeline;
mod selection;

pub use clustering::{TpClustering, TpClusteringState};
pub use config::{CutConfig, PipelineConfig};
pub use diagnostics::{EventDeltaHistogram, MatchDiagnostics, PlaneRejections, RejectReason};
pub use join::{join_match, stamp_match_event, JoinedCluster};
pub use matching::{are_compatible, sort_for_matching, Match, MatchOutcome, Matcher, MatchingConfig};
pub use pipeline::{reconstruct_file, FileReconstruction, PipelineStatistics, PlaneClusters};
pub use selection::select_main_clusters;

// Re-export core clustering types
pub use tpreco_core::clustering::{ClusteringConfig, ClusteringStatistics};
