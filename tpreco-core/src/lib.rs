//! tpreco-core: Core types for trigger-primitive reconstruction.
//!
//! This crate provides the data model shared by the clustering, matching
//! and persistence stages: trigger primitives with embedded truth, the
//! detector geometry and unit conversions, the per-file TP arena and
//! single-plane clusters.
//!

pub mod cluster;
pub mod clustering;
pub mod error;
pub mod geometry;
pub mod range;
pub mod store;
pub mod tp;

pub use cluster::{Cluster, ClusterId, ClusterTruth, MatchId, MatchType};
pub use clustering::{ClusteringConfig, ClusteringStatistics};
pub use error::{ClusteringError, Error, Result};
pub use geometry::DetectorGeometry;
pub use range::TimeRange;
pub use store::{TpIndex, TpStore};
pub use tp::{TriggerPrimitive, TruthInfo, View, SIGNAL_GENERATOR, UNKNOWN_GENERATOR};
