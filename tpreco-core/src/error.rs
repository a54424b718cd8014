//! Error types for tpreco-core.

use crate::tp::View;
use thiserror::Error;

/// Result type alias for tpreco operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for tpreco operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Stored view disagrees with the view derived from the channel layout.
    #[error("invalid view for detector channel {detector_channel}: stored {stored}, derived {derived:?}")]
    InvalidView {
        detector_channel: u32,
        stored: View,
        derived: Option<View>,
    },

    /// Cluster members come from more than one event.
    #[error("cluster mixes events {expected} and {found}")]
    MixedEvents { expected: u32, found: u32 },

    /// Cluster members come from more than one view.
    #[error("cluster mixes views {expected} and {found}")]
    MixedViews { expected: View, found: View },

    /// Empty cluster error.
    #[error("cannot build a cluster without trigger primitives")]
    EmptyCluster,

    /// Reference to a TP that is not in the store.
    #[error("unknown trigger primitive index: {0}")]
    UnknownTp(u32),

    /// Reference to a cluster that is not part of the file.
    #[error("unknown cluster id: {0}")]
    UnknownCluster(u32),

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Clustering error.
    #[error("clustering error: {0}")]
    Clustering(#[from] ClusteringError),
}

/// Contract violations reported by the clustering engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClusteringError {
    /// Input TPs span more than one event.
    #[error("clustering input spans events {first} and {other}")]
    MixedEvents { first: u32, other: u32 },

    /// Input TPs span more than one view.
    #[error("clustering input spans views {first} and {other}")]
    MixedViews { first: View, other: View },

    /// A TP's stored view does not match its channel.
    #[error("TP on detector channel {detector_channel} is not a valid {stored} hit")]
    InvalidView { detector_channel: u32, stored: View },

    /// Reference to a TP that is not in the store.
    #[error("unknown trigger primitive index: {0}")]
    UnknownTp(u32),

    /// Invalid engine parameter.
    #[error("invalid clustering parameter: {0}")]
    InvalidParameter(String),
}
