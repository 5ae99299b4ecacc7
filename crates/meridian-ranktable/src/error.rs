//! Error types for rank-table assembly.

use thiserror::Error;

/// Rank-table errors.
#[derive(Error, Debug)]
pub enum RankTableError {
    /// The rank index carried by a pod is not a decimal integer.
    #[error("rank index {0:?} is not a valid integer")]
    InvalidRankIndex(String),

    /// The rank index parsed but is outside the accepted range.
    #[error("rank index {index} out of range 0..={max}")]
    RankIndexOutOfRange { index: i64, max: i64 },

    /// The instance declares more devices than one server can hold.
    #[error("device count {count} exceeds the per-server maximum {max}")]
    TooManyDevices { count: usize, max: usize },

    /// The instance yielded no devices.
    #[error("{namespace}/{name} has no devices")]
    NoDevices { namespace: String, name: String },

    /// No cached server belongs to the pod.
    #[error("no data of pod {namespace}/{pod_id} can be removed")]
    PodNotFound { namespace: String, pod_id: String },

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),
}

/// Result type for rank-table operations.
pub type Result<T> = std::result::Result<T, RankTableError>;
