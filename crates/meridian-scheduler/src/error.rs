//! Error types for the scheduler.

use meridian_ranktable::RankTableError;
use thiserror::Error;

/// Scheduler errors.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// Job carries no schedule-policy annotation.
    #[error("job {job} has no schedule policy")]
    MissingPolicy { job: String },

    /// Schedule policy is unknown or disabled.
    #[error("unknown schedule policy: {0}")]
    UnknownPolicy(String),

    /// Job or task request is malformed.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// Inventory snapshot violates a construction invariant.
    #[error("invalid inventory: {0}")]
    InvalidInventory(String),

    /// Node is not in the snapshot.
    #[error("node not found: {0}")]
    NodeNotFound(String),

    /// Node cannot provide the requested chips.
    #[error("node {node} cannot provide {requested} chips")]
    InsufficientChips { node: String, requested: usize },

    /// No candidate node fits the task.
    #[error("no feasible node for task {task}")]
    NoFeasibleNode { task: String },

    /// Slice count exceeds what a Tor can hold.
    #[error("slice number {slice_num} exceeds maximum {max}")]
    SliceNumExceeded { slice_num: usize, max: usize },

    /// Not enough full Tors for the job's shape.
    #[error("not enough tors for job {job} with {task_num} tasks")]
    InsufficientTors { job: String, task_num: usize },

    /// No virtual-chip template matches the request.
    #[error("no vNPU template matches {aicore} aicore / {memory_mb} MB")]
    NoMatchingTemplate { aicore: u32, memory_mb: u64 },

    /// Node lacks a free slice or fraction for the template.
    #[error("node {node} cannot host vNPU template {template}")]
    InsufficientVnpu { node: String, template: String },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Rank-table error.
    #[error("rank table error: {0}")]
    RankTable(#[from] RankTableError),

    /// Serialisation error.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broad class of a scheduler error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Policy or request is wrong; the job stays unschedulable.
    Policy,
    /// The fleet cannot currently fit the task.
    Capacity,
    /// Stored state disagrees with the request.
    Consistency,
    /// Environment failure outside placement logic.
    Internal,
}

impl SchedulerError {
    /// Classifies the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::MissingPolicy { .. }
            | Self::UnknownPolicy(_)
            | Self::InvalidJob(_)
            | Self::InvalidInventory(_)
            | Self::Config(_) => ErrorKind::Policy,
            Self::InsufficientChips { .. }
            | Self::NoFeasibleNode { .. }
            | Self::SliceNumExceeded { .. }
            | Self::InsufficientTors { .. }
            | Self::NoMatchingTemplate { .. }
            | Self::InsufficientVnpu { .. } => ErrorKind::Capacity,
            Self::NodeNotFound(_) | Self::RankTable(_) => ErrorKind::Consistency,
            Self::Serialisation(_) | Self::Io(_) => ErrorKind::Internal,
        }
    }
}

/// Result type for scheduler operations.
pub type Result<T> = std::result::Result<T, SchedulerError>;
