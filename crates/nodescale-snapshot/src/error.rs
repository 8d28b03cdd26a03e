//! Error types for snapshot mutation.

use thiserror::Error;

/// Result type alias for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Structural errors. A failed mutation leaves the snapshot unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SnapshotError {
    #[error("node {0} already exists in snapshot")]
    NodeAlreadyExists(String),

    #[error("node {0} not found in snapshot")]
    NodeNotFound(String),

    #[error("pod {pod} not found on node {node}")]
    PodNotFound { pod: String, node: String },

    #[error("pod uid {uid} is already scheduled on node {node}")]
    DuplicatePodUid { uid: String, node: String },

    #[error("snapshot is already forked")]
    AlreadyForked,
}
