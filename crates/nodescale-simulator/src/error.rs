//! Error types for the simulator crate.

use nodescale_cloud::CloudProviderError;
use nodescale_predicates::{PredicateError, SchedulingError};
use nodescale_snapshot::SnapshotError;

pub type SimulatorResult<T> = Result<T, SimulatorError>;

#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("predicate error: {0}")]
    Predicate(#[from] PredicateError),

    #[error("cloud provider error: {0}")]
    CloudProvider(#[from] CloudProviderError),

    #[error("failed to sanitize template node: {0}")]
    Sanitize(String),

    #[error("node {node} has no allocatable {resource}")]
    ZeroAllocatable { node: String, resource: &'static str },
}

impl From<SchedulingError> for SimulatorError {
    fn from(err: SchedulingError) -> Self {
        match err {
            SchedulingError::Predicate(e) => SimulatorError::Predicate(e),
            SchedulingError::Snapshot(e) => SimulatorError::Snapshot(e),
        }
    }
}
