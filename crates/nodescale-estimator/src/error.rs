//! Error types for the estimator crate.

use nodescale_predicates::{PredicateError, SchedulingError};
use nodescale_snapshot::SnapshotError;

pub type EstimatorResult<T> = Result<T, EstimatorError>;

/// Failures that abort an estimation. A pod that does not fit is not an
/// error; it is simply left out of the result.
#[derive(Debug, thiserror::Error)]
pub enum EstimatorError {
    #[error("snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("internal predicate error: {0}")]
    Predicate(#[from] PredicateError),
}

impl From<SchedulingError> for EstimatorError {
    fn from(err: SchedulingError) -> Self {
        match err {
            SchedulingError::Predicate(e) => EstimatorError::Predicate(e),
            SchedulingError::Snapshot(e) => EstimatorError::Snapshot(e),
        }
    }
}
