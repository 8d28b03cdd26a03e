//! nodescale-estimator — how many nodes a node group needs for a set of
//! pending pods.
//!
//! [`BinpackingEstimator`] runs first-fit-decreasing over copies of a
//! template node inside a snapshot fork. A [`ThresholdBasedLimiter`]
//! combines the static, cluster-capacity and sibling-capacity thresholds
//! into one cap on nodes and time per estimation.

pub mod binpacking;
pub mod error;
pub mod limiter;
pub mod threshold;

pub use binpacking::{order_pods, pod_score, BinpackingEstimator, EstimationResult};
pub use error::{EstimatorError, EstimatorResult};
pub use limiter::{EstimationLimiter, ThresholdBasedLimiter};
pub use threshold::{
    ClusterCapacityThreshold, EstimationContext, SiblingCapacityThreshold, StaticThreshold, Threshold,
};
