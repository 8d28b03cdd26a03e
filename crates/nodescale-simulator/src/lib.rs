//! nodescale-simulator — what-if simulations over a cluster snapshot.
//!
//! - [`drain`]: drainability rules, PDB budget tracking and drain planning.
//! - [`removal`]: simulates removing nodes by moving their pods elsewhere.
//! - [`template`]: builds and sanitizes template nodes for node groups.
//! - [`utilization`]: requested-over-allocatable per node.

pub mod drain;
pub mod error;
pub mod removal;
pub mod template;
pub mod utilization;

pub use drain::{
    plan_drain, BlockingPod, BlockingPodReason, ControllerLister, ControllerLookup, DrainOptions,
    DrainPlan, DrainStatus, RemainingPdbTracker, StaticControllerLister,
};
pub use error::{SimulatorError, SimulatorResult};
pub use removal::{NodeToBeRemoved, RemovalSimulator, UnremovableNode, UnremovableReason};
pub use template::{
    node_info_sanitized_deep_copy, sanitize_node_info, template_node_info_from_example,
    template_node_info_from_node_group, TEMPLATE_NODE_PREFIX,
};
pub use utilization::{utilization, UtilizationInfo};
