//! nodescale-predicates — scheduler predicates evaluated against a cluster
//! snapshot.
//!
//! The [`PredicateChecker`] runs an ordered list of [`FilterPlugin`]s:
//! resource fit, host ports, taint toleration, node affinity, topology
//! spread and inter-pod affinity. Each plugin computes per-pod state once
//! and then filters candidate nodes.
//!
//! [`HintingSimulator`] builds on the checker to place batches of pods into
//! a snapshot, caching the last node each pod fit on.

pub mod checker;
pub mod error;
pub mod hinting;
pub mod plugins;

pub use checker::{PredicateChecker, NO_FIT_PREDICATE};
pub use error::{PredicateError, PredicateErrorKind, PredicateResult, SchedulingError};
pub use hinting::{HintingSimulator, ScheduledPod};
pub use plugins::{CycleState, FilterPlugin, FilterStatus};
