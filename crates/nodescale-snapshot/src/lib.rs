//! nodescale-snapshot — in-memory model of cluster nodes and pods used for
//! what-if scheduling.
//!
//! # Architecture
//!
//! [`ClusterSnapshot`] is the contract. Two implementations share it:
//!
//! - [`DeltaSnapshot`] keeps added/modified/deleted overlays above a base
//!   map, so opening a fork costs nothing and commit touches only what
//!   changed. This is the one the decision loop uses.
//! - [`BasicSnapshot`] copies the whole node map on fork. It is simpler and
//!   serves as a reference for the delta shape in tests.
//!
//! Both allow a single open fork. Nested forks are rejected.

pub mod basic;
pub mod delta;
pub mod error;
pub mod node_info;
pub mod snapshot;

pub use basic::BasicSnapshot;
pub use delta::DeltaSnapshot;
pub use error::{SnapshotError, SnapshotResult};
pub use node_info::NodeInfo;
pub use snapshot::{ClusterSnapshot, NodeInfoList};
