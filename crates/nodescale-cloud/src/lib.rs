//! nodescale-cloud — what the autoscaler needs from a cloud provider.
//!
//! - [`provider`]: the `CloudProvider`, `NodeGroup` and `PricingModel`
//!   traits plus the `Instance` record.
//! - [`static_provider`]: an in-memory provider for fixtures and tests.
//! - [`cache`]: the node-instance cache and its refresh loop.

pub mod cache;
pub mod error;
pub mod provider;
pub mod static_provider;

pub use cache::NodeInstancesCache;
pub use error::{CloudProviderError, CloudResult};
pub use provider::{CloudProvider, Instance, InstanceState, NodeGroup, PricingModel};
pub use static_provider::{LinearPricing, StaticCloudProvider, StaticNodeGroup};
