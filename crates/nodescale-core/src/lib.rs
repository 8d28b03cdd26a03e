//! nodescale-core — the cluster object model shared by every NodeScale
//! component.
//!
//! # Contents
//!
//! - [`types`]: nodes, pods, taints, tolerations, affinity and topology
//!   spread constraints, daemon sets and disruption budgets.
//! - [`resources`]: resource vectors and fit arithmetic.
//! - [`selector`]: label and node selectors.
//! - [`pod`]: pod classification (mirror, daemon-like, terminal, ...).
//! - [`taints`]: autoscaler taints and template taint sanitization.
//! - [`config`]: the TOML configuration file.

pub mod config;
pub mod pod;
pub mod resources;
pub mod selector;
pub mod taints;
pub mod types;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{AutoscalerConfig, ConfigError, ConfigResult};
pub use resources::Resources;
pub use selector::{LabelSelector, NodeSelector};
pub use taints::TaintConfig;
pub use types::*;

use std::time::{SystemTime, UNIX_EPOCH};

pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
