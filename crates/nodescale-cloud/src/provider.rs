//! The contract the autoscaler expects from a cloud provider.
//!
//! Every call is synchronous. Callers that fan out across node groups move
//! the calls onto blocking worker threads (see [`crate::cache`]).

use std::sync::Arc;

use nodescale_core::{Node, Pod, Timestamp};
use nodescale_snapshot::NodeInfo;
use serde::{Deserialize, Serialize};

use crate::error::CloudResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    #[default]
    Running,
    Creating,
    Deleting,
}

/// A machine backing (or about to back) a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    /// Provider id, matching `Node::provider_id` once registered.
    pub id: String,
    #[serde(default)]
    pub state: InstanceState,
    /// Set when the provider failed to create or delete the instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Instance {
    pub fn running(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: InstanceState::Running,
            error: None,
        }
    }
}

pub trait NodeGroup: Send + Sync {
    fn id(&self) -> String;

    fn min_size(&self) -> i64;

    fn max_size(&self) -> i64;

    /// Desired size. May differ from the number of registered nodes while
    /// instances are being created or deleted.
    fn target_size(&self) -> CloudResult<i64>;

    fn nodes(&self) -> CloudResult<Vec<Instance>>;

    /// A node shaped like a fresh member of this group, with the pods it
    /// would start with.
    fn template_node_info(&self) -> CloudResult<NodeInfo>;

    fn exist(&self) -> bool;

    fn autoprovisioned(&self) -> bool;

    fn create(&self) -> CloudResult<Arc<dyn NodeGroup>>;

    fn delete(&self) -> CloudResult<()>;

    fn increase_size(&self, delta: i64) -> CloudResult<()>;

    /// Lower the target without deleting registered nodes.
    fn decrease_target_size(&self, delta: i64) -> CloudResult<()>;
}

pub trait PricingModel: Send + Sync {
    fn node_price(&self, node: &Node, start: Timestamp, end: Timestamp) -> CloudResult<f64>;

    fn pod_price(&self, pod: &Pod, start: Timestamp, end: Timestamp) -> CloudResult<f64>;
}

pub trait CloudProvider: Send + Sync {
    fn name(&self) -> &str;

    fn node_groups(&self) -> Vec<Arc<dyn NodeGroup>>;

    /// `None` when the node is not autoscaled.
    fn node_group_for_node(&self, node: &Node) -> CloudResult<Option<Arc<dyn NodeGroup>>>;

    fn pricing(&self) -> CloudResult<Arc<dyn PricingModel>>;
}
