//! Scale-up limits.
//!
//! A [`Threshold`] caps one estimation. Node limits use `0` for
//! "unlimited", a positive bound, or `-1` for "no capacity left". Duration
//! limits use `Duration::ZERO` for "unlimited".

use std::sync::Arc;
use std::time::Duration;

use nodescale_cloud::NodeGroup;
use tracing::{debug, error};

/// What a threshold may look at besides the node group being scaled.
#[derive(Clone, Default)]
pub struct EstimationContext {
    /// Groups that could take the same pods. The scaled group is not listed.
    pub similar_node_groups: Vec<Arc<dyn NodeGroup>>,
    pub current_node_count: usize,
    /// `0` means the cluster has no node limit.
    pub cluster_max_node_count: i64,
}

impl EstimationContext {
    pub fn new(current_node_count: usize, cluster_max_node_count: i64) -> Self {
        Self {
            similar_node_groups: Vec::new(),
            current_node_count,
            cluster_max_node_count,
        }
    }

    pub fn with_similar_node_groups(mut self, groups: Vec<Arc<dyn NodeGroup>>) -> Self {
        self.similar_node_groups = groups;
        self
    }
}

pub trait Threshold: Send + Sync {
    fn node_limit(&self, group: &dyn NodeGroup, ctx: &EstimationContext) -> i64;
    fn duration_limit(&self, group: &dyn NodeGroup, ctx: &EstimationContext) -> Duration;
}

/// Fixed limits from configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaticThreshold {
    pub max_nodes: i64,
    pub max_duration: Duration,
}

impl StaticThreshold {
    pub fn new(max_nodes: i64, max_duration: Duration) -> Self {
        Self {
            max_nodes,
            max_duration,
        }
    }
}

impl Threshold for StaticThreshold {
    fn node_limit(&self, _: &dyn NodeGroup, _: &EstimationContext) -> i64 {
        self.max_nodes
    }

    fn duration_limit(&self, _: &dyn NodeGroup, _: &EstimationContext) -> Duration {
        self.max_duration
    }
}

/// Room left under the cluster-wide node limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClusterCapacityThreshold;

impl Threshold for ClusterCapacityThreshold {
    fn node_limit(&self, _: &dyn NodeGroup, ctx: &EstimationContext) -> i64 {
        let max = ctx.cluster_max_node_count;
        if max == 0 {
            return 0;
        }
        let left = max - ctx.current_node_count as i64;
        if max < 0 || left <= 0 {
            return -1;
        }
        left
    }

    fn duration_limit(&self, _: &dyn NodeGroup, _: &EstimationContext) -> Duration {
        Duration::ZERO
    }
}

/// Room left across the scaled group and its similar groups.
#[derive(Debug, Clone, Copy, Default)]
pub struct SiblingCapacityThreshold;

impl Threshold for SiblingCapacityThreshold {
    fn node_limit(&self, group: &dyn NodeGroup, ctx: &EstimationContext) -> i64 {
        let groups = std::iter::once(group).chain(ctx.similar_node_groups.iter().map(|g| g.as_ref()));
        let mut capacity = 0i64;
        let mut counted = 0usize;
        for g in groups {
            match g.target_size() {
                Ok(target) => {
                    capacity += (g.max_size() - target).max(0);
                    counted += 1;
                }
                Err(err) => {
                    error!(node_group = %g.id(), error = %err, "cannot read target size");
                }
            }
        }
        if counted == 0 {
            return 0;
        }
        debug!(node_group = %group.id(), capacity, "sibling group capacity");
        if capacity == 0 { -1 } else { capacity }
    }

    fn duration_limit(&self, _: &dyn NodeGroup, _: &EstimationContext) -> Duration {
        Duration::ZERO
    }
}
