//! `nodeSelector` and required node affinity.

use nodescale_core::{Node, Pod};
use nodescale_snapshot::NodeInfo;

use super::{CycleState, FilterPlugin, FilterStatus};

pub struct NodeAffinity;

/// Whether `node` satisfies the pod's node selector and required node
/// affinity.
pub fn pod_matches_node(pod: &Pod, node: &Node) -> bool {
    let selector_ok = pod
        .node_selector
        .iter()
        .all(|(k, v)| node.labels.get(k) == Some(v));
    if !selector_ok {
        return false;
    }
    match pod
        .affinity
        .as_ref()
        .and_then(|a| a.node_affinity.as_ref())
        .and_then(|na| na.required.as_ref())
    {
        Some(required) => required.matches(node),
        None => true,
    }
}

impl FilterPlugin for NodeAffinity {
    fn name(&self) -> &'static str {
        "NodeAffinity"
    }

    fn filter(&self, _state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> FilterStatus {
        if pod_matches_node(pod, node_info.node()) {
            FilterStatus::Success
        } else {
            FilterStatus::unschedulable("node(s) didn't match Pod's node affinity/selector")
        }
    }
}
