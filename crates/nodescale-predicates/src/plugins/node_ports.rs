//! Host port conflicts.

use nodescale_core::Pod;
use nodescale_snapshot::NodeInfo;

use super::{CycleState, FilterPlugin, FilterStatus};

pub struct NodePorts;

impl FilterPlugin for NodePorts {
    fn name(&self) -> &'static str {
        "NodePorts"
    }

    fn filter(&self, _state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> FilterStatus {
        let wanted = pod.host_ports();
        let conflict = wanted
            .iter()
            .any(|w| node_info.used_ports().iter().any(|u| w.conflicts_with(u)));
        if conflict {
            FilterStatus::unschedulable("node(s) didn't have free ports for the requested pod ports")
        } else {
            FilterStatus::Success
        }
    }
}
