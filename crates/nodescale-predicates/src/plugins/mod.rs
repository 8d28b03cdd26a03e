//! Filter plugins.
//!
//! Each plugin may compute per-pod state once in [`FilterPlugin::pre_filter`]
//! and then answers [`FilterPlugin::filter`] for every candidate node. The
//! state lives in a [`CycleState`] owned by the checker for one pod.

use std::any::Any;
use std::collections::HashMap;

use nodescale_core::Pod;
use nodescale_snapshot::{ClusterSnapshot, NodeInfo};

pub mod inter_pod_affinity;
pub mod node_affinity;
pub mod node_ports;
pub mod node_resources;
pub mod taint_toleration;
pub mod topology_spread;

pub use inter_pod_affinity::InterPodAffinity;
pub use node_affinity::NodeAffinity;
pub use node_ports::NodePorts;
pub use node_resources::NodeResourcesFit;
pub use taint_toleration::TaintToleration;
pub use topology_spread::PodTopologySpread;

/// Outcome of a single filter call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterStatus {
    Success,
    Unschedulable(Vec<String>),
    Error(String),
}

impl FilterStatus {
    pub fn unschedulable(reason: impl Into<String>) -> Self {
        FilterStatus::Unschedulable(vec![reason.into()])
    }
}

/// Per-pod scratch space shared between `pre_filter` and `filter`.
#[derive(Default)]
pub struct CycleState {
    data: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl CycleState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write<T: Any + Send + Sync>(&mut self, key: &'static str, value: T) {
        self.data.insert(key, Box::new(value));
    }

    pub fn read<T: Any + Send + Sync>(&self, key: &'static str) -> Option<&T> {
        self.data.get(key).and_then(|v| v.downcast_ref::<T>())
    }
}

pub trait FilterPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Compute state reused by every `filter` call for `pod`.
    fn pre_filter(
        &self,
        _snapshot: &dyn ClusterSnapshot,
        _pod: &Pod,
        _state: &mut CycleState,
    ) -> Result<(), String> {
        Ok(())
    }

    fn filter(&self, state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> FilterStatus;
}

/// The scheduler filter set, in evaluation order.
pub fn default_plugins() -> Vec<Box<dyn FilterPlugin>> {
    vec![
        Box::new(NodeResourcesFit),
        Box::new(NodePorts),
        Box::new(TaintToleration),
        Box::new(NodeAffinity),
        Box::new(PodTopologySpread),
        Box::new(InterPodAffinity),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_state_is_typed() {
        let mut state = CycleState::new();
        state.write("count", 3usize);
        assert_eq!(state.read::<usize>("count"), Some(&3));
        assert_eq!(state.read::<u32>("count"), None);
        assert_eq!(state.read::<usize>("missing"), None);
    }

    #[test]
    fn default_plugin_order() {
        let names: Vec<_> = default_plugins().iter().map(|p| p.name()).collect();
        assert_eq!(
            names,
            vec![
                "NodeResourcesFit",
                "NodePorts",
                "TaintToleration",
                "NodeAffinity",
                "PodTopologySpread",
                "InterPodAffinity"
            ]
        );
    }
}
