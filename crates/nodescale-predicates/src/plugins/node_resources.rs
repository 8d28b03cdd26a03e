//! CPU, memory, ephemeral storage, extended resources and pod count.

use nodescale_core::{Pod, Resources};
use nodescale_snapshot::{ClusterSnapshot, NodeInfo};

use super::{CycleState, FilterPlugin, FilterStatus};

const STATE_KEY: &str = "NodeResourcesFit";

pub struct NodeResourcesFit;

impl FilterPlugin for NodeResourcesFit {
    fn name(&self) -> &'static str {
        "NodeResourcesFit"
    }

    fn pre_filter(
        &self,
        _snapshot: &dyn ClusterSnapshot,
        pod: &Pod,
        state: &mut CycleState,
    ) -> Result<(), String> {
        state.write(STATE_KEY, pod.requests());
        Ok(())
    }

    fn filter(&self, state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> FilterStatus {
        let computed;
        let requests = match state.read::<Resources>(STATE_KEY) {
            Some(r) => r,
            None => {
                computed = pod.requests();
                &computed
            }
        };
        let allocatable = &node_info.node().allocatable;

        let mut reasons = Vec::new();
        if node_info.pods().len() as i64 + 1 > allocatable.pods {
            reasons.push("Too many pods".to_string());
        }
        reasons.extend(
            requests
                .insufficient(node_info.requested(), allocatable)
                .into_iter()
                .map(|r| format!("Insufficient {r}")),
        );

        if reasons.is_empty() {
            FilterStatus::Success
        } else {
            FilterStatus::Unschedulable(reasons)
        }
    }
}
