//! NoSchedule and NoExecute taints must be tolerated.

use nodescale_core::{Pod, Taint, TaintEffect};
use nodescale_snapshot::NodeInfo;

use super::{CycleState, FilterPlugin, FilterStatus};

pub struct TaintToleration;

/// First hard taint in `taints` that `pod` does not tolerate.
pub fn untolerated_taint<'a>(pod: &Pod, taints: &'a [Taint]) -> Option<&'a Taint> {
    taints.iter().find(|taint| {
        matches!(taint.effect, TaintEffect::NoSchedule | TaintEffect::NoExecute)
            && !pod.tolerations.iter().any(|t| t.tolerates(taint))
    })
}

impl FilterPlugin for TaintToleration {
    fn name(&self) -> &'static str {
        "TaintToleration"
    }

    fn filter(&self, _state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> FilterStatus {
        match untolerated_taint(pod, &node_info.node().taints) {
            Some(taint) => FilterStatus::unschedulable(format!(
                "node(s) had untolerated taint {{{}: {}}}",
                taint.key, taint.value
            )),
            None => FilterStatus::Success,
        }
    }
}
