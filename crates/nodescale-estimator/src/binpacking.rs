//! First-fit-decreasing bin-packing over template nodes.
//!
//! Pods are sorted by how much of a template node they take, largest
//! first. Each pod goes to the first estimation node (upcoming or newly
//! added) that passes the predicate checker; when none does, a fresh copy
//! of the template is added. All of it happens in a snapshot fork that is
//! reverted before returning.

use std::collections::HashSet;
use std::sync::Arc;

use nodescale_cloud::NodeGroup;
use nodescale_core::Pod;
use nodescale_predicates::PredicateChecker;
use nodescale_simulator::node_info_sanitized_deep_copy;
use nodescale_snapshot::{ClusterSnapshot, NodeInfo};
use tracing::{debug, trace};

use crate::error::EstimatorResult;
use crate::limiter::EstimationLimiter;
use crate::threshold::EstimationContext;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EstimationResult {
    /// New template nodes that received at least one pod.
    pub node_count: usize,
    /// Placed pods, in placement order, bound to their estimation node.
    pub scheduled_pods: Vec<Pod>,
    /// Names of the new nodes counted in `node_count`.
    pub new_nodes: Vec<String>,
}

/// Share of the template's allocatable CPU plus share of its memory.
pub fn pod_score(pod: &Pod, template: &NodeInfo) -> f64 {
    fn share(requested: i64, allocatable: i64) -> f64 {
        if allocatable <= 0 {
            0.0
        } else {
            requested as f64 / allocatable as f64
        }
    }
    let requests = pod.requests();
    let allocatable = &template.node().allocatable;
    share(requests.milli_cpu, allocatable.milli_cpu) + share(requests.memory, allocatable.memory)
}

/// Largest score first; equal scores keep their input order.
pub fn order_pods<'a>(pods: &'a [Pod], template: &NodeInfo) -> Vec<&'a Pod> {
    let mut scored: Vec<(f64, &Pod)> = pods.iter().map(|p| (pod_score(p, template), p)).collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().map(|(_, p)| p).collect()
}

#[derive(Default)]
struct EstimationState {
    next_index: usize,
    last_node: Option<String>,
    /// Upcoming and new nodes; only these may receive pods.
    estimation_nodes: HashSet<String>,
    new_nodes: HashSet<String>,
    new_nodes_with_pods: Vec<String>,
    scheduled: Vec<Pod>,
}

impl EstimationState {
    fn has_pods(&self, node: &str) -> bool {
        self.new_nodes_with_pods.iter().any(|n| n == node)
    }

    fn place(&mut self, snapshot: &mut dyn ClusterSnapshot, mut pod: Pod, node: String) -> EstimatorResult<()> {
        pod.node_name = Some(node.clone());
        snapshot.add_pod(pod.clone(), &node)?;
        if self.new_nodes.contains(&node) && !self.has_pods(&node) {
            self.new_nodes_with_pods.push(node);
        }
        self.scheduled.push(pod);
        Ok(())
    }

    fn add_new_node(&mut self, snapshot: &mut dyn ClusterSnapshot, template: &NodeInfo) -> EstimatorResult<String> {
        let info = node_info_sanitized_deep_copy(template, &format!("e-{}", self.next_index));
        let name = info.name().to_string();
        snapshot.add_node_info(info)?;
        self.next_index += 1;
        self.estimation_nodes.insert(name.clone());
        self.new_nodes.insert(name.clone());
        self.last_node = Some(name.clone());
        Ok(name)
    }
}

pub struct BinpackingEstimator {
    checker: Arc<PredicateChecker>,
    limiter: Box<dyn EstimationLimiter>,
    context: EstimationContext,
}

impl BinpackingEstimator {
    pub fn new(
        checker: Arc<PredicateChecker>,
        limiter: Box<dyn EstimationLimiter>,
        context: EstimationContext,
    ) -> Self {
        Self {
            checker,
            limiter,
            context,
        }
    }

    pub fn set_context(&mut self, context: EstimationContext) {
        self.context = context;
    }

    /// Number of new `template` nodes needed to host `pods`, after filling
    /// the `upcoming` nodes first.
    pub fn estimate(
        &mut self,
        snapshot: &mut dyn ClusterSnapshot,
        pods: &[Pod],
        template: &NodeInfo,
        upcoming: &[NodeInfo],
        group: &dyn NodeGroup,
    ) -> EstimatorResult<usize> {
        self.estimate_detailed(snapshot, pods, template, upcoming, group)
            .map(|r| r.node_count)
    }

    pub fn estimate_detailed(
        &mut self,
        snapshot: &mut dyn ClusterSnapshot,
        pods: &[Pod],
        template: &NodeInfo,
        upcoming: &[NodeInfo],
        group: &dyn NodeGroup,
    ) -> EstimatorResult<EstimationResult> {
        self.limiter.start_estimation(group, &self.context);
        if let Err(err) = snapshot.fork() {
            self.limiter.end_estimation();
            return Err(err.into());
        }

        let result = self.binpack(snapshot, pods, template, upcoming);

        snapshot.revert();
        self.limiter.end_estimation();

        let state = result?;
        debug!(
            node_group = %group.id(),
            pods = pods.len(),
            scheduled = state.scheduled.len(),
            nodes = state.new_nodes_with_pods.len(),
            "binpacking estimate"
        );
        Ok(EstimationResult {
            node_count: state.new_nodes_with_pods.len(),
            scheduled_pods: state.scheduled,
            new_nodes: state.new_nodes_with_pods,
        })
    }

    fn binpack(
        &mut self,
        snapshot: &mut dyn ClusterSnapshot,
        pods: &[Pod],
        template: &NodeInfo,
        upcoming: &[NodeInfo],
    ) -> EstimatorResult<EstimationState> {
        let mut state = EstimationState::default();
        let mut new_nodes_available = true;

        for (i, node) in upcoming.iter().enumerate() {
            let info = node_info_sanitized_deep_copy(node, &format!("upcoming-{i}"));
            state.estimation_nodes.insert(info.name().to_string());
            snapshot.add_node_info(info)?;
        }

        for pod in order_pods(pods, template) {
            let mut pod = pod.clone();
            pod.node_name = None;

            let fit = {
                let nodes = &state.estimation_nodes;
                self.checker
                    .fit_any_matching(&*snapshot, &pod, &|info: &NodeInfo| nodes.contains(info.name()))
            };
            match fit {
                Ok(node) => {
                    state.place(snapshot, pod, node)?;
                    continue;
                }
                Err(err) if err.is_internal() => return Err(err.into()),
                Err(_) => {}
            }

            if !new_nodes_available {
                continue;
            }

            // A pod that did not fit an empty template node will not fit
            // another one.
            if let Some(last) = &state.last_node {
                if !state.has_pods(last) {
                    trace!(pod = %pod.key(), "pod does not fit the template");
                    continue;
                }
            }

            // Later pods may still fit the nodes already opened.
            if !self.limiter.permission_to_add_node() {
                debug!(pod = %pod.key(), "limiter refused a new node");
                new_nodes_available = false;
                continue;
            }

            let node = state.add_new_node(snapshot, template)?;
            match self.checker.check(&*snapshot, &pod, &node) {
                Ok(()) => state.place(snapshot, pod, node)?,
                Err(err) if err.is_internal() => return Err(err.into()),
                Err(err) => {
                    trace!(pod = %pod.key(), node = %node, reason = %err, "pod does not fit a new node");
                }
            }
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::ThresholdBasedLimiter;
    use crate::threshold::StaticThreshold;
    use nodescale_cloud::StaticNodeGroup;
    use nodescale_core::testing::{build_test_node, build_test_pod};
    use nodescale_snapshot::DeltaSnapshot;
    use std::time::Duration;

    const GIB: i64 = 1 << 30;

    fn template() -> NodeInfo {
        let mut node = build_test_node("tmpl", 1000, 2 * GIB);
        node.allocatable.pods = 10;
        NodeInfo::new(node)
    }

    fn estimator(max_nodes: i64) -> BinpackingEstimator {
        BinpackingEstimator::new(
            Arc::new(PredicateChecker::default()),
            Box::new(ThresholdBasedLimiter::new(vec![Arc::new(StaticThreshold::new(
                max_nodes,
                Duration::ZERO,
            ))])),
            EstimationContext::default(),
        )
    }

    #[test]
    fn score_adds_cpu_and_memory_shares() {
        let pod = build_test_pod("p", 500, GIB);
        assert_eq!(pod_score(&pod, &template()), 1.0);

        let node = build_test_node("no-mem", 1000, 0);
        assert_eq!(pod_score(&pod, &NodeInfo::new(node)), 0.5);
    }

    #[test]
    fn ordering_is_decreasing_and_stable() {
        let pods = vec![
            build_test_pod("small-a", 100, 0),
            build_test_pod("big", 900, 0),
            build_test_pod("small-b", 100, 0),
        ];
        let names: Vec<_> = order_pods(&pods, &template()).iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["big", "small-a", "small-b"]);
    }

    #[test]
    fn pods_that_never_fit_do_not_add_nodes() {
        let mut snapshot = DeltaSnapshot::new();
        let group = StaticNodeGroup::new("ng", 0, 10);
        let pods = vec![
            build_test_pod("huge-1", 5000, 0),
            build_test_pod("huge-2", 5000, 0),
            build_test_pod("small", 100, 0),
        ];
        let result = estimator(0)
            .estimate_detailed(&mut snapshot, &pods, &template(), &[], &group)
            .unwrap();
        assert_eq!(result.node_count, 1);
        assert_eq!(result.scheduled_pods.len(), 1);
        assert_eq!(result.scheduled_pods[0].name, "small");
        assert_eq!(result.new_nodes, vec!["tmpl-e-0".to_string()]);
    }

    #[test]
    fn limiter_caps_the_estimate() {
        let mut snapshot = DeltaSnapshot::new();
        let group = StaticNodeGroup::new("ng", 0, 10);
        let pods: Vec<_> = (0..10).map(|i| build_test_pod(&format!("p{i}"), 350, GIB)).collect();
        let result = estimator(2)
            .estimate_detailed(&mut snapshot, &pods, &template(), &[], &group)
            .unwrap();
        assert_eq!(result.node_count, 2);
        assert_eq!(result.scheduled_pods.len(), 4);
    }

    #[test]
    fn snapshot_is_left_untouched() {
        let mut snapshot = DeltaSnapshot::new();
        snapshot.add_node(build_test_node("real", 1000, GIB)).unwrap();
        let group = StaticNodeGroup::new("ng", 0, 10);
        let pods = vec![build_test_pod("p", 100, 0)];
        estimator(0)
            .estimate(&mut snapshot, &pods, &template(), &[template()], &group)
            .unwrap();
        assert!(!snapshot.is_forked());
        assert_eq!(snapshot.node_infos().len(), 1);
        assert!(snapshot.get("real").unwrap().pods().is_empty());
    }

    #[test]
    fn forked_snapshot_is_an_error() {
        let mut snapshot = DeltaSnapshot::new();
        snapshot.fork().unwrap();
        let group = StaticNodeGroup::new("ng", 0, 10);
        let err = estimator(0).estimate(&mut snapshot, &[], &template(), &[], &group);
        assert!(err.is_err());
    }
}
