//! Hard (`DoNotSchedule`) topology spread constraints.
//!
//! PreFilter counts matching pods per topology domain over every eligible
//! node in the snapshot. A node is eligible for a constraint when it carries
//! the topology key and, depending on the constraint's inclusion policies,
//! matches the pod's node affinity and carries no untolerated hard taints.
//!
//! Eligible nodes with zero matching pods still count as domains. Under the
//! default `Ignore` taints policy, a node tainted for deletion therefore keeps
//! pulling the global minimum down to zero.

use std::collections::HashMap;

use nodescale_core::{
    LabelSelector, NodeInclusionPolicy, Pod, TopologySpreadConstraint,
    UnsatisfiableConstraintAction,
};
use nodescale_snapshot::{ClusterSnapshot, NodeInfo};

use super::node_affinity::pod_matches_node;
use super::taint_toleration::untolerated_taint;
use super::{CycleState, FilterPlugin, FilterStatus};

const STATE_KEY: &str = "PodTopologySpread";

pub struct PodTopologySpread;

#[derive(Debug)]
struct ConstraintState {
    topology_key: String,
    max_skew: i32,
    selector: Option<LabelSelector>,
    /// domain value → matching pods
    counts: HashMap<String, i32>,
    min_count: i32,
}

#[derive(Debug, Default)]
struct SpreadState {
    constraints: Vec<ConstraintState>,
}

fn hard_constraints(pod: &Pod) -> impl Iterator<Item = &TopologySpreadConstraint> {
    pod.topology_spread_constraints
        .iter()
        .filter(|c| c.when_unsatisfiable == UnsatisfiableConstraintAction::DoNotSchedule)
}

fn selector_matches(selector: Option<&LabelSelector>, namespace: &str, candidate: &Pod) -> bool {
    // A missing selector matches nothing.
    selector.is_some_and(|s| candidate.namespace == namespace && s.matches(&candidate.labels))
}

fn node_eligible(pod: &Pod, constraint: &TopologySpreadConstraint, info: &NodeInfo) -> bool {
    let node = info.node();
    if !node.labels.contains_key(&constraint.topology_key) {
        return false;
    }
    if constraint.effective_node_affinity_policy() == NodeInclusionPolicy::Honor
        && !pod_matches_node(pod, node)
    {
        return false;
    }
    if constraint.effective_node_taints_policy() == NodeInclusionPolicy::Honor
        && untolerated_taint(pod, &node.taints).is_some()
    {
        return false;
    }
    true
}

impl FilterPlugin for PodTopologySpread {
    fn name(&self) -> &'static str {
        "PodTopologySpread"
    }

    fn pre_filter(
        &self,
        snapshot: &dyn ClusterSnapshot,
        pod: &Pod,
        state: &mut CycleState,
    ) -> Result<(), String> {
        let mut spread = SpreadState::default();
        let nodes = snapshot.node_infos();

        for constraint in hard_constraints(pod) {
            if constraint.max_skew <= 0 {
                return Err(format!(
                    "invalid maxSkew {} for topology key {}",
                    constraint.max_skew, constraint.topology_key
                ));
            }
            let mut counts: HashMap<String, i32> = HashMap::new();
            for info in nodes.iter().filter(|i| node_eligible(pod, constraint, i)) {
                let Some(domain) = info.node().labels.get(&constraint.topology_key) else {
                    continue;
                };
                let matching = info
                    .pods()
                    .iter()
                    .filter(|p| !p.is_terminating())
                    .filter(|p| {
                        selector_matches(constraint.label_selector.as_ref(), &pod.namespace, p)
                    })
                    .count() as i32;
                *counts.entry(domain.clone()).or_insert(0) += matching;
            }

            let mut min_count = counts.values().copied().min().unwrap_or(0);
            if let Some(min_domains) = constraint.min_domains {
                if (counts.len() as i32) < min_domains {
                    min_count = 0;
                }
            }
            spread.constraints.push(ConstraintState {
                topology_key: constraint.topology_key.clone(),
                max_skew: constraint.max_skew,
                selector: constraint.label_selector.clone(),
                counts,
                min_count,
            });
        }

        state.write(STATE_KEY, spread);
        Ok(())
    }

    fn filter(&self, state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> FilterStatus {
        if hard_constraints(pod).next().is_none() {
            return FilterStatus::Success;
        }
        let Some(spread) = state.read::<SpreadState>(STATE_KEY) else {
            return FilterStatus::Error("topology spread state was not computed".to_string());
        };

        for constraint in &spread.constraints {
            let Some(domain) = node_info.node().labels.get(&constraint.topology_key) else {
                return FilterStatus::unschedulable(
                    "node(s) didn't match pod topology spread constraints (missing required label)",
                );
            };
            let self_match = i32::from(selector_matches(
                constraint.selector.as_ref(),
                &pod.namespace,
                pod,
            ));
            let count = constraint.counts.get(domain).copied().unwrap_or(0);
            let skew = count + self_match - constraint.min_count;
            if skew > constraint.max_skew {
                return FilterStatus::unschedulable(
                    "node(s) didn't match pod topology spread constraints",
                );
            }
        }
        FilterStatus::Success
    }
}
