//! Node-removal simulation.
//!
//! For each candidate the simulator plans a drain, then, inside a snapshot
//! fork, taints the candidate for deletion, unbinds its pods and tries to
//! place them on the allowed destination nodes. Displaced pods are always
//! scheduled with the `Honor` node-taints policy for topology spreading, so
//! the tainted candidate does not count as an empty topology domain.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use nodescale_core::config::ScaleDownConfig;
use nodescale_core::taints::mark_to_be_deleted;
use nodescale_core::{NodeInclusionPolicy, Pod, Timestamp};
use nodescale_predicates::{HintingSimulator, PredicateChecker};
use nodescale_snapshot::{ClusterSnapshot, NodeInfo};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::drain::{
    default_rules, plan_drain, BlockingPod, ControllerLister, DrainContext, DrainOptions, DrainPlan,
    DrainabilityRule, RemainingPdbTracker,
};

/// Extended resources with this prefix are dropped from displaced pods.
pub const TPU_RESOURCE_PREFIX: &str = "cloud-tpus.google.com/";

/// Why a node cannot be removed. Only `NoPlaceToMovePods`,
/// `BlockedByPod` and `UnexpectedError` are assigned by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum UnremovableReason {
    ScaleDownDisabledAnnotation,
    ScaleDownUnreadyDisabled,
    NotAutoscaled,
    NotUnneededLongEnough,
    NotUnreadyLongEnough,
    NodeGroupMinSizeReached,
    MinimalResourceLimitExceeded,
    CurrentlyBeingDeleted,
    NotUnderutilized,
    NotUnneededOtherReason,
    RecentlyUnremovable,
    NoPlaceToMovePods,
    BlockedByPod,
    UnexpectedError,
}

impl fmt::Display for UnremovableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeToBeRemoved {
    pub node_name: String,
    pub pods_to_reschedule: Vec<Pod>,
    pub daemon_set_pods: Vec<Pod>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnremovableNode {
    pub node_name: String,
    pub reason: UnremovableReason,
    pub blocking_pod: Option<BlockingPod>,
}

impl UnremovableNode {
    pub fn new(node_name: impl Into<String>, reason: UnremovableReason) -> Self {
        Self {
            node_name: node_name.into(),
            reason,
            blocking_pod: None,
        }
    }
}

pub struct RemovalSimulator {
    scheduler: HintingSimulator,
    rules: Vec<Box<dyn DrainabilityRule>>,
    options: DrainOptions,
    lister: Option<Arc<dyn ControllerLister>>,
    persist_successful_simulations: bool,
    timeout: Option<Duration>,
}

impl RemovalSimulator {
    pub fn new(checker: Arc<PredicateChecker>, options: DrainOptions) -> Self {
        Self {
            scheduler: HintingSimulator::new(checker),
            rules: default_rules(),
            options,
            lister: None,
            persist_successful_simulations: false,
            timeout: None,
        }
    }

    pub fn from_config(checker: Arc<PredicateChecker>, config: &ScaleDownConfig, timeout: Duration) -> Self {
        Self::new(checker, DrainOptions::from(config))
            .with_persistence(config.persist_successful_simulations)
            .with_timeout(timeout)
    }

    pub fn with_rules(mut self, rules: Vec<Box<dyn DrainabilityRule>>) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_lister(mut self, lister: Arc<dyn ControllerLister>) -> Self {
        self.lister = Some(lister);
        self
    }

    /// Commit each successful simulation so later candidates see the moved
    /// pods.
    pub fn with_persistence(mut self, persist: bool) -> Self {
        self.persist_successful_simulations = persist;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn scheduler(&self) -> &HintingSimulator {
        &self.scheduler
    }

    /// End of a decision cycle: forget placement hints nobody used.
    pub fn drop_old_hints(&mut self) {
        self.scheduler.drop_old_hints();
    }

    fn drain_plan(
        &self,
        node_info: &NodeInfo,
        pdbs: &RemainingPdbTracker,
        timestamp: Timestamp,
    ) -> Result<DrainPlan, BlockingPod> {
        let ctx = DrainContext {
            pdbs,
            lister: self.lister.as_deref(),
            options: &self.options,
            timestamp,
        };
        plan_drain(node_info, &self.rules, &ctx)
    }

    /// Candidates with nothing to reschedule. Nodes that cannot be looked
    /// up or that hold a blocking pod are left out.
    pub fn find_empty_nodes_to_remove(
        &self,
        snapshot: &dyn ClusterSnapshot,
        candidates: &[String],
        timestamp: Timestamp,
    ) -> Vec<String> {
        let pdbs = RemainingPdbTracker::default();
        let mut empty = Vec::new();
        for name in candidates {
            let node_info = match snapshot.get(name) {
                Ok(info) => info,
                Err(err) => {
                    warn!(node = %name, error = %err, "candidate not in snapshot");
                    continue;
                }
            };
            if let Ok(plan) = self.drain_plan(&node_info, &pdbs, timestamp) {
                if plan.pods_to_reschedule.is_empty() {
                    empty.push(name.clone());
                }
            }
        }
        empty
    }

    /// Simulate removing each candidate in order. Pods may only move to
    /// `destinations`; a candidate found removable stops being a destination
    /// for the ones after it. Budgets used by removable nodes are reserved
    /// in `pdbs`.
    pub fn find_nodes_to_remove(
        &mut self,
        snapshot: &mut dyn ClusterSnapshot,
        candidates: &[String],
        destinations: &[String],
        timestamp: Timestamp,
        pdbs: &mut RemainingPdbTracker,
    ) -> (Vec<NodeToBeRemoved>, Vec<UnremovableNode>) {
        let started = Instant::now();
        let mut destinations: HashSet<String> = destinations.iter().cloned().collect();
        let mut removable = Vec::new();
        let mut unremovable = Vec::new();

        for (i, name) in candidates.iter().enumerate() {
            if let Some(timeout) = self.timeout {
                if started.elapsed() >= timeout {
                    warn!(
                        evaluated = i,
                        skipped = candidates.len() - i,
                        timeout_ms = timeout.as_millis() as u64,
                        "removal simulation timed out"
                    );
                    break;
                }
            }

            match self.simulate_node_removal(snapshot, name, &destinations, timestamp, pdbs) {
                Ok(node) => {
                    destinations.remove(name);
                    removable.push(node);
                }
                Err(node) => unremovable.push(node),
            }
        }

        info!(
            candidates = candidates.len(),
            removable = removable.len(),
            unremovable = unremovable.len(),
            "removal simulation finished"
        );
        (removable, unremovable)
    }

    /// Simulate removing one node.
    pub fn simulate_node_removal(
        &mut self,
        snapshot: &mut dyn ClusterSnapshot,
        node_name: &str,
        destinations: &HashSet<String>,
        timestamp: Timestamp,
        pdbs: &mut RemainingPdbTracker,
    ) -> Result<NodeToBeRemoved, UnremovableNode> {
        let node_info = snapshot.get(node_name).map_err(|err| {
            warn!(node = %node_name, error = %err, "candidate not in snapshot");
            UnremovableNode::new(node_name, UnremovableReason::UnexpectedError)
        })?;

        let plan = self
            .drain_plan(&node_info, pdbs, timestamp)
            .map_err(|blocking| {
                debug!(node = %node_name, pod = %blocking.pod.key(), reason = %blocking.reason, "node blocked by pod");
                UnremovableNode {
                    node_name: node_name.to_string(),
                    reason: UnremovableReason::BlockedByPod,
                    blocking_pod: Some(blocking),
                }
            })?;

        if let Err(err) = snapshot.fork() {
            warn!(node = %node_name, error = %err, "cannot fork snapshot");
            return Err(UnremovableNode::new(node_name, UnremovableReason::UnexpectedError));
        }

        match self.reschedule_in_fork(snapshot, &node_info, &plan.pods_to_reschedule, destinations, timestamp) {
            Ok(true) => {
                if self.persist_successful_simulations {
                    snapshot.commit();
                } else {
                    snapshot.revert();
                }
                pdbs.remove_pods(&plan.pods_to_reschedule);
                debug!(node = %node_name, pods = plan.pods_to_reschedule.len(), "node can be removed");
                Ok(NodeToBeRemoved {
                    node_name: node_name.to_string(),
                    pods_to_reschedule: plan.pods_to_reschedule,
                    daemon_set_pods: plan.daemon_set_pods,
                })
            }
            Ok(false) => {
                snapshot.revert();
                debug!(node = %node_name, "no place to move pods");
                Err(UnremovableNode::new(node_name, UnremovableReason::NoPlaceToMovePods))
            }
            Err(err) => {
                snapshot.revert();
                warn!(node = %node_name, error = %err, "removal simulation failed");
                Err(UnremovableNode::new(node_name, UnremovableReason::UnexpectedError))
            }
        }
    }

    /// Returns whether every pod found a new home.
    fn reschedule_in_fork(
        &mut self,
        snapshot: &mut dyn ClusterSnapshot,
        node_info: &NodeInfo,
        pods: &[Pod],
        destinations: &HashSet<String>,
        timestamp: Timestamp,
    ) -> Result<bool, crate::error::SimulatorError> {
        let node_name = node_info.name();

        let mut tainted = node_info.node().clone();
        if mark_to_be_deleted(&mut tainted, timestamp) {
            snapshot.update_node(tainted)?;
        }

        for pod in pods {
            if let Err(err) = snapshot.remove_pod(&pod.namespace, &pod.name, node_name) {
                warn!(node = %node_name, pod = %pod.key(), error = %err, "pod already gone from node");
            }
        }

        let displaced: Vec<Pod> = pods.iter().map(displaced_copy).collect();
        let accept = |info: &NodeInfo| info.name() != node_name && destinations.contains(info.name());
        let placed = self
            .scheduler
            .try_schedule_pods(snapshot, &displaced, &accept, true)?;
        Ok(placed.len() == displaced.len())
    }
}

/// The pod as it would be recreated elsewhere: unbound, without TPU
/// requests, spreading with the `Honor` taints policy.
fn displaced_copy(pod: &Pod) -> Pod {
    let mut pod = pod.clone();
    pod.node_name = None;
    for container in pod.containers.iter_mut().chain(pod.init_containers.iter_mut()) {
        container
            .requests
            .extended
            .retain(|name, _| !name.starts_with(TPU_RESOURCE_PREFIX));
        container
            .limits
            .extended
            .retain(|name, _| !name.starts_with(TPU_RESOURCE_PREFIX));
    }
    for constraint in &mut pod.topology_spread_constraints {
        constraint.node_taints_policy = Some(NodeInclusionPolicy::Honor);
    }
    pod
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodescale_core::pod::KIND_REPLICA_SET;
    use nodescale_core::resources::Resources;
    use nodescale_core::taints::has_to_be_deleted_taint;
    use nodescale_core::testing::{build_test_node, build_test_pdb, build_test_pod, owned_by, with_labels};
    use nodescale_core::TopologySpreadConstraint;
    use nodescale_snapshot::DeltaSnapshot;

    fn rs_pod(name: &str, cpu: i64) -> Pod {
        owned_by(build_test_pod(name, cpu, 10), KIND_REPLICA_SET, "rs")
    }

    fn simulator() -> RemovalSimulator {
        RemovalSimulator::new(Arc::new(PredicateChecker::default()), DrainOptions::default())
    }

    fn names(nodes: &[&str]) -> Vec<String> {
        nodes.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn displaced_copy_strips_tpu_and_forces_honor() {
        let mut pod = rs_pod("tpu", 100);
        pod.node_name = Some("n1".into());
        pod.containers[0].requests = Resources::new(100, 10)
            .with_extended("cloud-tpus.google.com/v3", 8)
            .with_extended("nvidia.com/gpu", 1);
        pod.topology_spread_constraints.push(TopologySpreadConstraint {
            max_skew: 1,
            topology_key: "zone".into(),
            ..Default::default()
        });

        let copy = displaced_copy(&pod);
        assert_eq!(copy.node_name, None);
        assert_eq!(copy.containers[0].requests.get("cloud-tpus.google.com/v3"), 0);
        assert_eq!(copy.containers[0].requests.get("nvidia.com/gpu"), 1);
        assert_eq!(
            copy.topology_spread_constraints[0].node_taints_policy,
            Some(NodeInclusionPolicy::Honor)
        );
    }

    #[test]
    fn no_place_to_move_pods_reverts_the_fork() {
        let mut snapshot = DeltaSnapshot::new();
        snapshot.add_node(build_test_node("busy", 1000, 1000)).unwrap();
        snapshot.add_node(build_test_node("small", 100, 1000)).unwrap();
        snapshot.add_pod(rs_pod("big", 500), "busy").unwrap();

        let mut pdbs = RemainingPdbTracker::default();
        let (removable, unremovable) = simulator().find_nodes_to_remove(
            &mut snapshot,
            &names(&["busy"]),
            &names(&["busy", "small"]),
            1_000,
            &mut pdbs,
        );
        assert!(removable.is_empty());
        assert_eq!(unremovable[0].reason, UnremovableReason::NoPlaceToMovePods);
        assert!(!snapshot.is_forked());
        assert_eq!(snapshot.get("busy").unwrap().pods().len(), 1);
        assert!(!has_to_be_deleted_taint(snapshot.get("busy").unwrap().node()));
    }

    #[test]
    fn blocking_pod_is_reported() {
        let mut snapshot = DeltaSnapshot::new();
        snapshot.add_node(build_test_node("n1", 1000, 1000)).unwrap();
        snapshot.add_node(build_test_node("n2", 1000, 1000)).unwrap();
        snapshot.add_pod(build_test_pod("bare", 10, 10), "n1").unwrap();

        let (_, unremovable) = simulator().find_nodes_to_remove(
            &mut snapshot,
            &names(&["n1"]),
            &names(&["n1", "n2"]),
            1_000,
            &mut RemainingPdbTracker::default(),
        );
        assert_eq!(unremovable[0].reason, UnremovableReason::BlockedByPod);
        assert_eq!(unremovable[0].blocking_pod.as_ref().unwrap().pod.name, "bare");
    }

    #[test]
    fn missing_candidate_is_unexpected() {
        let mut snapshot = DeltaSnapshot::new();
        let (_, unremovable) = simulator().find_nodes_to_remove(
            &mut snapshot,
            &names(&["ghost"]),
            &[],
            1_000,
            &mut RemainingPdbTracker::default(),
        );
        assert_eq!(unremovable[0].reason, UnremovableReason::UnexpectedError);
    }

    #[test]
    fn removed_candidates_stop_being_destinations() {
        let mut snapshot = DeltaSnapshot::new();
        snapshot.add_node(build_test_node("a", 1000, 1000)).unwrap();
        snapshot.add_node(build_test_node("b", 1000, 1000)).unwrap();
        snapshot.add_pod(rs_pod("pa", 100), "a").unwrap();
        snapshot.add_pod(rs_pod("pb", 100), "b").unwrap();

        let (removable, unremovable) = simulator().find_nodes_to_remove(
            &mut snapshot,
            &names(&["a", "b"]),
            &names(&["a", "b"]),
            1_000,
            &mut RemainingPdbTracker::default(),
        );
        assert_eq!(removable.len(), 1);
        assert_eq!(removable[0].node_name, "a");
        assert_eq!(unremovable[0].node_name, "b");
        assert_eq!(unremovable[0].reason, UnremovableReason::NoPlaceToMovePods);
    }

    #[test]
    fn successful_removal_reserves_pdb_budget() {
        let mut snapshot = DeltaSnapshot::new();
        snapshot.add_node(build_test_node("a", 1000, 1000)).unwrap();
        snapshot.add_node(build_test_node("b", 1000, 1000)).unwrap();
        snapshot.add_node(build_test_node("c", 1000, 1000)).unwrap();
        snapshot
            .add_pod(with_labels(rs_pod("pa", 100), &[("app", "web")]), "a")
            .unwrap();
        snapshot
            .add_pod(with_labels(rs_pod("pb", 100), &[("app", "web")]), "b")
            .unwrap();

        let mut pdbs = RemainingPdbTracker::new(vec![build_test_pdb("web", &[("app", "web")], 1)]);
        let (removable, unremovable) = simulator().find_nodes_to_remove(
            &mut snapshot,
            &names(&["a", "b"]),
            &names(&["a", "b", "c"]),
            1_000,
            &mut pdbs,
        );
        assert_eq!(removable.len(), 1);
        assert_eq!(unremovable[0].node_name, "b");
        assert_eq!(unremovable[0].reason, UnremovableReason::BlockedByPod);
        assert_eq!(pdbs.remaining("default", "web"), Some(0));
    }

    #[test]
    fn zero_timeout_evaluates_nothing() {
        let mut snapshot = DeltaSnapshot::new();
        snapshot.add_node(build_test_node("a", 1000, 1000)).unwrap();
        let mut sim = simulator().with_timeout(Duration::ZERO);
        let (removable, unremovable) = sim.find_nodes_to_remove(
            &mut snapshot,
            &names(&["a"]),
            &names(&["a"]),
            1_000,
            &mut RemainingPdbTracker::default(),
        );
        assert!(removable.is_empty());
        assert!(unremovable.is_empty());
    }
}
