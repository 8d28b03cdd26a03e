//! End-to-end removal simulations over a small cluster.

use std::sync::Arc;

use nodescale_core::pod::KIND_REPLICA_SET;
use nodescale_core::testing::{build_test_node, build_test_pod, owned_by, with_labels};
use nodescale_core::{LabelSelector, Pod, TopologySpreadConstraint, LABEL_HOSTNAME};
use nodescale_predicates::PredicateChecker;
use nodescale_simulator::{
    BlockingPodReason, DrainOptions, RemainingPdbTracker, RemovalSimulator, UnremovableReason,
};
use nodescale_snapshot::{ClusterSnapshot, DeltaSnapshot};

const NOW: u64 = 1_700_000_000;

fn replicated(name: &str, cpu: i64) -> Pod {
    owned_by(build_test_pod(name, cpu, 100), KIND_REPLICA_SET, "rs")
}

fn simulator() -> RemovalSimulator {
    RemovalSimulator::new(Arc::new(PredicateChecker::default()), DrainOptions::default())
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// emptyNode has no pods, drainableNode runs two replicated pods,
/// nonDrainableNode runs a bare pod and fullNode has no CPU left.
fn four_node_cluster() -> DeltaSnapshot {
    let mut snapshot = DeltaSnapshot::new();
    for name in ["emptyNode", "drainableNode", "nonDrainableNode", "fullNode"] {
        snapshot.add_node(build_test_node(name, 1000, 2000)).unwrap();
    }
    snapshot.add_pod(replicated("d1", 100), "drainableNode").unwrap();
    snapshot.add_pod(replicated("d2", 100), "drainableNode").unwrap();
    snapshot
        .add_pod(build_test_pod("bare", 100, 100), "nonDrainableNode")
        .unwrap();
    snapshot.add_pod(replicated("hog", 1000), "fullNode").unwrap();
    snapshot
}

#[test]
fn only_pod_free_candidates_are_empty() {
    let snapshot = four_node_cluster();
    let empty = simulator().find_empty_nodes_to_remove(
        &snapshot,
        &strings(&["emptyNode", "drainableNode", "nonDrainableNode"]),
        NOW,
    );
    assert_eq!(empty, vec!["emptyNode".to_string()]);
}

#[test]
fn drainable_pods_move_to_the_node_with_room() {
    let mut snapshot = four_node_cluster();
    let mut sim = simulator().with_persistence(true);
    let (removable, unremovable) = sim.find_nodes_to_remove(
        &mut snapshot,
        &strings(&["emptyNode", "drainableNode"]),
        &strings(&["emptyNode", "drainableNode", "nonDrainableNode", "fullNode"]),
        NOW,
        &mut RemainingPdbTracker::default(),
    );
    assert!(unremovable.is_empty());
    let names: Vec<_> = removable.iter().map(|n| n.node_name.as_str()).collect();
    assert_eq!(names, vec!["emptyNode", "drainableNode"]);
    assert!(removable[0].pods_to_reschedule.is_empty());
    let moved: Vec<_> = removable[1]
        .pods_to_reschedule
        .iter()
        .map(|p| p.name.as_str())
        .collect();
    assert_eq!(moved, vec!["d1", "d2"]);

    // emptyNode was already chosen for removal, so only nonDrainableNode has room.
    let target = snapshot.get("nonDrainableNode").unwrap();
    assert_eq!(target.pods().len(), 3);
    assert!(snapshot.get("drainableNode").unwrap().pods().is_empty());
    assert!(snapshot.get("emptyNode").unwrap().pods().is_empty());
}

#[test]
fn bare_pod_blocks_its_node() {
    let mut snapshot = four_node_cluster();
    let (removable, unremovable) = simulator().find_nodes_to_remove(
        &mut snapshot,
        &strings(&["nonDrainableNode"]),
        &strings(&["emptyNode", "drainableNode", "nonDrainableNode", "fullNode"]),
        NOW,
        &mut RemainingPdbTracker::default(),
    );
    assert!(removable.is_empty());
    assert_eq!(unremovable[0].reason, UnremovableReason::BlockedByPod);
    let blocking = unremovable[0].blocking_pod.as_ref().unwrap();
    assert_eq!(blocking.pod.name, "bare");
    assert_eq!(blocking.reason, BlockingPodReason::NotReplicated);
}

#[test]
fn full_node_cannot_be_drained_without_room() {
    let mut snapshot = four_node_cluster();
    let (_, unremovable) = simulator().find_nodes_to_remove(
        &mut snapshot,
        &strings(&["fullNode"]),
        &strings(&["drainableNode", "nonDrainableNode", "fullNode"]),
        NOW,
        &mut RemainingPdbTracker::default(),
    );
    assert_eq!(unremovable[0].reason, UnremovableReason::NoPlaceToMovePods);
    assert!(!snapshot.is_forked());
}

fn spread_pod(name: &str) -> Pod {
    let mut pod = with_labels(replicated(name, 100), &[("app", "topo-app")]);
    pod.topology_spread_constraints = vec![TopologySpreadConstraint {
        max_skew: 1,
        topology_key: LABEL_HOSTNAME.into(),
        label_selector: Some(LabelSelector::from_labels([("app", "topo-app")])),
        ..Default::default()
    }];
    pod
}

#[test]
fn node_being_removed_is_not_a_spreading_domain() {
    let mut snapshot = DeltaSnapshot::new();
    for (i, node) in ["node1", "node2", "node3"].iter().enumerate() {
        snapshot.add_node(build_test_node(node, 1000, 1000)).unwrap();
        snapshot.add_pod(spread_pod(&format!("pod{}", i + 1)), node).unwrap();
    }

    let mut sim = simulator().with_persistence(true);
    let (removable, unremovable) = sim.find_nodes_to_remove(
        &mut snapshot,
        &strings(&["node1"]),
        &strings(&["node1", "node2", "node3"]),
        NOW,
        &mut RemainingPdbTracker::default(),
    );
    assert!(unremovable.is_empty(), "{unremovable:?}");
    assert_eq!(removable[0].node_name, "node1");

    let relocated = snapshot
        .list_pods()
        .into_iter()
        .find(|p| p.name == "pod1")
        .unwrap();
    let host = relocated.node_name.clone().unwrap();
    assert!(host == "node2" || host == "node3", "pod1 landed on {host}");
}
