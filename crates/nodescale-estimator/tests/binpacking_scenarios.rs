//! Bin-packing estimates against a 1000m / 2 GiB / 10-pod template.

use std::sync::Arc;
use std::time::Duration;

use nodescale_cloud::{NodeGroup, StaticNodeGroup};
use nodescale_core::testing::{build_test_node, build_test_pod};
use nodescale_core::Pod;
use nodescale_estimator::{
    BinpackingEstimator, ClusterCapacityThreshold, EstimationContext, SiblingCapacityThreshold,
    StaticThreshold, Threshold, ThresholdBasedLimiter,
};
use nodescale_predicates::PredicateChecker;
use nodescale_snapshot::{DeltaSnapshot, NodeInfo};

const GIB: i64 = 1 << 30;

fn template() -> NodeInfo {
    let mut node = build_test_node("template", 3 * 350 - 50, 2 * GIB);
    node.allocatable.pods = 10;
    NodeInfo::new(node)
}

fn pods(n: usize) -> Vec<Pod> {
    (0..n)
        .map(|i| build_test_pod(&format!("pod-{i}"), 350, GIB))
        .collect()
}

fn estimator(thresholds: Vec<Arc<dyn Threshold>>, ctx: EstimationContext) -> BinpackingEstimator {
    BinpackingEstimator::new(
        Arc::new(PredicateChecker::default()),
        Box::new(ThresholdBasedLimiter::new(thresholds)),
        ctx,
    )
}

fn unlimited() -> BinpackingEstimator {
    estimator(vec![Arc::new(StaticThreshold::default())], EstimationContext::default())
}

fn group() -> StaticNodeGroup {
    StaticNodeGroup::new("ng", 0, 100)
}

#[test]
fn ten_pods_need_five_nodes() {
    let mut snapshot = DeltaSnapshot::new();
    let n = unlimited()
        .estimate(&mut snapshot, &pods(10), &template(), &[], &group())
        .unwrap();
    assert_eq!(n, 5);
}

#[test]
fn upcoming_nodes_are_filled_first() {
    let mut snapshot = DeltaSnapshot::new();
    let n = unlimited()
        .estimate(
            &mut snapshot,
            &pods(10),
            &template(),
            &[template(), template()],
            &group(),
        )
        .unwrap();
    assert_eq!(n, 3);
}

#[test]
fn no_pods_need_no_nodes() {
    let mut snapshot = DeltaSnapshot::new();
    let n = unlimited()
        .estimate(&mut snapshot, &[], &template(), &[template()], &group())
        .unwrap();
    assert_eq!(n, 0);
}

#[test]
fn estimate_grows_with_pod_count() {
    let mut estimator = unlimited();
    let mut previous = 0;
    for count in 0..=12 {
        let mut snapshot = DeltaSnapshot::new();
        let n = estimator
            .estimate(&mut snapshot, &pods(count), &template(), &[template()], &group())
            .unwrap();
        assert!(n >= previous, "{count} pods: {n} < {previous}");
        previous = n;
    }
}

#[test]
fn cluster_capacity_caps_the_estimate() {
    let mut snapshot = DeltaSnapshot::new();
    let mut estimator = estimator(
        vec![Arc::new(ClusterCapacityThreshold)],
        EstimationContext::new(8, 10),
    );
    let n = estimator
        .estimate(&mut snapshot, &pods(10), &template(), &[], &group())
        .unwrap();
    assert_eq!(n, 2);

    estimator.set_context(EstimationContext::new(10, 10));
    let n = estimator
        .estimate(&mut snapshot, &pods(10), &template(), &[], &group())
        .unwrap();
    assert_eq!(n, 0);
}

#[test]
fn sibling_headroom_caps_the_estimate() {
    let scaled = StaticNodeGroup::new("ng", 0, 5).with_target_size(4);
    let sibling: Arc<dyn NodeGroup> = Arc::new(StaticNodeGroup::new("ng-b", 0, 3).with_target_size(1));
    let mut snapshot = DeltaSnapshot::new();
    let n = estimator(
        vec![
            Arc::new(SiblingCapacityThreshold),
            Arc::new(StaticThreshold::new(0, Duration::from_secs(10))),
        ],
        EstimationContext::new(0, 0).with_similar_node_groups(vec![sibling]),
    )
    .estimate(&mut snapshot, &pods(10), &template(), &[], &scaled)
    .unwrap();
    assert_eq!(n, 3);
}

#[test]
fn refused_new_node_still_fills_open_nodes() {
    let mut snapshot = DeltaSnapshot::new();
    let pods = vec![
        build_test_pod("a", 600, 100),
        build_test_pod("b", 600, 100),
        build_test_pod("c", 300, 100),
    ];
    let mut estimator = estimator(
        vec![Arc::new(StaticThreshold::new(1, Duration::ZERO))],
        EstimationContext::default(),
    );
    let result = estimator
        .estimate_detailed(&mut snapshot, &pods, &template(), &[], &group())
        .unwrap();
    assert_eq!(result.node_count, 1);
    let scheduled: Vec<_> = result.scheduled_pods.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(scheduled, vec!["a", "c"]);
}
