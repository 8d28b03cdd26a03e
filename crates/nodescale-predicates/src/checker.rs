//! The predicate checker: runs the filter plugins for one pod against one
//! node, or searches the snapshot for the first node that passes.

use std::sync::Arc;

use nodescale_core::Pod;
use nodescale_snapshot::{ClusterSnapshot, NodeInfo};
use tracing::trace;

use crate::error::{PredicateError, PredicateResult};
use crate::plugins::{default_plugins, CycleState, FilterPlugin, FilterStatus};

/// Predicate name reported when no node in the snapshot fits.
pub const NO_FIT_PREDICATE: &str = "FitAny";

pub struct PredicateChecker {
    plugins: Vec<Box<dyn FilterPlugin>>,
}

impl Default for PredicateChecker {
    fn default() -> Self {
        Self::new(default_plugins())
    }
}

impl PredicateChecker {
    /// Plugins run in the given order; the first failure is reported.
    pub fn new(plugins: Vec<Box<dyn FilterPlugin>>) -> Self {
        Self { plugins }
    }

    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    fn pre_filter(&self, snapshot: &dyn ClusterSnapshot, pod: &Pod) -> PredicateResult<CycleState> {
        let mut state = CycleState::new();
        for plugin in &self.plugins {
            plugin
                .pre_filter(snapshot, pod, &mut state)
                .map_err(|reason| PredicateError::internal(plugin.name(), reason))?;
        }
        Ok(state)
    }

    fn run_filters(
        &self,
        state: &CycleState,
        pod: &Pod,
        node_info: &Arc<NodeInfo>,
    ) -> PredicateResult<()> {
        for plugin in &self.plugins {
            let err = match plugin.filter(state, pod, node_info) {
                FilterStatus::Success => continue,
                FilterStatus::Unschedulable(reasons) => {
                    PredicateError::not_schedulable(plugin.name(), reasons)
                }
                FilterStatus::Error(reason) => PredicateError::internal(plugin.name(), reason),
            };
            let info = Arc::clone(node_info);
            return Err(err
                .with_node(node_info.name())
                .with_debug_info(move || node_debug_info(&info)));
        }
        Ok(())
    }

    /// Whether `pod` can be placed on `node_name` in `snapshot`.
    pub fn check(
        &self,
        snapshot: &dyn ClusterSnapshot,
        pod: &Pod,
        node_name: &str,
    ) -> PredicateResult<()> {
        let node_info = snapshot
            .get(node_name)
            .map_err(|e| PredicateError::internal("", e.to_string()).with_node(node_name))?;
        let state = self.pre_filter(snapshot, pod)?;
        self.run_filters(&state, pod, &node_info)
    }

    /// First schedulable node, in snapshot order, that passes every filter.
    pub fn fit_any(&self, snapshot: &dyn ClusterSnapshot, pod: &Pod) -> PredicateResult<String> {
        self.fit_any_matching(snapshot, pod, &|_: &NodeInfo| true)
    }

    /// Like [`fit_any`](Self::fit_any), skipping nodes rejected by `filter`.
    pub fn fit_any_matching(
        &self,
        snapshot: &dyn ClusterSnapshot,
        pod: &Pod,
        filter: &dyn Fn(&NodeInfo) -> bool,
    ) -> PredicateResult<String> {
        let state = self.pre_filter(snapshot, pod)?;
        for node_info in snapshot.node_infos().iter() {
            if node_info.node().unschedulable || !filter(node_info.as_ref()) {
                continue;
            }
            match self.run_filters(&state, pod, node_info) {
                Ok(()) => return Ok(node_info.name().to_string()),
                Err(err) if err.is_internal() => return Err(err),
                Err(err) => {
                    trace!(pod = %pod.key(), node = node_info.name(), reason = %err, "node rejected");
                }
            }
        }
        Err(PredicateError::not_schedulable(
            NO_FIT_PREDICATE,
            vec![format!("cannot put pod {} on any node", pod.key())],
        ))
    }
}

fn node_debug_info(info: &NodeInfo) -> String {
    let node = info.node();
    let taints: Vec<String> = node
        .taints
        .iter()
        .map(|t| format!("{}={}:{:?}", t.key, t.value, t.effect))
        .collect();
    let free = info.free();
    format!(
        "node {} taints [{}], free cpu {}m memory {} pods {}/{}",
        node.name,
        taints.join(", "),
        free.milli_cpu,
        free.memory,
        info.pods().len(),
        node.allocatable.pods
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodescale_core::testing::{build_test_node, build_test_pod};
    use nodescale_core::{Taint, TaintEffect};
    use nodescale_snapshot::DeltaSnapshot;

    use crate::error::PredicateErrorKind;

    struct Broken;

    impl FilterPlugin for Broken {
        fn name(&self) -> &'static str {
            "Broken"
        }

        fn filter(&self, _: &CycleState, _: &Pod, _: &NodeInfo) -> FilterStatus {
            FilterStatus::Error("plugin exploded".into())
        }
    }

    fn snapshot() -> DeltaSnapshot {
        let mut s = DeltaSnapshot::new();
        s.add_node(build_test_node("small", 100, 100)).unwrap();
        s.add_node(build_test_node("big", 2000, 2000)).unwrap();
        s.add_node(build_test_node("big2", 2000, 2000)).unwrap();
        s
    }

    #[test]
    fn check_reports_first_failing_predicate_with_lazy_context() {
        let mut s = snapshot();
        let mut node = build_test_node("tainted", 10, 10);
        node.taints.push(Taint::new("gpu", "yes", TaintEffect::NoSchedule));
        s.add_node(node).unwrap();

        let checker = PredicateChecker::default();
        let err = checker
            .check(&s, &build_test_pod("p", 500, 500), "tainted")
            .unwrap_err();
        assert_eq!(err.kind(), PredicateErrorKind::NotSchedulable);
        assert_eq!(err.predicate(), "NodeResourcesFit");
        assert_eq!(err.node_name(), Some("tainted"));
        assert!(err.verbose_message().contains("gpu=yes:NoSchedule"));
    }

    #[test]
    fn fit_any_returns_first_fitting_node_in_order() {
        let s = snapshot();
        let checker = PredicateChecker::default();
        assert_eq!(
            checker.fit_any(&s, &build_test_pod("p", 500, 500)).unwrap(),
            "big"
        );
        assert_eq!(checker.fit_any(&s, &build_test_pod("tiny", 10, 10)).unwrap(), "small");
    }

    #[test]
    fn fit_any_skips_unschedulable_nodes() {
        let mut s = snapshot();
        let mut node = s.get("big").unwrap().node().clone();
        node.unschedulable = true;
        s.update_node(node).unwrap();
        let checker = PredicateChecker::default();
        assert_eq!(
            checker.fit_any(&s, &build_test_pod("p", 500, 500)).unwrap(),
            "big2"
        );
    }

    #[test]
    fn fit_any_matching_honours_filter() {
        let s = snapshot();
        let checker = PredicateChecker::default();
        let node = checker
            .fit_any_matching(&s, &build_test_pod("p", 10, 10), &|n: &NodeInfo| n.name() == "big2")
            .unwrap();
        assert_eq!(node, "big2");
    }

    #[test]
    fn fit_any_reports_no_fit() {
        let s = snapshot();
        let err = PredicateChecker::default()
            .fit_any(&s, &build_test_pod("huge", 5000, 5000))
            .unwrap_err();
        assert_eq!(err.predicate(), NO_FIT_PREDICATE);
        assert!(!err.is_internal());
    }

    #[test]
    fn internal_errors_propagate() {
        let s = snapshot();
        let checker = PredicateChecker::new(vec![Box::new(Broken)]);
        let err = checker.fit_any(&s, &build_test_pod("p", 1, 1)).unwrap_err();
        assert!(err.is_internal());
        assert_eq!(err.predicate(), "Broken");
    }

    #[test]
    fn check_against_missing_node_is_internal() {
        let s = snapshot();
        let err = PredicateChecker::default()
            .check(&s, &build_test_pod("p", 1, 1), "ghost")
            .unwrap_err();
        assert!(err.is_internal());
    }
}
