//! Scheduling helper that places pods into a snapshot, remembering where
//! each pod last fit.
//!
//! Hints are keyed by `namespace/name` and stamped with the decision-loop
//! cycle in which they were last used. [`HintingSimulator::drop_old_hints`]
//! is called once per loop and discards hints nobody touched during it.

use std::collections::HashMap;
use std::sync::Arc;

use nodescale_core::Pod;
use nodescale_snapshot::{ClusterSnapshot, NodeInfo};
use tracing::{debug, trace};

use crate::checker::PredicateChecker;
use crate::error::SchedulingError;

/// A pod that was placed, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledPod {
    pub pod: Pod,
    pub node_name: String,
}

#[derive(Debug, Clone)]
struct Hint {
    node_name: String,
    cycle: u64,
}

pub struct HintingSimulator {
    checker: Arc<PredicateChecker>,
    hints: HashMap<String, Hint>,
    cycle: u64,
}

impl HintingSimulator {
    pub fn new(checker: Arc<PredicateChecker>) -> Self {
        Self {
            checker,
            hints: HashMap::new(),
            cycle: 0,
        }
    }

    pub fn checker(&self) -> &Arc<PredicateChecker> {
        &self.checker
    }

    pub fn hint(&self, pod: &Pod) -> Option<&str> {
        self.hints.get(&pod.key()).map(|h| h.node_name.as_str())
    }

    pub fn hint_count(&self) -> usize {
        self.hints.len()
    }

    /// Place `pods` in order. Each placed pod is added to `snapshot` bound to
    /// its node. Pods that fit nowhere are skipped, or end the run when
    /// `break_on_failure` is set. Returns the pods that were placed.
    pub fn try_schedule_pods(
        &mut self,
        snapshot: &mut dyn ClusterSnapshot,
        pods: &[Pod],
        is_node_acceptable: &dyn Fn(&NodeInfo) -> bool,
        break_on_failure: bool,
    ) -> Result<Vec<ScheduledPod>, SchedulingError> {
        let mut scheduled = Vec::with_capacity(pods.len());
        for pod in pods {
            let key = pod.key();
            let node_name = match self.try_hint(&*snapshot, pod, &key, is_node_acceptable)? {
                Some(node) => Some(node),
                None => match self
                    .checker
                    .fit_any_matching(&*snapshot, pod, is_node_acceptable)
                {
                    Ok(node) => Some(node),
                    Err(err) if err.is_internal() => return Err(err.into()),
                    Err(err) => {
                        trace!(pod = %key, reason = %err, "pod fits nowhere");
                        None
                    }
                },
            };

            let Some(node_name) = node_name else {
                self.hints.remove(&key);
                if break_on_failure {
                    break;
                }
                continue;
            };

            let mut placed = pod.clone();
            placed.node_name = Some(node_name.clone());
            snapshot.add_pod(placed.clone(), &node_name)?;
            self.hints.insert(
                key,
                Hint {
                    node_name: node_name.clone(),
                    cycle: self.cycle,
                },
            );
            scheduled.push(ScheduledPod {
                pod: placed,
                node_name,
            });
        }
        Ok(scheduled)
    }

    fn try_hint(
        &self,
        snapshot: &dyn ClusterSnapshot,
        pod: &Pod,
        key: &str,
        is_node_acceptable: &dyn Fn(&NodeInfo) -> bool,
    ) -> Result<Option<String>, SchedulingError> {
        let Some(hint) = self.hints.get(key) else {
            return Ok(None);
        };
        let Ok(info) = snapshot.get(&hint.node_name) else {
            return Ok(None);
        };
        if info.node().unschedulable || !is_node_acceptable(info.as_ref()) {
            return Ok(None);
        }
        match self.checker.check(snapshot, pod, &hint.node_name) {
            Ok(()) => Ok(Some(hint.node_name.clone())),
            Err(err) if err.is_internal() => Err(err.into()),
            Err(_) => Ok(None),
        }
    }

    /// Keep only hints set or used during the current cycle, then start a
    /// new cycle.
    pub fn drop_old_hints(&mut self) {
        let cycle = self.cycle;
        let before = self.hints.len();
        self.hints.retain(|_, h| h.cycle == cycle);
        debug!(
            dropped = before - self.hints.len(),
            kept = self.hints.len(),
            "dropped stale scheduling hints"
        );
        self.cycle += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodescale_core::testing::{build_test_node, build_test_pod};
    use nodescale_snapshot::DeltaSnapshot;

    fn setup() -> (DeltaSnapshot, HintingSimulator) {
        let mut s = DeltaSnapshot::new();
        s.add_node(build_test_node("n1", 1000, 1000)).unwrap();
        s.add_node(build_test_node("n2", 1000, 1000)).unwrap();
        (s, HintingSimulator::new(Arc::new(PredicateChecker::default())))
    }

    fn any(_: &NodeInfo) -> bool {
        true
    }

    #[test]
    fn schedules_in_order_and_binds_pods() {
        let (mut s, mut sim) = setup();
        let pods = vec![build_test_pod("a", 600, 10), build_test_pod("b", 600, 10)];
        let placed = sim.try_schedule_pods(&mut s, &pods, &any, false).unwrap();
        let nodes: Vec<_> = placed.iter().map(|p| p.node_name.as_str()).collect();
        assert_eq!(nodes, vec!["n1", "n2"]);
        assert_eq!(s.get("n1").unwrap().pods().len(), 1);
        assert_eq!(placed[0].pod.node_name.as_deref(), Some("n1"));
        assert_eq!(sim.hint(&pods[1]), Some("n2"));
    }

    #[test]
    fn hints_are_consulted_first() {
        let (mut s, mut sim) = setup();
        let pod = build_test_pod("a", 100, 10);
        s.fork().unwrap();
        sim.try_schedule_pods(&mut s, &[pod.clone()], &|n: &NodeInfo| n.name() == "n2", false)
            .unwrap();
        s.revert();

        // Without the hint the first fitting node would be n1.
        let placed = sim.try_schedule_pods(&mut s, &[pod], &any, false).unwrap();
        assert_eq!(placed[0].node_name, "n2");
    }

    #[test]
    fn break_on_failure_stops_early() {
        let (mut s, mut sim) = setup();
        let pods = vec![
            build_test_pod("huge", 5000, 10),
            build_test_pod("small", 10, 10),
        ];
        let placed = sim.try_schedule_pods(&mut s, &pods, &any, true).unwrap();
        assert!(placed.is_empty());
        let placed = sim.try_schedule_pods(&mut s, &pods, &any, false).unwrap();
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].pod.name, "small");
    }

    #[test]
    fn drop_old_hints_keeps_only_current_cycle() {
        let (mut s, mut sim) = setup();
        s.fork().unwrap();
        sim.try_schedule_pods(&mut s, &[build_test_pod("a", 1, 1)], &any, false)
            .unwrap();
        s.revert();
        sim.drop_old_hints();
        assert_eq!(sim.hint_count(), 1);

        s.fork().unwrap();
        sim.try_schedule_pods(&mut s, &[build_test_pod("b", 1, 1)], &any, false)
            .unwrap();
        s.revert();
        sim.drop_old_hints();
        assert_eq!(sim.hint_count(), 1);
        assert_eq!(sim.hint(&build_test_pod("a", 1, 1)), None);
        assert_eq!(sim.hint(&build_test_pod("b", 1, 1)), Some("n1"));
    }
}
