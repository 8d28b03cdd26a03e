//! Drain planning: which pods on a node must move elsewhere, which a fresh
//! node would recreate anyway, and which pod (if any) blocks removal.
//!
//! Each pod is classified by the first drainability rule with an opinion.
//! Pods no rule has an opinion on are drainable.

use std::fmt;

use nodescale_core::config::ScaleDownConfig;
use nodescale_core::{Pod, Timestamp};
use nodescale_snapshot::NodeInfo;
use serde::Serialize;
use tracing::debug;

pub mod lister;
pub mod pdb;
pub mod rules;

pub use lister::{ControllerLister, ControllerLookup, StaticControllerLister};
pub use pdb::RemainingPdbTracker;
pub use rules::{default_rules, DrainabilityRule};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum BlockingPodReason {
    ControllerNotFound,
    MinReplicasReached,
    NotReplicated,
    LocalStorageRequested,
    NotSafeToEvictAnnotation,
    UnmovableKubeSystemPod,
    NotEnoughPdb,
    UnexpectedError,
}

impl fmt::Display for BlockingPodReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockingPodReason::ControllerNotFound => "controller not found",
            BlockingPodReason::MinReplicasReached => "min replicas reached",
            BlockingPodReason::NotReplicated => "not replicated",
            BlockingPodReason::LocalStorageRequested => "local storage requested",
            BlockingPodReason::NotSafeToEvictAnnotation => "not safe to evict annotation",
            BlockingPodReason::UnmovableKubeSystemPod => "unmovable kube-system pod",
            BlockingPodReason::NotEnoughPdb => "not enough pod disruption budget",
            BlockingPodReason::UnexpectedError => "unexpected error",
        };
        f.write_str(s)
    }
}

/// The pod that stops a node from being drained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockingPod {
    pub pod: Pod,
    pub reason: BlockingPodReason,
}

impl BlockingPod {
    pub fn new(pod: Pod, reason: BlockingPodReason) -> Self {
        Self { pod, reason }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainStatus {
    /// The rule has no opinion.
    Undefined,
    DrainOk,
    /// Leave the pod alone: it neither moves nor blocks.
    SkipDrain,
    BlockDrain {
        reason: BlockingPodReason,
        message: String,
    },
}

impl DrainStatus {
    pub fn block(reason: BlockingPodReason, message: impl Into<String>) -> Self {
        DrainStatus::BlockDrain {
            reason,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainOptions {
    pub skip_nodes_with_system_pods: bool,
    pub skip_nodes_with_local_storage: bool,
    pub min_replica_count: i32,
}

impl Default for DrainOptions {
    fn default() -> Self {
        Self {
            skip_nodes_with_system_pods: true,
            skip_nodes_with_local_storage: true,
            min_replica_count: 0,
        }
    }
}

impl From<&ScaleDownConfig> for DrainOptions {
    fn from(config: &ScaleDownConfig) -> Self {
        Self {
            skip_nodes_with_system_pods: config.skip_nodes_with_system_pods,
            skip_nodes_with_local_storage: config.skip_nodes_with_local_storage,
            min_replica_count: config.min_replica_count,
        }
    }
}

/// Everything a rule may consult.
pub struct DrainContext<'a> {
    pub pdbs: &'a RemainingPdbTracker,
    pub lister: Option<&'a dyn ControllerLister>,
    pub options: &'a DrainOptions,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainPlan {
    pub pods_to_reschedule: Vec<Pod>,
    pub daemon_set_pods: Vec<Pod>,
}

/// Classify every pod on `node_info`, in pod order. The first blocking pod
/// aborts the plan. The tracker is only read; callers reserve the budget
/// once the pods are known to fit elsewhere.
pub fn plan_drain(
    node_info: &NodeInfo,
    rules: &[Box<dyn DrainabilityRule>],
    ctx: &DrainContext<'_>,
) -> Result<DrainPlan, BlockingPod> {
    let mut plan = DrainPlan::default();
    for pod in node_info.pods() {
        let status = rules
            .iter()
            .map(|rule| (rule.name(), rule.drainable(ctx, pod, node_info)))
            .find(|(_, status)| *status != DrainStatus::Undefined);

        match status {
            Some((rule, DrainStatus::BlockDrain { reason, message })) => {
                debug!(node = node_info.name(), pod = %pod.key(), rule, %reason, %message, "pod blocks drain");
                return Err(BlockingPod::new(pod.as_ref().clone(), reason));
            }
            Some((_, DrainStatus::SkipDrain)) => continue,
            _ => {}
        }

        if pod.is_daemon_set_pod() {
            plan.daemon_set_pods.push(pod.as_ref().clone());
        } else {
            plan.pods_to_reschedule.push(pod.as_ref().clone());
        }
    }

    ctx.pdbs.can_remove_pods(&plan.pods_to_reschedule)?;
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodescale_core::pod::{ANNOTATION_MIRROR_POD, KIND_DAEMON_SET, KIND_REPLICA_SET};
    use nodescale_core::testing::{build_test_node, build_test_pdb, build_test_pod, owned_by, with_labels};

    fn plan(info: &NodeInfo, pdbs: &RemainingPdbTracker) -> Result<DrainPlan, BlockingPod> {
        let options = DrainOptions::default();
        let ctx = DrainContext {
            pdbs,
            lister: None,
            options: &options,
            timestamp: 1_000,
        };
        plan_drain(info, &default_rules(), &ctx)
    }

    #[test]
    fn splits_daemon_set_pods_and_skips_mirror_pods() {
        let mut mirror = build_test_pod("static", 1, 1);
        mirror.annotations.insert(ANNOTATION_MIRROR_POD.into(), "x".into());
        let info = NodeInfo::with_pods(
            build_test_node("n", 1000, 1000),
            [
                owned_by(build_test_pod("web", 1, 1), KIND_REPLICA_SET, "web-rs"),
                owned_by(build_test_pod("agent", 1, 1), KIND_DAEMON_SET, "agent"),
                mirror,
            ],
        );
        let plan = plan(&info, &RemainingPdbTracker::default()).unwrap();
        assert_eq!(plan.pods_to_reschedule.len(), 1);
        assert_eq!(plan.pods_to_reschedule[0].name, "web");
        assert_eq!(plan.daemon_set_pods.len(), 1);
        assert_eq!(plan.daemon_set_pods[0].name, "agent");
    }

    #[test]
    fn first_blocking_pod_aborts() {
        let info = NodeInfo::with_pods(
            build_test_node("n", 1000, 1000),
            [
                owned_by(build_test_pod("web", 1, 1), KIND_REPLICA_SET, "web-rs"),
                build_test_pod("bare", 1, 1),
                build_test_pod("bare-2", 1, 1),
            ],
        );
        let blocking = plan(&info, &RemainingPdbTracker::default()).unwrap_err();
        assert_eq!(blocking.pod.name, "bare");
        assert_eq!(blocking.reason, BlockingPodReason::NotReplicated);
    }

    #[test]
    fn combined_pdb_usage_blocks() {
        let web = |name: &str| {
            with_labels(
                owned_by(build_test_pod(name, 1, 1), KIND_REPLICA_SET, "web-rs"),
                &[("app", "web")],
            )
        };
        let info = NodeInfo::with_pods(build_test_node("n", 1000, 1000), [web("w1"), web("w2")]);
        let tracker = RemainingPdbTracker::new(vec![build_test_pdb("web", &[("app", "web")], 1)]);
        let blocking = plan(&info, &tracker).unwrap_err();
        assert_eq!(blocking.reason, BlockingPodReason::NotEnoughPdb);
        assert_eq!(blocking.pod.name, "w2");

        let tracker = RemainingPdbTracker::new(vec![build_test_pdb("web", &[("app", "web")], 2)]);
        assert_eq!(plan(&info, &tracker).unwrap().pods_to_reschedule.len(), 2);
    }
}
