//! The built-in drainability rules.

use nodescale_core::pod::{
    ANNOTATION_SAFE_TO_EVICT_LOCAL_VOLUMES, KIND_DAEMON_SET, KIND_JOB, KIND_REPLICATION_CONTROLLER,
    KIND_REPLICA_SET, KIND_STATEFUL_SET, SYSTEM_NAMESPACE,
};
use nodescale_core::{Pod, StorageMedium, VolumeSource};
use nodescale_snapshot::NodeInfo;

use super::{BlockingPodReason, ControllerLookup, DrainContext, DrainStatus};

pub trait DrainabilityRule: Send + Sync {
    fn name(&self) -> &'static str;

    fn drainable(&self, ctx: &DrainContext<'_>, pod: &Pod, node_info: &NodeInfo) -> DrainStatus;
}

/// Rules in evaluation order.
pub fn default_rules() -> Vec<Box<dyn DrainabilityRule>> {
    vec![
        Box::new(MirrorPodRule),
        Box::new(LongTerminatingRule),
        Box::new(DaemonSetRule),
        Box::new(SafeToEvictRule),
        Box::new(TerminalRule),
        Box::new(ReplicatedRule),
        Box::new(SystemPodRule),
        Box::new(LocalStorageRule),
        Box::new(NotSafeToEvictRule),
        Box::new(PdbRule),
    ]
}

fn lookup_failure(kind: &str, name: &str, lookup: ControllerLookup) -> Option<DrainStatus> {
    match lookup {
        ControllerLookup::Found { .. } => None,
        ControllerLookup::NotFound => Some(DrainStatus::block(
            BlockingPodReason::ControllerNotFound,
            format!("{kind} {name} not found"),
        )),
        ControllerLookup::Error(err) => Some(DrainStatus::block(
            BlockingPodReason::UnexpectedError,
            format!("failed to look up {kind} {name}: {err}"),
        )),
    }
}

pub struct MirrorPodRule;

impl DrainabilityRule for MirrorPodRule {
    fn name(&self) -> &'static str {
        "MirrorPod"
    }

    fn drainable(&self, _: &DrainContext<'_>, pod: &Pod, _: &NodeInfo) -> DrainStatus {
        if pod.is_mirror_pod() {
            DrainStatus::SkipDrain
        } else {
            DrainStatus::Undefined
        }
    }
}

pub struct LongTerminatingRule;

impl DrainabilityRule for LongTerminatingRule {
    fn name(&self) -> &'static str {
        "LongTerminating"
    }

    fn drainable(&self, ctx: &DrainContext<'_>, pod: &Pod, _: &NodeInfo) -> DrainStatus {
        if pod.is_long_terminating(ctx.timestamp) {
            DrainStatus::SkipDrain
        } else {
            DrainStatus::Undefined
        }
    }
}

pub struct DaemonSetRule;

impl DrainabilityRule for DaemonSetRule {
    fn name(&self) -> &'static str {
        "DaemonSet"
    }

    fn drainable(&self, ctx: &DrainContext<'_>, pod: &Pod, _: &NodeInfo) -> DrainStatus {
        if !pod.is_daemon_set_pod() {
            return DrainStatus::Undefined;
        }
        if let (Some(lister), Some(owner)) = (ctx.lister, pod.controller_ref()) {
            if owner.kind == KIND_DAEMON_SET {
                let lookup = lister.controller(&pod.namespace, &owner.kind, &owner.name);
                if let Some(status) = lookup_failure(&owner.kind, &owner.name, lookup) {
                    return status;
                }
            }
        }
        DrainStatus::DrainOk
    }
}

pub struct SafeToEvictRule;

impl DrainabilityRule for SafeToEvictRule {
    fn name(&self) -> &'static str {
        "SafeToEvict"
    }

    fn drainable(&self, _: &DrainContext<'_>, pod: &Pod, _: &NodeInfo) -> DrainStatus {
        if pod.safe_to_evict() {
            DrainStatus::DrainOk
        } else {
            DrainStatus::Undefined
        }
    }
}

pub struct TerminalRule;

impl DrainabilityRule for TerminalRule {
    fn name(&self) -> &'static str {
        "Terminal"
    }

    fn drainable(&self, _: &DrainContext<'_>, pod: &Pod, _: &NodeInfo) -> DrainStatus {
        if pod.is_terminal() {
            DrainStatus::DrainOk
        } else {
            DrainStatus::Undefined
        }
    }
}

/// Pods must be owned by a controller that will recreate them. With a
/// controller lister, the controller must also exist and (for replica
/// sets) keep at least the configured replica count.
pub struct ReplicatedRule;

impl DrainabilityRule for ReplicatedRule {
    fn name(&self) -> &'static str {
        "Replicated"
    }

    fn drainable(&self, ctx: &DrainContext<'_>, pod: &Pod, _: &NodeInfo) -> DrainStatus {
        let Some(owner) = pod.controller_ref() else {
            return DrainStatus::block(
                BlockingPodReason::NotReplicated,
                format!("{} is not replicated", pod.key()),
            );
        };
        let Some(lister) = ctx.lister else {
            return DrainStatus::Undefined;
        };

        let kind = owner.kind.as_str();
        if kind == KIND_REPLICA_SET || kind == KIND_REPLICATION_CONTROLLER {
            match lister.controller(&pod.namespace, kind, &owner.name) {
                ControllerLookup::Found { replicas } => {
                    let replicas = replicas.unwrap_or(0);
                    if replicas < ctx.options.min_replica_count {
                        return DrainStatus::block(
                            BlockingPodReason::MinReplicasReached,
                            format!(
                                "{kind} {} has {replicas} replicas, below the minimum of {}",
                                owner.name, ctx.options.min_replica_count
                            ),
                        );
                    }
                }
                lookup => {
                    if let Some(status) = lookup_failure(kind, &owner.name, lookup) {
                        return status;
                    }
                }
            }
        } else if kind == KIND_JOB || kind == KIND_STATEFUL_SET {
            let lookup = lister.controller(&pod.namespace, kind, &owner.name);
            if let Some(status) = lookup_failure(kind, &owner.name, lookup) {
                return status;
            }
        }
        DrainStatus::Undefined
    }
}

/// kube-system pods move only when a disruption budget covers them.
pub struct SystemPodRule;

impl DrainabilityRule for SystemPodRule {
    fn name(&self) -> &'static str {
        "SystemPod"
    }

    fn drainable(&self, ctx: &DrainContext<'_>, pod: &Pod, _: &NodeInfo) -> DrainStatus {
        if ctx.options.skip_nodes_with_system_pods
            && pod.namespace == SYSTEM_NAMESPACE
            && ctx.pdbs.matching_pdbs(pod).is_empty()
        {
            return DrainStatus::block(
                BlockingPodReason::UnmovableKubeSystemPod,
                format!("non-daemon set, non-mirrored, non-pdb-assigned kube-system pod present: {}", pod.name),
            );
        }
        DrainStatus::Undefined
    }
}

/// Host paths and disk-backed empty dirs lose data on eviction unless the
/// pod lists them as safe to evict.
pub struct LocalStorageRule;

fn blocking_local_volumes(pod: &Pod) -> Vec<&str> {
    let safe: Vec<&str> = pod
        .annotations
        .get(ANNOTATION_SAFE_TO_EVICT_LOCAL_VOLUMES)
        .map(|v| v.split(',').map(str::trim).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default();
    pod.volumes
        .iter()
        .filter(|v| match &v.source {
            VolumeSource::HostPath { .. } => true,
            VolumeSource::EmptyDir { medium } => *medium != StorageMedium::Memory,
            _ => false,
        })
        .map(|v| v.name.as_str())
        .filter(|name| !safe.contains(name))
        .collect()
}

impl DrainabilityRule for LocalStorageRule {
    fn name(&self) -> &'static str {
        "LocalStorage"
    }

    fn drainable(&self, ctx: &DrainContext<'_>, pod: &Pod, _: &NodeInfo) -> DrainStatus {
        if !ctx.options.skip_nodes_with_local_storage {
            return DrainStatus::Undefined;
        }
        let volumes = blocking_local_volumes(pod);
        if volumes.is_empty() {
            return DrainStatus::Undefined;
        }
        DrainStatus::block(
            BlockingPodReason::LocalStorageRequested,
            format!("pod with local storage present: {} ({})", pod.name, volumes.join(", ")),
        )
    }
}

pub struct NotSafeToEvictRule;

impl DrainabilityRule for NotSafeToEvictRule {
    fn name(&self) -> &'static str {
        "NotSafeToEvict"
    }

    fn drainable(&self, _: &DrainContext<'_>, pod: &Pod, _: &NodeInfo) -> DrainStatus {
        if pod.not_safe_to_evict() {
            return DrainStatus::block(
                BlockingPodReason::NotSafeToEvictAnnotation,
                format!("pod annotated as not safe to evict present: {}", pod.name),
            );
        }
        DrainStatus::Undefined
    }
}

pub struct PdbRule;

impl DrainabilityRule for PdbRule {
    fn name(&self) -> &'static str {
        "PodDisruptionBudget"
    }

    fn drainable(&self, ctx: &DrainContext<'_>, pod: &Pod, _: &NodeInfo) -> DrainStatus {
        match ctx.pdbs.exhausted_pdb(pod) {
            Some(pdb) => DrainStatus::block(
                BlockingPodReason::NotEnoughPdb,
                format!("not enough pod disruption budget to move {}: {}", pod.key(), pdb.name),
            ),
            None => DrainStatus::Undefined,
        }
    }
}
