//! Pod classification helpers shared by the drain planner, the template
//! builder and the predicates.

use crate::resources::Resources;
use crate::types::{OwnerReference, Pod, PodPhase, PreemptionPolicy, RestartPolicy, Timestamp};

pub const ANNOTATION_SAFE_TO_EVICT: &str = "cluster-autoscaler.kubernetes.io/safe-to-evict";
pub const ANNOTATION_SAFE_TO_EVICT_LOCAL_VOLUMES: &str =
    "cluster-autoscaler.kubernetes.io/safe-to-evict-local-volumes";
/// Marks a pod as daemon-like even when it is not owned by a DaemonSet.
pub const ANNOTATION_DAEMONSET_POD: &str = "cluster-autoscaler.kubernetes.io/daemonset-pod";
pub const ANNOTATION_MIRROR_POD: &str = "kubernetes.io/config.mirror";
/// Comma-separated container names recorded when the pod was admitted.
pub const ANNOTATION_OBSERVED_CONTAINERS: &str =
    "cluster-autoscaler.kubernetes.io/observed-containers";

pub const SYSTEM_NODE_CRITICAL: &str = "system-node-critical";
pub const SYSTEM_NAMESPACE: &str = "kube-system";

pub const KIND_DAEMON_SET: &str = "DaemonSet";
pub const KIND_REPLICA_SET: &str = "ReplicaSet";
pub const KIND_REPLICATION_CONTROLLER: &str = "ReplicationController";
pub const KIND_STATEFUL_SET: &str = "StatefulSet";
pub const KIND_JOB: &str = "Job";

/// Grace period applied when the pod does not declare one.
pub const DEFAULT_TERMINATION_GRACE_PERIOD_SECS: u64 = 30;
/// Extra time after the grace period before a terminating pod is ignored.
pub const LONG_TERMINATING_EXTRA_SECS: u64 = 30;

/// A host port claimed by a pod. Empty `ip` means every address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPort {
    pub ip: String,
    pub protocol: String,
    pub port: u16,
}

impl HostPort {
    pub fn conflicts_with(&self, other: &HostPort) -> bool {
        self.port == other.port
            && self.protocol == other.protocol
            && (self.ip == other.ip || is_wildcard(&self.ip) || is_wildcard(&other.ip))
    }
}

fn is_wildcard(ip: &str) -> bool {
    ip.is_empty() || ip == "0.0.0.0"
}

impl Pod {
    /// `namespace/name`.
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }

    /// Effective scheduling request: the larger of the summed app containers
    /// and any single init container.
    pub fn requests(&self) -> Resources {
        let mut total = Resources::default();
        for c in &self.containers {
            total += &c.requests;
        }
        for c in &self.init_containers {
            total = total.max(&c.requests);
        }
        total
    }

    pub fn host_ports(&self) -> Vec<HostPort> {
        self.containers
            .iter()
            .flat_map(|c| c.ports.iter())
            .filter(|p| p.host_port != 0)
            .map(|p| HostPort {
                ip: p.host_ip.clone(),
                protocol: if p.protocol.is_empty() {
                    "TCP".to_string()
                } else {
                    p.protocol.clone()
                },
                port: p.host_port,
            })
            .collect()
    }

    pub fn controller_ref(&self) -> Option<&OwnerReference> {
        self.owner_references.iter().find(|r| r.controller)
    }

    pub fn is_mirror_pod(&self) -> bool {
        self.annotations.contains_key(ANNOTATION_MIRROR_POD)
    }

    pub fn is_daemon_set_pod(&self) -> bool {
        if self
            .controller_ref()
            .is_some_and(|r| r.kind == KIND_DAEMON_SET)
        {
            return true;
        }
        self.annotations
            .get(ANNOTATION_DAEMONSET_POD)
            .is_some_and(|v| v == "true")
    }

    /// Terminal pods will never run again on this node.
    pub fn is_terminal(&self) -> bool {
        match (self.restart_policy, self.phase) {
            (RestartPolicy::Never, PodPhase::Succeeded | PodPhase::Failed) => true,
            (RestartPolicy::OnFailure, PodPhase::Succeeded) => true,
            (_, PodPhase::Failed) => true,
            _ => false,
        }
    }

    /// Whether the pod has been terminating for longer than its grace period
    /// plus [`LONG_TERMINATING_EXTRA_SECS`].
    pub fn is_long_terminating(&self, now: Timestamp) -> bool {
        let Some(deleted_at) = self.deletion_timestamp else {
            return false;
        };
        let grace = self
            .termination_grace_period_seconds
            .unwrap_or(DEFAULT_TERMINATION_GRACE_PERIOD_SECS);
        deleted_at
            .saturating_add(grace)
            .saturating_add(LONG_TERMINATING_EXTRA_SECS)
            < now
    }

    pub fn is_terminating(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_pod_affinity(&self) -> bool {
        self.affinity.as_ref().is_some_and(|a| {
            a.pod_affinity.as_ref().is_some_and(|p| !p.required.is_empty())
                || a.pod_anti_affinity.is_some()
        })
    }

    pub fn has_required_pod_anti_affinity(&self) -> bool {
        self.affinity
            .as_ref()
            .and_then(|a| a.pod_anti_affinity.as_ref())
            .is_some_and(|p| !p.required.is_empty())
    }

    pub fn is_preempting(&self) -> bool {
        self.preemption_policy != PreemptionPolicy::Never
    }

    pub fn is_system_node_critical(&self) -> bool {
        self.priority_class_name == SYSTEM_NODE_CRITICAL
    }

    pub fn safe_to_evict(&self) -> bool {
        self.annotations
            .get(ANNOTATION_SAFE_TO_EVICT)
            .is_some_and(|v| v == "true")
    }

    pub fn not_safe_to_evict(&self) -> bool {
        self.annotations
            .get(ANNOTATION_SAFE_TO_EVICT)
            .is_some_and(|v| v == "false")
    }

    pub fn observed_containers(&self) -> Vec<String> {
        self.annotations
            .get(ANNOTATION_OBSERVED_CONTAINERS)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Affinity, Container, ContainerPort, PodAffinity, PodAffinityTerm};

    fn pod() -> Pod {
        Pod {
            namespace: "default".into(),
            name: "p".into(),
            ..Default::default()
        }
    }

    #[test]
    fn requests_take_max_of_init_and_sum_of_containers() {
        let mut p = pod();
        p.containers = vec![
            Container {
                requests: Resources::new(100, 200),
                ..Default::default()
            },
            Container {
                requests: Resources::new(100, 200),
                ..Default::default()
            },
        ];
        p.init_containers = vec![Container {
            requests: Resources::new(500, 100),
            ..Default::default()
        }];
        let r = p.requests();
        assert_eq!(r.milli_cpu, 500);
        assert_eq!(r.memory, 400);
    }

    #[test]
    fn long_terminating_uses_default_grace() {
        let mut p = pod();
        assert!(!p.is_long_terminating(10_000));
        p.deletion_timestamp = Some(1_000);
        assert!(!p.is_long_terminating(1_060));
        assert!(p.is_long_terminating(1_061));
        p.termination_grace_period_seconds = Some(300);
        assert!(!p.is_long_terminating(1_061));
        assert!(p.is_long_terminating(1_331));
    }

    #[test]
    fn huge_grace_period_never_overflows() {
        let mut p = pod();
        p.deletion_timestamp = Some(u64::MAX - 10);
        p.termination_grace_period_seconds = Some(u64::MAX);
        assert!(!p.is_long_terminating(u64::MAX));
    }

    #[test]
    fn terminal_depends_on_restart_policy() {
        let mut p = pod();
        p.phase = PodPhase::Succeeded;
        assert!(!p.is_terminal());
        p.restart_policy = RestartPolicy::OnFailure;
        assert!(p.is_terminal());
        p.restart_policy = RestartPolicy::Always;
        p.phase = PodPhase::Failed;
        assert!(p.is_terminal());
    }

    #[test]
    fn daemon_set_pod_by_owner_or_annotation() {
        let mut p = pod();
        assert!(!p.is_daemon_set_pod());
        p.owner_references.push(OwnerReference {
            kind: KIND_DAEMON_SET.into(),
            name: "ds".into(),
            uid: "u".into(),
            controller: true,
        });
        assert!(p.is_daemon_set_pod());

        let mut q = pod();
        q.annotations
            .insert(ANNOTATION_DAEMONSET_POD.into(), "true".into());
        assert!(q.is_daemon_set_pod());
    }

    #[test]
    fn host_ports_default_to_tcp() {
        let mut p = pod();
        p.containers = vec![Container {
            ports: vec![
                ContainerPort {
                    container_port: 80,
                    host_port: 8080,
                    ..Default::default()
                },
                ContainerPort {
                    container_port: 90,
                    ..Default::default()
                },
            ],
            ..Default::default()
        }];
        let ports = p.host_ports();
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].protocol, "TCP");
        assert_eq!(ports[0].port, 8080);
    }

    #[test]
    fn wildcard_host_ip_conflicts_with_specific() {
        let a = HostPort {
            ip: "".into(),
            protocol: "TCP".into(),
            port: 80,
        };
        let b = HostPort {
            ip: "10.0.0.1".into(),
            protocol: "TCP".into(),
            port: 80,
        };
        let c = HostPort {
            ip: "10.0.0.2".into(),
            protocol: "TCP".into(),
            port: 80,
        };
        assert!(a.conflicts_with(&b));
        assert!(!b.conflicts_with(&c));
    }

    #[test]
    fn anti_affinity_detection() {
        let mut p = pod();
        assert!(!p.has_required_pod_anti_affinity());
        p.affinity = Some(Affinity {
            pod_anti_affinity: Some(PodAffinity {
                required: vec![PodAffinityTerm::default()],
            }),
            ..Default::default()
        });
        assert!(p.has_required_pod_anti_affinity());
        assert!(p.has_pod_affinity());
    }

    #[test]
    fn observed_containers_split_on_commas() {
        let mut p = pod();
        p.annotations
            .insert(ANNOTATION_OBSERVED_CONTAINERS.into(), "app, sidecar,".into());
        assert_eq!(p.observed_containers(), vec!["app", "sidecar"]);
    }
}
