//! Autoscaler-owned taints and template taint sanitization.

use std::collections::HashSet;

use tracing::debug;

use crate::types::{Node, Taint, TaintEffect, Timestamp};

/// Marks a node the autoscaler is about to delete.
pub const TO_BE_DELETED_TAINT: &str = "ToBeDeletedByClusterAutoscaler";
/// Soft taint on nodes that are currently unneeded.
pub const DELETION_CANDIDATE_TAINT: &str = "DeletionCandidateOfClusterAutoscaler";

pub const IGNORE_TAINT_PREFIX: &str = "ignore-taint.cluster-autoscaler.kubernetes.io/";
pub const STARTUP_TAINT_PREFIX: &str = "startup-taint.cluster-autoscaler.kubernetes.io/";
pub const STATUS_TAINT_PREFIX: &str = "status-taint.cluster-autoscaler.kubernetes.io/";

/// Taints that mirror transient node conditions.
pub const NODE_CONDITION_TAINTS: &[&str] = &[
    "node.kubernetes.io/not-ready",
    "node.kubernetes.io/unreachable",
    "node.kubernetes.io/unschedulable",
    "node.kubernetes.io/memory-pressure",
    "node.kubernetes.io/disk-pressure",
    "node.kubernetes.io/network-unavailable",
    "node.kubernetes.io/pid-pressure",
    "node.cloudprovider.kubernetes.io/uninitialized",
    "node.cloudprovider.kubernetes.io/shutdown",
    "cloud.google.com/impending-node-termination",
    "NodeWithImpairedVolumes",
];

/// Taints that get special handling when building templates.
#[derive(Debug, Clone, Default)]
pub struct TaintConfig {
    startup_taints: HashSet<String>,
    status_taints: HashSet<String>,
}

impl TaintConfig {
    pub fn new<S, T>(startup_taints: S, status_taints: T) -> Self
    where
        S: IntoIterator,
        S::Item: Into<String>,
        T: IntoIterator,
        T::Item: Into<String>,
    {
        Self {
            startup_taints: startup_taints.into_iter().map(Into::into).collect(),
            status_taints: status_taints.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_startup_taint(&self, key: &str) -> bool {
        self.startup_taints.contains(key)
            || key.starts_with(IGNORE_TAINT_PREFIX)
            || key.starts_with(STARTUP_TAINT_PREFIX)
    }

    pub fn is_status_taint(&self, key: &str) -> bool {
        self.status_taints.contains(key) || key.starts_with(STATUS_TAINT_PREFIX)
    }
}

/// Strip every taint a freshly created node would not carry.
pub fn sanitize_taints(taints: &[Taint], config: &TaintConfig) -> Vec<Taint> {
    taints
        .iter()
        .filter(|taint| {
            let key = taint.key.as_str();
            let drop = key == TO_BE_DELETED_TAINT
                || key == DELETION_CANDIDATE_TAINT
                || NODE_CONDITION_TAINTS.contains(&key)
                || config.is_startup_taint(key)
                || config.is_status_taint(key);
            if drop {
                debug!(taint = key, "dropping taint from template node");
            }
            !drop
        })
        .cloned()
        .collect()
}

pub fn to_be_deleted_taint(now: Timestamp) -> Taint {
    Taint {
        key: TO_BE_DELETED_TAINT.to_string(),
        value: now.to_string(),
        effect: TaintEffect::NoSchedule,
        time_added: Some(now),
    }
}

pub fn deletion_candidate_taint(now: Timestamp) -> Taint {
    Taint {
        key: DELETION_CANDIDATE_TAINT.to_string(),
        value: now.to_string(),
        effect: TaintEffect::PreferNoSchedule,
        time_added: Some(now),
    }
}

pub fn has_to_be_deleted_taint(node: &Node) -> bool {
    node.has_taint(TO_BE_DELETED_TAINT)
}

pub fn has_deletion_candidate_taint(node: &Node) -> bool {
    node.has_taint(DELETION_CANDIDATE_TAINT)
}

/// Add the to-be-deleted taint unless it is already present.
/// Returns whether the node changed.
pub fn mark_to_be_deleted(node: &mut Node, now: Timestamp) -> bool {
    if has_to_be_deleted_taint(node) {
        return false;
    }
    node.taints.push(to_be_deleted_taint(now));
    true
}
