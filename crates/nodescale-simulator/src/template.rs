//! Template node construction.
//!
//! A template NodeInfo describes a fresh node of a node group. It is built
//! from an example node (a real member of the group) or from the group's own
//! template, then sanitized so that many copies can coexist in one snapshot:
//! every copy gets its own node name, node UID, pod names and pod UIDs.

use nodescale_cloud::NodeGroup;
use nodescale_core::pod::KIND_DAEMON_SET;
use nodescale_core::taints::sanitize_taints;
use nodescale_core::{DaemonSet, Node, OwnerReference, Pod, TaintConfig, LABEL_HOSTNAME};
use nodescale_predicates::plugins::node_affinity::pod_matches_node;
use nodescale_predicates::plugins::taint_toleration::untolerated_taint;
use nodescale_snapshot::NodeInfo;
use tracing::debug;
use uuid::Uuid;

use crate::error::{SimulatorError, SimulatorResult};

pub const TEMPLATE_NODE_PREFIX: &str = "template-node-for-";

fn random_suffix() -> String {
    // 63 bits, so the rendered suffix never carries a sign.
    (rand::random::<u64>() >> 1).to_string()
}

/// Template for `group`, built from the group's own template node. Pods for
/// every daemon set that would run on the node are added.
pub fn template_node_info_from_node_group(
    group: &dyn NodeGroup,
    daemon_sets: &[DaemonSet],
    taint_config: &TaintConfig,
) -> SimulatorResult<NodeInfo> {
    let base = group.template_node_info()?;
    template_node_info_from_example(&base, &group.id(), daemon_sets, true, taint_config)
}

/// Template for `node_group_id`, built from a real node of the group.
///
/// Kept pods: mirror pods and daemon set pods that are not being deleted.
/// Daemon sets without a live pod on the example contribute a new pod when
/// it would run on the node and either `force_daemon_sets` is set or the
/// pod is a preempting system-node-critical pod.
pub fn template_node_info_from_example(
    example: &NodeInfo,
    node_group_id: &str,
    daemon_sets: &[DaemonSet],
    force_daemon_sets: bool,
    taint_config: &TaintConfig,
) -> SimulatorResult<NodeInfo> {
    if example.name().is_empty() {
        return Err(SimulatorError::Sanitize(format!(
            "example node for node group {node_group_id} has no name"
        )));
    }

    let mut pods: Vec<Pod> = example
        .pods()
        .iter()
        .filter(|p| !p.is_terminating() && (p.is_mirror_pod() || p.is_daemon_set_pod()))
        .map(|p| p.as_ref().clone())
        .collect();

    let mut sanitized_node = example.node().clone();
    sanitized_node.taints = sanitize_taints(&sanitized_node.taints, taint_config);

    for ds in daemon_sets {
        let already_running = pods.iter().any(|p| {
            p.controller_ref()
                .is_some_and(|r| r.uid == ds.uid || (r.name == ds.name && p.namespace == ds.namespace))
        });
        if already_running {
            continue;
        }
        let pod = daemon_set_pod(ds, &sanitized_node.name);
        if !(force_daemon_sets || (pod.is_preempting() && pod.is_system_node_critical())) {
            continue;
        }
        if !pod_matches_node(&pod, &sanitized_node)
            || untolerated_taint(&pod, &sanitized_node.taints).is_some()
        {
            debug!(daemon_set = %ds.name, node_group = %node_group_id, "daemon set does not run on template node");
            continue;
        }
        pods.push(pod);
    }

    let mut template = NodeInfo::with_pods(sanitized_node, pods);
    template.set_local_resource_slices(example.local_resource_slices().to_vec());

    let base = format!("{TEMPLATE_NODE_PREFIX}{node_group_id}");
    let sanitized = sanitize_node_info(&template, &base, &random_suffix(), None);
    debug!(node_group = %node_group_id, template = sanitized.name(), pods = sanitized.pods().len(), "built template node");
    Ok(sanitized)
}

fn daemon_set_pod(ds: &DaemonSet, node_name: &str) -> Pod {
    let mut pod = ds.template.clone();
    pod.namespace = ds.namespace.clone();
    pod.name = format!("{}-pod", ds.name);
    pod.uid = Uuid::new_v4().to_string();
    pod.node_name = Some(node_name.to_string());
    pod.deletion_timestamp = None;
    pod.owner_references = vec![OwnerReference {
        kind: KIND_DAEMON_SET.to_string(),
        name: ds.name.clone(),
        uid: ds.uid.clone(),
        controller: true,
    }];
    pod
}

/// A copy of `template` named `{template name}-{suffix}`. Taints are kept
/// as they are; templates are sanitized when built.
pub fn node_info_sanitized_deep_copy(template: &NodeInfo, suffix: &str) -> NodeInfo {
    sanitize_node_info(template, template.name(), suffix, None)
}

/// Rename `info` to `{name_base}-{suffix}` with fresh UIDs. Pod names, claim
/// names and local resource slices get the same suffix. Taints are
/// sanitized when a config is given.
pub fn sanitize_node_info(
    info: &NodeInfo,
    name_base: &str,
    suffix: &str,
    taint_config: Option<&TaintConfig>,
) -> NodeInfo {
    let new_name = format!("{name_base}-{suffix}");
    let node = sanitize_node(info.node(), &new_name, taint_config);

    let pods = info.pods().iter().map(|p| {
        let mut pod = p.as_ref().clone();
        pod.name = format!("{}-{suffix}", pod.name);
        pod.uid = Uuid::new_v4().to_string();
        pod.node_name = Some(new_name.clone());
        for claim in &mut pod.resource_claims {
            if !claim.claim_name.is_empty() {
                claim.claim_name = format!("{}-{suffix}", claim.claim_name);
            }
        }
        pod
    });
    let mut sanitized = NodeInfo::with_pods(node, pods);

    let slices = info
        .local_resource_slices()
        .iter()
        .map(|s| {
            let mut slice = s.clone();
            slice.name = format!("{}-{suffix}", slice.name);
            slice.node_name = new_name.clone();
            slice
        })
        .collect();
    sanitized.set_local_resource_slices(slices);
    sanitized
}

fn sanitize_node(node: &Node, new_name: &str, taint_config: Option<&TaintConfig>) -> Node {
    let mut node = node.clone();
    node.name = new_name.to_string();
    node.uid = Uuid::new_v4().to_string();
    node.labels
        .insert(LABEL_HOSTNAME.to_string(), new_name.to_string());
    if let Some(config) = taint_config {
        node.taints = sanitize_taints(&node.taints, config);
    }
    node
}
