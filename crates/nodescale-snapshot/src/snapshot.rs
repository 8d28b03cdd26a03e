//! The `ClusterSnapshot` contract shared by both snapshot shapes.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use nodescale_core::{Node, Pod};

use crate::error::{SnapshotError, SnapshotResult};
use crate::node_info::NodeInfo;

/// Shared, immutable listing of node infos in snapshot order.
pub type NodeInfoList = Arc<[Arc<NodeInfo>]>;

/// An in-memory model of the cluster supporting a one-deep transaction:
/// `fork` opens it, `commit` folds it into the base, `revert` discards it.
///
/// Nodes are listed in insertion order. Listings are cached and shared
/// until the next mutation.
pub trait ClusterSnapshot: Send + Sync {
    /// Add a node together with the pods already on it.
    fn add_node_info(&mut self, info: NodeInfo) -> SnapshotResult<()>;

    fn remove_node(&mut self, node_name: &str) -> SnapshotResult<()>;

    /// Replace a node object while keeping its pods.
    fn update_node(&mut self, node: Node) -> SnapshotResult<()>;

    fn add_pod(&mut self, pod: Pod, node_name: &str) -> SnapshotResult<()>;

    fn remove_pod(&mut self, namespace: &str, pod_name: &str, node_name: &str)
    -> SnapshotResult<()>;

    fn get(&self, node_name: &str) -> SnapshotResult<Arc<NodeInfo>>;

    fn node_infos(&self) -> NodeInfoList;

    fn node_infos_with_pod_affinity(&self) -> NodeInfoList;

    fn node_infos_with_required_anti_affinity(&self) -> NodeInfoList;

    fn is_forked(&self) -> bool;

    /// Start recording changes. Fails if a fork is already open.
    fn fork(&mut self) -> SnapshotResult<()>;

    /// Drop all changes since `fork`. No-op without a fork.
    fn revert(&mut self);

    /// Apply all changes since `fork` to the base. No-op without a fork.
    fn commit(&mut self);

    /// Drop every node, pod and any open fork.
    fn clear(&mut self);

    fn add_node(&mut self, node: Node) -> SnapshotResult<()> {
        self.add_node_info(NodeInfo::new(node))
    }

    fn add_nodes(&mut self, nodes: Vec<Node>) -> SnapshotResult<()> {
        for node in nodes {
            self.add_node(node)?;
        }
        Ok(())
    }

    fn contains(&self, node_name: &str) -> bool {
        self.get(node_name).is_ok()
    }

    /// Every pod in the snapshot, in node order.
    fn list_pods(&self) -> Vec<Arc<Pod>> {
        self.node_infos()
            .iter()
            .flat_map(|info| info.pods().iter().cloned())
            .collect()
    }
}

// ── Shared internals ───────────────────────────────────────────

/// A node info tagged with its insertion sequence number.
#[derive(Debug, Clone)]
pub(crate) struct Entry {
    pub seq: u64,
    pub info: Arc<NodeInfo>,
}

impl Entry {
    pub fn new(seq: u64, info: NodeInfo) -> Self {
        Self {
            seq,
            info: Arc::new(info),
        }
    }

    pub fn info_mut(&mut self) -> &mut NodeInfo {
        Arc::make_mut(&mut self.info)
    }
}

/// Lazily-built listings, dropped on every mutation.
#[derive(Debug, Default)]
pub(crate) struct ListCache {
    all: OnceLock<NodeInfoList>,
    with_affinity: OnceLock<NodeInfoList>,
    with_anti_affinity: OnceLock<NodeInfoList>,
}

impl ListCache {
    pub fn invalidate(&mut self) {
        *self = Self::default();
    }

    pub fn all(&self, build: impl FnOnce() -> Vec<Entry>) -> NodeInfoList {
        self.all
            .get_or_init(|| {
                let mut entries = build();
                entries.sort_by_key(|e| e.seq);
                entries.into_iter().map(|e| e.info).collect()
            })
            .clone()
    }

    pub fn with_affinity(&self, all: &NodeInfoList) -> NodeInfoList {
        self.with_affinity
            .get_or_init(|| {
                all.iter()
                    .filter(|i| !i.pods_with_affinity().is_empty())
                    .cloned()
                    .collect()
            })
            .clone()
    }

    pub fn with_anti_affinity(&self, all: &NodeInfoList) -> NodeInfoList {
        self.with_anti_affinity
            .get_or_init(|| {
                all.iter()
                    .filter(|i| !i.pods_with_required_anti_affinity().is_empty())
                    .cloned()
                    .collect()
            })
            .clone()
    }
}

/// A flat node map with a pod-uid index. Used as the base of both snapshot
/// shapes and as the forked copy in the basic one.
#[derive(Debug, Clone, Default)]
pub(crate) struct Layer {
    pub nodes: HashMap<String, Entry>,
    /// pod uid → node name
    pub pod_uids: HashMap<String, String>,
    pub next_seq: u64,
}

impl Layer {
    pub fn get(&self, node_name: &str) -> SnapshotResult<&Entry> {
        self.nodes
            .get(node_name)
            .ok_or_else(|| SnapshotError::NodeNotFound(node_name.to_string()))
    }

    pub fn add_node_info(&mut self, info: NodeInfo) -> SnapshotResult<()> {
        if self.nodes.contains_key(info.name()) {
            return Err(SnapshotError::NodeAlreadyExists(info.name().to_string()));
        }
        check_new_pod_uids(&info, |uid| self.pod_uids.get(uid).cloned())?;
        for pod in info.pods().iter().filter(|p| !p.uid.is_empty()) {
            self.pod_uids
                .insert(pod.uid.clone(), info.name().to_string());
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.nodes
            .insert(info.name().to_string(), Entry::new(seq, info));
        Ok(())
    }

    pub fn remove_node(&mut self, node_name: &str) -> SnapshotResult<()> {
        let entry = self
            .nodes
            .remove(node_name)
            .ok_or_else(|| SnapshotError::NodeNotFound(node_name.to_string()))?;
        for pod in entry.info.pods() {
            self.pod_uids.remove(&pod.uid);
        }
        Ok(())
    }

    pub fn update_node(&mut self, node: Node) -> SnapshotResult<()> {
        let entry = self
            .nodes
            .get_mut(&node.name)
            .ok_or_else(|| SnapshotError::NodeNotFound(node.name.clone()))?;
        entry.info_mut().set_node(node);
        Ok(())
    }

    pub fn add_pod(&mut self, pod: Pod, node_name: &str) -> SnapshotResult<()> {
        if !self.nodes.contains_key(node_name) {
            return Err(SnapshotError::NodeNotFound(node_name.to_string()));
        }
        if let Some(owner) = self.pod_uids.get(&pod.uid).filter(|_| !pod.uid.is_empty()) {
            return Err(SnapshotError::DuplicatePodUid {
                uid: pod.uid.clone(),
                node: owner.clone(),
            });
        }
        let uid = pod.uid.clone();
        let entry = self
            .nodes
            .get_mut(node_name)
            .ok_or_else(|| SnapshotError::NodeNotFound(node_name.to_string()))?;
        entry.info_mut().add_pod(pod);
        if !uid.is_empty() {
            self.pod_uids.insert(uid, node_name.to_string());
        }
        Ok(())
    }

    pub fn remove_pod(
        &mut self,
        namespace: &str,
        pod_name: &str,
        node_name: &str,
    ) -> SnapshotResult<()> {
        let entry = self
            .nodes
            .get_mut(node_name)
            .ok_or_else(|| SnapshotError::NodeNotFound(node_name.to_string()))?;
        if entry.info.find_pod(namespace, pod_name).is_none() {
            return Err(pod_not_found(namespace, pod_name, node_name));
        }
        if let Some(pod) = entry.info_mut().remove_pod(namespace, pod_name) {
            self.pod_uids.remove(&pod.uid);
        }
        Ok(())
    }
}

pub(crate) fn pod_not_found(namespace: &str, pod_name: &str, node_name: &str) -> SnapshotError {
    SnapshotError::PodNotFound {
        pod: format!("{namespace}/{pod_name}"),
        node: node_name.to_string(),
    }
}

/// Reject a node info whose pods collide with each other or with pods
/// already in the snapshot (`owner_of` looks up the current owner of a uid).
pub(crate) fn check_new_pod_uids(
    info: &NodeInfo,
    owner_of: impl Fn(&str) -> Option<String>,
) -> SnapshotResult<()> {
    let mut seen = HashSet::new();
    for pod in info.pods().iter().filter(|p| !p.uid.is_empty()) {
        if !seen.insert(pod.uid.as_str()) {
            return Err(SnapshotError::DuplicatePodUid {
                uid: pod.uid.clone(),
                node: info.name().to_string(),
            });
        }
        if let Some(owner) = owner_of(&pod.uid) {
            return Err(SnapshotError::DuplicatePodUid {
                uid: pod.uid.clone(),
                node: owner,
            });
        }
    }
    Ok(())
}
