//! Overlay snapshot: `fork` is O(1), `commit` is O(changes).
//!
//! While forked, reads consult three overlays before falling through to the
//! base:
//!
//! - `added`: nodes created inside the fork,
//! - `modified`: copies of base nodes that were mutated inside the fork,
//! - `deleted`: base node names hidden by the fork.
//!
//! A node that is re-added after being deleted inside the same fork lands in
//! `modified`, because the base still holds the old version and commit has to
//! overwrite it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use nodescale_core::{Node, Pod};
use tracing::trace;

use crate::error::{SnapshotError, SnapshotResult};
use crate::node_info::NodeInfo;
use crate::snapshot::{
    check_new_pod_uids, pod_not_found, ClusterSnapshot, Entry, Layer, ListCache, NodeInfoList,
};

#[derive(Debug, Default)]
struct Delta {
    added: HashMap<String, Entry>,
    modified: HashMap<String, Entry>,
    deleted: HashSet<String>,
    /// pod uid → node name, for pods bound inside the fork
    added_uids: HashMap<String, String>,
    /// base pod uids unbound inside the fork
    removed_uids: HashSet<String>,
    next_seq: u64,
}

#[derive(Debug, Default)]
pub struct DeltaSnapshot {
    base: Layer,
    delta: Option<Delta>,
    cache: ListCache,
}

impl DeltaSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, node_name: &str) -> SnapshotResult<&Entry> {
        if let Some(delta) = &self.delta {
            if let Some(entry) = delta.added.get(node_name) {
                return Ok(entry);
            }
            if let Some(entry) = delta.modified.get(node_name) {
                return Ok(entry);
            }
            if delta.deleted.contains(node_name) {
                return Err(SnapshotError::NodeNotFound(node_name.to_string()));
            }
        }
        self.base.get(node_name)
    }

    fn uid_owner(&self, uid: &str) -> Option<String> {
        if uid.is_empty() {
            return None;
        }
        if let Some(delta) = &self.delta {
            if let Some(node) = delta.added_uids.get(uid) {
                return Some(node.clone());
            }
            if delta.removed_uids.contains(uid) {
                return None;
            }
        }
        self.base.pod_uids.get(uid).cloned()
    }

    /// Return the writable entry for `node_name`, copying it from the base
    /// into `modified` on first touch.
    fn node_info_to_modify(&mut self, node_name: &str) -> SnapshotResult<&mut Entry> {
        let not_found = || SnapshotError::NodeNotFound(node_name.to_string());
        let Some(delta) = self.delta.as_mut() else {
            return self.base.nodes.get_mut(node_name).ok_or_else(not_found);
        };
        if delta.added.contains_key(node_name) {
            return delta.added.get_mut(node_name).ok_or_else(not_found);
        }
        if !delta.modified.contains_key(node_name) {
            if delta.deleted.contains(node_name) {
                return Err(not_found());
            }
            let entry = self.base.nodes.get(node_name).cloned().ok_or_else(not_found)?;
            delta.modified.insert(node_name.to_string(), entry);
        }
        delta.modified.get_mut(node_name).ok_or_else(not_found)
    }

    fn record_uid(delta: &mut Delta, uid: &str, node_name: &str) {
        if uid.is_empty() {
            return;
        }
        delta.removed_uids.remove(uid);
        delta
            .added_uids
            .insert(uid.to_string(), node_name.to_string());
    }

    fn forget_uid(delta: &mut Delta, base: &Layer, uid: &str) {
        delta.added_uids.remove(uid);
        if base.pod_uids.contains_key(uid) {
            delta.removed_uids.insert(uid.to_string());
        }
    }
}

impl ClusterSnapshot for DeltaSnapshot {
    fn add_node_info(&mut self, info: NodeInfo) -> SnapshotResult<()> {
        if self.delta.is_none() {
            self.cache.invalidate();
            return self.base.add_node_info(info);
        }
        if self.entry(info.name()).is_ok() {
            return Err(SnapshotError::NodeAlreadyExists(info.name().to_string()));
        }
        check_new_pod_uids(&info, |uid| self.uid_owner(uid))?;

        self.cache.invalidate();
        let Some(delta) = self.delta.as_mut() else {
            return Ok(());
        };
        let name = info.name().to_string();
        for pod in info.pods() {
            Self::record_uid(delta, &pod.uid, &name);
        }
        let entry = Entry::new(delta.next_seq, info);
        delta.next_seq += 1;
        if delta.deleted.remove(&name) {
            delta.modified.insert(name, entry);
        } else {
            delta.added.insert(name, entry);
        }
        Ok(())
    }

    fn remove_node(&mut self, node_name: &str) -> SnapshotResult<()> {
        let Some(delta) = self.delta.as_mut() else {
            self.cache.invalidate();
            return self.base.remove_node(node_name);
        };
        let removed = if let Some(entry) = delta.added.remove(node_name) {
            entry
        } else if let Some(entry) = delta.modified.remove(node_name) {
            delta.deleted.insert(node_name.to_string());
            entry
        } else if delta.deleted.contains(node_name) {
            return Err(SnapshotError::NodeNotFound(node_name.to_string()));
        } else {
            let entry = self.base.get(node_name)?.clone();
            delta.deleted.insert(node_name.to_string());
            entry
        };
        for pod in removed.info.pods() {
            Self::forget_uid(delta, &self.base, &pod.uid);
        }
        self.cache.invalidate();
        Ok(())
    }

    fn update_node(&mut self, node: Node) -> SnapshotResult<()> {
        let entry = self.node_info_to_modify(&node.name)?;
        entry.info_mut().set_node(node);
        self.cache.invalidate();
        Ok(())
    }

    fn add_pod(&mut self, pod: Pod, node_name: &str) -> SnapshotResult<()> {
        self.entry(node_name)?;
        if let Some(owner) = self.uid_owner(&pod.uid) {
            return Err(SnapshotError::DuplicatePodUid {
                uid: pod.uid.clone(),
                node: owner,
            });
        }
        let uid = pod.uid.clone();
        if self.delta.is_none() {
            self.cache.invalidate();
            return self.base.add_pod(pod, node_name);
        }
        self.node_info_to_modify(node_name)?.info_mut().add_pod(pod);
        if let Some(delta) = self.delta.as_mut() {
            Self::record_uid(delta, &uid, node_name);
        }
        self.cache.invalidate();
        Ok(())
    }

    fn remove_pod(
        &mut self,
        namespace: &str,
        pod_name: &str,
        node_name: &str,
    ) -> SnapshotResult<()> {
        if self.delta.is_none() {
            self.cache.invalidate();
            return self.base.remove_pod(namespace, pod_name, node_name);
        }
        let uid = self
            .entry(node_name)?
            .info
            .find_pod(namespace, pod_name)
            .map(|p| p.uid.clone())
            .ok_or_else(|| pod_not_found(namespace, pod_name, node_name))?;
        self.node_info_to_modify(node_name)?
            .info_mut()
            .remove_pod(namespace, pod_name);
        if let Some(delta) = self.delta.as_mut() {
            Self::forget_uid(delta, &self.base, &uid);
        }
        self.cache.invalidate();
        Ok(())
    }

    fn get(&self, node_name: &str) -> SnapshotResult<Arc<NodeInfo>> {
        self.entry(node_name).map(|e| e.info.clone())
    }

    fn node_infos(&self) -> NodeInfoList {
        self.cache.all(|| match &self.delta {
            None => self.base.nodes.values().cloned().collect(),
            Some(delta) => self
                .base
                .nodes
                .iter()
                .filter(|(name, _)| {
                    !delta.deleted.contains(*name) && !delta.modified.contains_key(*name)
                })
                .map(|(_, entry)| entry.clone())
                .chain(delta.modified.values().cloned())
                .chain(delta.added.values().cloned())
                .collect(),
        })
    }

    fn node_infos_with_pod_affinity(&self) -> NodeInfoList {
        self.cache.with_affinity(&self.node_infos())
    }

    fn node_infos_with_required_anti_affinity(&self) -> NodeInfoList {
        self.cache.with_anti_affinity(&self.node_infos())
    }

    fn is_forked(&self) -> bool {
        self.delta.is_some()
    }

    fn fork(&mut self) -> SnapshotResult<()> {
        if self.delta.is_some() {
            return Err(SnapshotError::AlreadyForked);
        }
        self.delta = Some(Delta {
            next_seq: self.base.next_seq,
            ..Default::default()
        });
        Ok(())
    }

    fn revert(&mut self) {
        if self.delta.take().is_some() {
            self.cache.invalidate();
        }
    }

    fn commit(&mut self) {
        let Some(delta) = self.delta.take() else {
            return;
        };
        trace!(
            added = delta.added.len(),
            modified = delta.modified.len(),
            deleted = delta.deleted.len(),
            "committing snapshot delta"
        );
        for name in &delta.deleted {
            self.base.nodes.remove(name);
        }
        for (name, entry) in delta.modified {
            self.base.nodes.insert(name, entry);
        }
        for (name, entry) in delta.added {
            self.base.nodes.insert(name, entry);
        }
        for uid in &delta.removed_uids {
            self.base.pod_uids.remove(uid);
        }
        self.base.pod_uids.extend(delta.added_uids);
        self.base.next_seq = delta.next_seq;
    }

    fn clear(&mut self) {
        self.base = Layer::default();
        self.delta = None;
        self.cache.invalidate();
    }
}
