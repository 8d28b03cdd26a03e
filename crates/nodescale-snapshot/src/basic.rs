//! Whole-map snapshot: `fork` clones the node map.
//!
//! Node infos are reference counted, so the clone copies one pointer per
//! node. Mutations inside the fork copy-on-write the touched node info only.

use std::sync::Arc;

use nodescale_core::{Node, Pod};
use tracing::trace;

use crate::error::{SnapshotError, SnapshotResult};
use crate::node_info::NodeInfo;
use crate::snapshot::{ClusterSnapshot, Layer, ListCache, NodeInfoList};

#[derive(Debug, Default)]
pub struct BasicSnapshot {
    base: Layer,
    fork: Option<Layer>,
    cache: ListCache,
}

impl BasicSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    fn current(&self) -> &Layer {
        self.fork.as_ref().unwrap_or(&self.base)
    }

    fn current_mut(&mut self) -> &mut Layer {
        self.cache.invalidate();
        self.fork.as_mut().unwrap_or(&mut self.base)
    }
}

impl ClusterSnapshot for BasicSnapshot {
    fn add_node_info(&mut self, info: NodeInfo) -> SnapshotResult<()> {
        self.current_mut().add_node_info(info)
    }

    fn remove_node(&mut self, node_name: &str) -> SnapshotResult<()> {
        self.current_mut().remove_node(node_name)
    }

    fn update_node(&mut self, node: Node) -> SnapshotResult<()> {
        self.current_mut().update_node(node)
    }

    fn add_pod(&mut self, pod: Pod, node_name: &str) -> SnapshotResult<()> {
        self.current_mut().add_pod(pod, node_name)
    }

    fn remove_pod(
        &mut self,
        namespace: &str,
        pod_name: &str,
        node_name: &str,
    ) -> SnapshotResult<()> {
        self.current_mut().remove_pod(namespace, pod_name, node_name)
    }

    fn get(&self, node_name: &str) -> SnapshotResult<Arc<NodeInfo>> {
        self.current().get(node_name).map(|e| e.info.clone())
    }

    fn node_infos(&self) -> NodeInfoList {
        self.cache
            .all(|| self.current().nodes.values().cloned().collect())
    }

    fn node_infos_with_pod_affinity(&self) -> NodeInfoList {
        self.cache.with_affinity(&self.node_infos())
    }

    fn node_infos_with_required_anti_affinity(&self) -> NodeInfoList {
        self.cache.with_anti_affinity(&self.node_infos())
    }

    fn is_forked(&self) -> bool {
        self.fork.is_some()
    }

    fn fork(&mut self) -> SnapshotResult<()> {
        if self.fork.is_some() {
            return Err(SnapshotError::AlreadyForked);
        }
        self.fork = Some(self.base.clone());
        trace!(nodes = self.base.nodes.len(), "forked basic snapshot");
        Ok(())
    }

    fn revert(&mut self) {
        if self.fork.take().is_some() {
            self.cache.invalidate();
        }
    }

    fn commit(&mut self) {
        if let Some(fork) = self.fork.take() {
            self.base = fork;
        }
    }

    fn clear(&mut self) {
        self.base = Layer::default();
        self.fork = None;
        self.cache.invalidate();
    }
}
