//! `NodeInfo`: one node together with the pods bound to it.

use std::sync::{Arc, OnceLock};

use nodescale_core::pod::HostPort;
use nodescale_core::{Node, Pod, ResourceSlice, Resources};

/// A node plus the pods scheduled onto it.
///
/// Pods are reference counted so that cloning a `NodeInfo` (which the
/// snapshots do on every copy-on-write) copies pointers, not pod specs.
/// The affinity views hold the same `Arc`s as `pods`.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    node: Arc<Node>,
    pods: Vec<Arc<Pod>>,
    requested: Resources,
    used_ports: Vec<HostPort>,
    local_resource_slices: Vec<ResourceSlice>,
    pods_with_affinity: OnceLock<Vec<Arc<Pod>>>,
    pods_with_required_anti_affinity: OnceLock<Vec<Arc<Pod>>>,
}

impl NodeInfo {
    pub fn new(node: Node) -> Self {
        Self {
            node: Arc::new(node),
            pods: Vec::new(),
            requested: Resources::default(),
            used_ports: Vec::new(),
            local_resource_slices: Vec::new(),
            pods_with_affinity: OnceLock::new(),
            pods_with_required_anti_affinity: OnceLock::new(),
        }
    }

    pub fn with_pods(node: Node, pods: impl IntoIterator<Item = Pod>) -> Self {
        let mut info = Self::new(node);
        for pod in pods {
            info.add_pod(pod);
        }
        info
    }

    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn pods(&self) -> &[Arc<Pod>] {
        &self.pods
    }

    /// Sum of the effective requests of every pod on the node.
    pub fn requested(&self) -> &Resources {
        &self.requested
    }

    pub fn used_ports(&self) -> &[HostPort] {
        &self.used_ports
    }

    pub fn local_resource_slices(&self) -> &[ResourceSlice] {
        &self.local_resource_slices
    }

    pub fn set_local_resource_slices(&mut self, slices: Vec<ResourceSlice>) {
        self.local_resource_slices = slices;
    }

    /// Replace the node object, keeping the pods.
    pub fn set_node(&mut self, node: Node) {
        self.node = Arc::new(node);
    }

    /// Bind `pod` to this node. The pod's `node_name` is overwritten.
    pub fn add_pod(&mut self, mut pod: Pod) {
        pod.node_name = Some(self.node.name.clone());
        self.add_pod_arc(Arc::new(pod));
    }

    pub(crate) fn add_pod_arc(&mut self, pod: Arc<Pod>) {
        self.requested += &pod.requests();
        self.used_ports.extend(pod.host_ports());
        self.pods.push(pod);
        self.invalidate_views();
    }

    /// Unbind the pod with the given namespace and name, preserving the
    /// order of the remaining pods.
    pub fn remove_pod(&mut self, namespace: &str, name: &str) -> Option<Arc<Pod>> {
        let idx = self
            .pods
            .iter()
            .position(|p| p.namespace == namespace && p.name == name)?;
        let pod = self.pods.remove(idx);
        self.requested -= &pod.requests();
        self.used_ports = self.pods.iter().flat_map(|p| p.host_ports()).collect();
        self.invalidate_views();
        Some(pod)
    }

    pub fn find_pod(&self, namespace: &str, name: &str) -> Option<&Arc<Pod>> {
        self.pods
            .iter()
            .find(|p| p.namespace == namespace && p.name == name)
    }

    /// Pods declaring required pod affinity or any anti-affinity.
    pub fn pods_with_affinity(&self) -> &[Arc<Pod>] {
        self.pods_with_affinity.get_or_init(|| {
            self.pods
                .iter()
                .filter(|p| p.has_pod_affinity())
                .cloned()
                .collect()
        })
    }

    pub fn pods_with_required_anti_affinity(&self) -> &[Arc<Pod>] {
        self.pods_with_required_anti_affinity.get_or_init(|| {
            self.pods
                .iter()
                .filter(|p| p.has_required_pod_anti_affinity())
                .cloned()
                .collect()
        })
    }

    /// Allocatable minus requested, per resource.
    pub fn free(&self) -> Resources {
        &self.node.allocatable - &self.requested
    }

    fn invalidate_views(&mut self) {
        self.pods_with_affinity = OnceLock::new();
        self.pods_with_required_anti_affinity = OnceLock::new();
    }
}
