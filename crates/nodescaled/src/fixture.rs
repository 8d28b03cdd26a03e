//! Cluster fixture: a JSON description of nodes, pods, node groups and
//! workload objects that stands in for live cluster listers.
//!
//! ```json
//! {
//!   "node_groups": [{ "id": "ng1", "min_size": 1, "max_size": 5,
//!                     "template": { "name": "ng1-template", ... },
//!                     "nodes": ["n1"] }],
//!   "nodes": [{ "name": "n1", ... }],
//!   "pods": [{ "name": "web-0", "node_name": "n1", ... }]
//! }
//! ```
//!
//! Pods without `node_name` are pending.

use std::path::Path;

use anyhow::Context;
use nodescale_cloud::{Instance, StaticCloudProvider, StaticNodeGroup};
use nodescale_core::{DaemonSet, Node, Pod, PodDisruptionBudget};
use nodescale_simulator::StaticControllerLister;
use nodescale_snapshot::{ClusterSnapshot, DeltaSnapshot, NodeInfo};
use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterFixture {
    pub node_groups: Vec<NodeGroupFixture>,
    pub nodes: Vec<Node>,
    pub pods: Vec<Pod>,
    pub daemon_sets: Vec<DaemonSet>,
    pub pdbs: Vec<PodDisruptionBudget>,
    pub controllers: Vec<ControllerFixture>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeGroupFixture {
    pub id: String,
    pub min_size: i64,
    pub max_size: i64,
    /// Defaults to the number of member nodes.
    pub target_size: Option<i64>,
    pub template: Option<Node>,
    /// Pods a fresh node starts with, besides daemon set pods.
    pub template_pods: Vec<Pod>,
    /// Names of member nodes.
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerFixture {
    pub namespace: String,
    pub kind: String,
    pub name: String,
    pub replicas: Option<i32>,
}

impl ClusterFixture {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read cluster fixture {}", path.display()))?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> anyhow::Result<Self> {
        serde_json::from_str(content).context("failed to parse cluster fixture")
    }

    /// An in-memory provider holding the fixture's node groups.
    pub fn provider(&self) -> StaticCloudProvider {
        let provider = StaticCloudProvider::new();
        for ng in &self.node_groups {
            let instances = ng.nodes.iter().map(Instance::running).collect();
            let target = ng.target_size.unwrap_or(ng.nodes.len() as i64);
            let mut group = StaticNodeGroup::new(ng.id.clone(), ng.min_size, ng.max_size)
                .with_target_size(target)
                .with_instances(instances);
            if let Some(template) = &ng.template {
                group = group.with_template(NodeInfo::with_pods(template.clone(), ng.template_pods.clone()));
            }
            provider.add_node_group(group);
            for node in &ng.nodes {
                provider.add_node(node.clone(), ng.id.clone());
            }
        }
        provider
    }

    pub fn lister(&self) -> StaticControllerLister {
        let mut lister = StaticControllerLister::new();
        for c in &self.controllers {
            lister.add(&c.namespace, &c.kind, &c.name, c.replicas);
        }
        lister
    }

    /// A fresh snapshot with every node and the pods bound to it. Pods bound
    /// to unknown nodes are skipped.
    pub fn snapshot(&self) -> anyhow::Result<DeltaSnapshot> {
        let mut snapshot = DeltaSnapshot::new();
        for node in &self.nodes {
            let pods = self
                .pods
                .iter()
                .filter(|p| p.node_name.as_deref() == Some(node.name.as_str()))
                .cloned();
            snapshot
                .add_node_info(NodeInfo::with_pods(node.clone(), pods))
                .with_context(|| format!("failed to add node {}", node.name))?;
        }
        for pod in &self.pods {
            if let Some(node) = &pod.node_name {
                if !self.nodes.iter().any(|n| &n.name == node) {
                    warn!(pod = %pod.key(), node = %node, "pod bound to unknown node");
                }
            }
        }
        Ok(snapshot)
    }

    /// Pods waiting for a node.
    pub fn pending_pods(&self) -> Vec<Pod> {
        self.pods
            .iter()
            .filter(|p| p.node_name.is_none() && !p.is_terminal() && !p.is_terminating())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodescale_cloud::{CloudProvider, NodeGroup};
    use nodescale_core::testing::{build_test_node, build_test_pod, on_node};

    fn fixture() -> ClusterFixture {
        ClusterFixture {
            node_groups: vec![NodeGroupFixture {
                id: "ng1".into(),
                min_size: 1,
                max_size: 4,
                template: Some(build_test_node("ng1-template", 1000, 1000)),
                nodes: vec!["n1".into()],
                ..Default::default()
            }],
            nodes: vec![build_test_node("n1", 1000, 1000)],
            pods: vec![
                on_node(build_test_pod("bound", 100, 100), "n1"),
                build_test_pod("pending", 100, 100),
                on_node(build_test_pod("stray", 100, 100), "gone"),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn snapshot_binds_pods_to_known_nodes() {
        let snapshot = fixture().snapshot().unwrap();
        let n1 = snapshot.get("n1").unwrap();
        assert_eq!(n1.pods().len(), 1);
        assert_eq!(n1.pods()[0].name, "bound");
        assert_eq!(snapshot.list_pods().len(), 1);
    }

    #[test]
    fn pending_pods_have_no_node() {
        let pending = fixture().pending_pods();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].name, "pending");
    }

    #[test]
    fn provider_maps_nodes_to_groups() {
        let provider = fixture().provider();
        let group = provider
            .node_group_for_node(&build_test_node("n1", 1, 1))
            .unwrap()
            .unwrap();
        assert_eq!(group.id(), "ng1");
        assert_eq!(group.target_size().unwrap(), 1);
        assert_eq!(group.template_node_info().unwrap().name(), "ng1-template");
    }

    #[test]
    fn parses_json() {
        let fixture = ClusterFixture::from_json_str(
            r#"{
                "node_groups": [{"id": "ng1", "max_size": 3, "nodes": ["n1"]}],
                "nodes": [{"name": "n1", "allocatable": {"milli_cpu": 2000, "memory": 4096, "pods": 110}}],
                "pods": [{"namespace": "default", "name": "p", "uid": "p-uid", "node_name": "n1"}]
            }"#,
        )
        .unwrap();
        assert_eq!(fixture.node_groups[0].max_size, 3);
        assert_eq!(fixture.nodes[0].allocatable.milli_cpu, 2000);
        assert!(fixture.pending_pods().is_empty());
    }

    #[test]
    fn bundled_fixture_loads() {
        let fixture = ClusterFixture::from_json_str(include_str!("../../../config/cluster.json")).unwrap();
        assert_eq!(fixture.nodes.len(), 3);
        assert_eq!(fixture.controllers.len(), 2);
        assert_eq!(fixture.snapshot().unwrap().list_pods().len(), 3);
    }
}
