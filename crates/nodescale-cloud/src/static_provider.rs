//! In-memory cloud provider.
//!
//! Node groups, their instances and the node → group mapping are set up
//! by the caller. Size changes are recorded but nothing is provisioned.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use nodescale_core::resources::GIB;
use nodescale_core::{Node, Pod, Timestamp};
use nodescale_snapshot::NodeInfo;
use tracing::info;

use crate::error::{CloudProviderError, CloudResult};
use crate::provider::{CloudProvider, Instance, NodeGroup, PricingModel};

#[derive(Debug)]
struct GroupState {
    target_size: i64,
    instances: Vec<Instance>,
    exists: bool,
    provider_error: Option<CloudProviderError>,
}

/// A node group whose state lives in memory. Clones share state.
#[derive(Debug, Clone)]
pub struct StaticNodeGroup {
    id: String,
    min_size: i64,
    max_size: i64,
    autoprovisioned: bool,
    template: Option<NodeInfo>,
    state: Arc<Mutex<GroupState>>,
}

impl StaticNodeGroup {
    pub fn new(id: impl Into<String>, min_size: i64, max_size: i64) -> Self {
        Self {
            id: id.into(),
            min_size,
            max_size,
            autoprovisioned: false,
            template: None,
            state: Arc::new(Mutex::new(GroupState {
                target_size: 0,
                instances: Vec::new(),
                exists: true,
                provider_error: None,
            })),
        }
    }

    pub fn with_target_size(self, target_size: i64) -> Self {
        self.lock().target_size = target_size;
        self
    }

    pub fn with_instances(self, instances: Vec<Instance>) -> Self {
        self.set_instances(instances);
        self
    }

    pub fn with_template(mut self, template: NodeInfo) -> Self {
        self.template = Some(template);
        self
    }

    /// An autoprovisioned group that has not been created yet.
    pub fn autoprovisioned(mut self) -> Self {
        self.autoprovisioned = true;
        self.lock().exists = false;
        self
    }

    pub fn set_instances(&self, instances: Vec<Instance>) {
        self.lock().instances = instances;
    }

    /// Make `nodes()` and `target_size()` fail until cleared with `None`.
    pub fn set_provider_error(&self, error: Option<CloudProviderError>) {
        self.lock().provider_error = error;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GroupState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl NodeGroup for StaticNodeGroup {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn min_size(&self) -> i64 {
        self.min_size
    }

    fn max_size(&self) -> i64 {
        self.max_size
    }

    fn target_size(&self) -> CloudResult<i64> {
        let state = self.lock();
        match &state.provider_error {
            Some(err) => Err(err.clone()),
            None => Ok(state.target_size),
        }
    }

    fn nodes(&self) -> CloudResult<Vec<Instance>> {
        let state = self.lock();
        match &state.provider_error {
            Some(err) => Err(err.clone()),
            None => Ok(state.instances.clone()),
        }
    }

    fn template_node_info(&self) -> CloudResult<NodeInfo> {
        self.template.clone().ok_or(CloudProviderError::NotImplemented)
    }

    fn exist(&self) -> bool {
        self.lock().exists
    }

    fn autoprovisioned(&self) -> bool {
        self.autoprovisioned
    }

    fn create(&self) -> CloudResult<Arc<dyn NodeGroup>> {
        let mut state = self.lock();
        if !self.autoprovisioned || state.exists {
            return Err(CloudProviderError::Permanent(format!(
                "node group {} cannot be created",
                self.id
            )));
        }
        state.exists = true;
        drop(state);
        info!(node_group = %self.id, "node group created");
        Ok(Arc::new(self.clone()))
    }

    fn delete(&self) -> CloudResult<()> {
        if !self.autoprovisioned {
            return Err(CloudProviderError::Permanent(format!(
                "node group {} is not autoprovisioned",
                self.id
            )));
        }
        self.lock().exists = false;
        info!(node_group = %self.id, "node group deleted");
        Ok(())
    }

    fn increase_size(&self, delta: i64) -> CloudResult<()> {
        if delta <= 0 {
            return Err(CloudProviderError::Permanent(format!(
                "size increase must be positive, got {delta}"
            )));
        }
        let mut state = self.lock();
        let new_size = state.target_size + delta;
        if new_size > self.max_size {
            return Err(CloudProviderError::Permanent(format!(
                "size increase too large: desired {new_size}, max {}",
                self.max_size
            )));
        }
        state.target_size = new_size;
        info!(node_group = %self.id, delta, target_size = new_size, "node group size increased");
        Ok(())
    }

    fn decrease_target_size(&self, delta: i64) -> CloudResult<()> {
        if delta <= 0 {
            return Err(CloudProviderError::Permanent(format!(
                "target size decrease must be positive, got {delta}"
            )));
        }
        let mut state = self.lock();
        let new_size = state.target_size - delta;
        let registered = state.instances.len() as i64;
        if new_size < registered {
            return Err(CloudProviderError::Permanent(format!(
                "cannot decrease target size to {new_size}: {registered} nodes registered"
            )));
        }
        state.target_size = new_size;
        info!(node_group = %self.id, delta, target_size = new_size, "node group target size decreased");
        Ok(())
    }
}

/// Prices nodes by allocatable and pods by requests, per hour.
#[derive(Debug, Clone, Copy)]
pub struct LinearPricing {
    pub cpu_core_hour: f64,
    pub memory_gib_hour: f64,
}

impl LinearPricing {
    fn price(&self, milli_cpu: i64, memory: i64, start: Timestamp, end: Timestamp) -> f64 {
        let hours = end.saturating_sub(start) as f64 / 3600.0;
        let cores = milli_cpu as f64 / 1000.0;
        let gib = memory as f64 / GIB as f64;
        (cores * self.cpu_core_hour + gib * self.memory_gib_hour) * hours
    }
}

impl PricingModel for LinearPricing {
    fn node_price(&self, node: &Node, start: Timestamp, end: Timestamp) -> CloudResult<f64> {
        let a = &node.allocatable;
        Ok(self.price(a.milli_cpu, a.memory, start, end))
    }

    fn pod_price(&self, pod: &Pod, start: Timestamp, end: Timestamp) -> CloudResult<f64> {
        let r = pod.requests();
        Ok(self.price(r.milli_cpu, r.memory, start, end))
    }
}

#[derive(Default)]
pub struct StaticCloudProvider {
    groups: RwLock<Vec<Arc<StaticNodeGroup>>>,
    node_to_group: RwLock<HashMap<String, String>>,
    pricing: Option<Arc<dyn PricingModel>>,
}

impl StaticCloudProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_pricing(mut self, pricing: Arc<dyn PricingModel>) -> Self {
        self.pricing = Some(pricing);
        self
    }

    /// Register a group, replacing any group with the same id.
    pub fn add_node_group(&self, group: StaticNodeGroup) -> Arc<StaticNodeGroup> {
        let group = Arc::new(group);
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        groups.retain(|g| g.id != group.id);
        groups.push(Arc::clone(&group));
        group
    }

    pub fn remove_node_group(&self, id: &str) -> bool {
        let mut groups = self.groups.write().unwrap_or_else(PoisonError::into_inner);
        let before = groups.len();
        groups.retain(|g| g.id != id);
        self.node_to_group
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, g| g != id);
        groups.len() != before
    }

    /// Record that the node named `node_name` belongs to `group_id`.
    pub fn add_node(&self, node_name: impl Into<String>, group_id: impl Into<String>) {
        self.node_to_group
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node_name.into(), group_id.into());
    }

    pub fn group(&self, id: &str) -> Option<Arc<StaticNodeGroup>> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|g| g.id == id)
            .cloned()
    }

    /// Every registered group, including autoprovisioned ones that do not
    /// exist yet.
    pub fn all_node_groups(&self) -> Vec<Arc<StaticNodeGroup>> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl CloudProvider for StaticCloudProvider {
    fn name(&self) -> &str {
        "static"
    }

    fn node_groups(&self) -> Vec<Arc<dyn NodeGroup>> {
        self.groups
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|g| g.exist())
            .map(|g| Arc::clone(g) as Arc<dyn NodeGroup>)
            .collect()
    }

    fn node_group_for_node(&self, node: &Node) -> CloudResult<Option<Arc<dyn NodeGroup>>> {
        let group_id = self
            .node_to_group
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&node.name)
            .cloned();
        let Some(group_id) = group_id else {
            return Ok(None);
        };
        match self.group(&group_id) {
            Some(group) => Ok(Some(group as Arc<dyn NodeGroup>)),
            None => Err(CloudProviderError::NodeGroupNotFound(group_id)),
        }
    }

    fn pricing(&self) -> CloudResult<Arc<dyn PricingModel>> {
        self.pricing
            .clone()
            .ok_or(CloudProviderError::NotImplemented)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodescale_core::testing::{build_test_node, build_test_pod};

    fn provider() -> StaticCloudProvider {
        let provider = StaticCloudProvider::new();
        provider.add_node_group(
            StaticNodeGroup::new("ng1", 1, 5)
                .with_target_size(2)
                .with_instances(vec![Instance::running("i-1"), Instance::running("i-2")]),
        );
        provider.add_node("n1", "ng1");
        provider
    }

    #[test]
    fn maps_nodes_to_groups() {
        let provider = provider();
        let group = provider
            .node_group_for_node(&build_test_node("n1", 1, 1))
            .unwrap()
            .unwrap();
        assert_eq!(group.id(), "ng1");
        assert!(provider
            .node_group_for_node(&build_test_node("stray", 1, 1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn node_group_for_removed_group_is_an_error() {
        let provider = provider();
        provider.add_node("n2", "gone");
        let err = provider
            .node_group_for_node(&build_test_node("n2", 1, 1))
            .err()
            .unwrap();
        assert_eq!(err, CloudProviderError::NodeGroupNotFound("gone".into()));
    }

    #[test]
    fn increase_size_respects_max() {
        let provider = provider();
        let group = provider.group("ng1").unwrap();
        group.increase_size(3).unwrap();
        assert_eq!(group.target_size().unwrap(), 5);
        assert!(group.increase_size(1).is_err());
        assert!(group.increase_size(0).is_err());
    }

    #[test]
    fn decrease_target_size_keeps_registered_nodes() {
        let provider = provider();
        let group = provider.group("ng1").unwrap();
        group.increase_size(1).unwrap();
        group.decrease_target_size(1).unwrap();
        assert_eq!(group.target_size().unwrap(), 2);
        assert!(group.decrease_target_size(1).is_err());
    }

    #[test]
    fn autoprovisioned_groups_are_hidden_until_created() {
        let provider = provider();
        let group = provider.add_node_group(StaticNodeGroup::new("auto", 0, 3).autoprovisioned());
        assert_eq!(provider.node_groups().len(), 1);
        assert_eq!(provider.all_node_groups().len(), 2);

        let created = group.create().unwrap();
        assert!(created.exist());
        assert_eq!(provider.node_groups().len(), 2);
        assert!(group.create().is_err());

        group.delete().unwrap();
        assert_eq!(provider.node_groups().len(), 1);
    }

    #[test]
    fn provider_errors_surface() {
        let provider = provider();
        let group = provider.group("ng1").unwrap();
        group.set_provider_error(Some(CloudProviderError::Transient("throttled".into())));
        assert!(group.nodes().unwrap_err().is_transient());
        assert!(group.target_size().is_err());
        group.set_provider_error(None);
        assert_eq!(group.nodes().unwrap().len(), 2);
    }

    #[test]
    fn pricing_is_optional() {
        let provider = provider();
        assert_eq!(provider.pricing().err(), Some(CloudProviderError::NotImplemented));

        let provider = provider.with_pricing(Arc::new(LinearPricing {
            cpu_core_hour: 1.0,
            memory_gib_hour: 0.5,
        }));
        let pricing = provider.pricing().unwrap();
        let node = build_test_node("n", 2000, 4 * GIB);
        assert_eq!(pricing.node_price(&node, 0, 3600).unwrap(), 4.0);
        let pod = build_test_pod("p", 500, GIB);
        assert_eq!(pricing.pod_price(&pod, 0, 7200).unwrap(), 2.0);
    }

    #[test]
    fn missing_template_is_not_implemented() {
        let group = StaticNodeGroup::new("ng", 0, 1);
        assert_eq!(
            group.template_node_info().err(),
            Some(CloudProviderError::NotImplemented)
        );
        let group = group.with_template(NodeInfo::new(build_test_node("t", 1, 1)));
        assert_eq!(group.template_node_info().unwrap().name(), "t");
    }
}
