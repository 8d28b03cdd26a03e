//! The scale decision loop.
//!
//! One cycle rebuilds the snapshot from the fixture, then:
//!
//! 1. groups pending pods by the node groups whose template can host them,
//!    estimates each option and scales up the group that places the most
//!    pods with the fewest new nodes;
//! 2. when nothing was scaled up, picks underutilized autoscaled nodes and
//!    asks the removal simulator which of them could go.
//!
//! Decisions go to `tracing` and to the status log.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use nodescale_cloud::{CloudProvider, Instance, NodeGroup, NodeInstancesCache, StaticCloudProvider};
use nodescale_core::taints::has_to_be_deleted_taint;
use nodescale_core::{AutoscalerConfig, Pod, Timestamp};
use nodescale_estimator::{
    BinpackingEstimator, ClusterCapacityThreshold, EstimationContext, SiblingCapacityThreshold,
    StaticThreshold, Threshold, ThresholdBasedLimiter,
};
use nodescale_predicates::PredicateChecker;
use nodescale_simulator::{
    node_info_sanitized_deep_copy, template_node_info_from_example, template_node_info_from_node_group,
    utilization, RemainingPdbTracker, RemovalSimulator, SimulatorResult, UnremovableReason,
};
use nodescale_snapshot::{ClusterSnapshot, DeltaSnapshot, NodeInfo};
use nodescale_status::{LogCollector, LogLevel};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::fixture::ClusterFixture;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScaleUpDecision {
    pub node_group: String,
    pub delta: i64,
    pub pods: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleSummary {
    pub scale_up: Option<ScaleUpDecision>,
    pub empty_nodes: Vec<String>,
    pub removable_nodes: Vec<String>,
    pub unremovable: Vec<(String, UnremovableReason)>,
}

struct ScaleUpOption {
    group: Arc<dyn NodeGroup>,
    node_count: usize,
    pods: usize,
}

pub struct Autoscaler {
    config: AutoscalerConfig,
    fixture: ClusterFixture,
    provider: Arc<StaticCloudProvider>,
    cache: Arc<NodeInstancesCache>,
    checker: Arc<PredicateChecker>,
    removal: RemovalSimulator,
    logs: Arc<LogCollector>,
}

impl Autoscaler {
    pub fn new(config: AutoscalerConfig, fixture: ClusterFixture) -> Self {
        let provider = Arc::new(fixture.provider());
        let cache = Arc::new(NodeInstancesCache::with_freshness(
            provider.clone() as Arc<dyn CloudProvider>,
            config.instance_freshness_threshold(),
        ));
        let checker = Arc::new(PredicateChecker::default());
        let mut removal = RemovalSimulator::from_config(
            Arc::clone(&checker),
            &config.scale_down,
            config.simulation_timeout(),
        );
        // Without controller data, owner references are trusted as-is.
        if !fixture.controllers.is_empty() {
            removal = removal.with_lister(Arc::new(fixture.lister()));
        }
        let logs = Arc::new(LogCollector::from_config(&config.logs, config.log_item_lifetime()));

        Self {
            config,
            fixture,
            provider,
            cache,
            checker,
            removal,
            logs,
        }
    }

    pub fn logs(&self) -> Arc<LogCollector> {
        Arc::clone(&self.logs)
    }

    pub fn cache(&self) -> Arc<NodeInstancesCache> {
        Arc::clone(&self.cache)
    }

    pub fn provider(&self) -> Arc<StaticCloudProvider> {
        Arc::clone(&self.provider)
    }

    fn record(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Error => error!("{message}"),
            LogLevel::Warning => warn!("{message}"),
            LogLevel::Info => info!("{message}"),
            LogLevel::Debug => debug!("{message}"),
        }
        self.logs.log(message, level);
    }

    /// Run one decision cycle at `now`.
    pub async fn run_once(&mut self, now: Timestamp) -> anyhow::Result<CycleSummary> {
        let instances = self.cache.get_all().await;
        let mut snapshot = self.fixture.snapshot()?;
        let mut summary = CycleSummary::default();

        summary.scale_up = self.scale_up(&mut snapshot, &instances)?;
        if summary.scale_up.is_none() {
            self.scale_down(&mut snapshot, now, &mut summary);
        } else {
            debug!("scale-down skipped after scale-up");
        }

        self.removal.drop_old_hints();
        match serde_json::to_string(&self.logs.get_logs()) {
            Ok(json) => debug!(logs = %json, "status log"),
            Err(err) => warn!(error = %err, "cannot render status log"),
        }
        Ok(summary)
    }

    /// Run a cycle every `interval` until `shutdown` flips.
    pub async fn run(&mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "decision loop started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.run_once(nodescale_core::epoch_secs()).await {
                        error!(error = %e, "decision cycle failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("decision loop shutting down");
                    break;
                }
            }
        }
    }

    fn group_template(&self, group: &dyn NodeGroup, snapshot: &DeltaSnapshot) -> SimulatorResult<NodeInfo> {
        let taints = self.config.taint_config();
        let example = self
            .fixture
            .node_groups
            .iter()
            .find(|ng| ng.id == group.id())
            .and_then(|ng| {
                ng.nodes.iter().find_map(|name| {
                    snapshot
                        .get(name)
                        .ok()
                        .filter(|info| info.node().is_ready() && !has_to_be_deleted_taint(info.node()))
                })
            });
        match example {
            Some(info) => template_node_info_from_example(
                &info,
                &group.id(),
                &self.fixture.daemon_sets,
                self.config.template.force_daemon_sets,
                &taints,
            ),
            None => template_node_info_from_node_group(group, &self.fixture.daemon_sets, &taints),
        }
    }

    /// Pending pods that pass every predicate on an empty copy of `template`.
    fn pods_fitting_template(
        &self,
        snapshot: &mut DeltaSnapshot,
        pods: &[Pod],
        template: &NodeInfo,
    ) -> anyhow::Result<Vec<Pod>> {
        let probe = node_info_sanitized_deep_copy(template, "probe");
        let probe_name = probe.name().to_string();
        snapshot.fork()?;
        if let Err(err) = snapshot.add_node_info(probe) {
            snapshot.revert();
            return Err(err.into());
        }
        let mut fitting = Vec::new();
        for pod in pods {
            match self.checker.check(&*snapshot, pod, &probe_name) {
                Ok(()) => fitting.push(pod.clone()),
                Err(err) if err.is_internal() => {
                    snapshot.revert();
                    return Err(err.into());
                }
                Err(_) => {}
            }
        }
        snapshot.revert();
        Ok(fitting)
    }

    fn limiter(&self) -> ThresholdBasedLimiter {
        let thresholds: Vec<Arc<dyn Threshold>> = vec![
            Arc::new(StaticThreshold::new(
                self.config.estimator.max_nodes_per_scale_up,
                self.config.max_binpacking_time(),
            )),
            Arc::new(ClusterCapacityThreshold),
            Arc::new(SiblingCapacityThreshold),
        ];
        ThresholdBasedLimiter::new(thresholds)
    }

    fn scale_up(
        &mut self,
        snapshot: &mut DeltaSnapshot,
        instances: &HashMap<String, Vec<Instance>>,
    ) -> anyhow::Result<Option<ScaleUpDecision>> {
        let pending = self.fixture.pending_pods();
        if pending.is_empty() {
            return Ok(None);
        }

        // Templates and the pods each group could take.
        let mut candidates: Vec<(Arc<dyn NodeGroup>, NodeInfo, Vec<Pod>, i64)> = Vec::new();
        for group in self.provider.node_groups() {
            let target = match group.target_size() {
                Ok(target) => target,
                Err(err) => {
                    warn!(node_group = %group.id(), error = %err, "cannot read target size");
                    continue;
                }
            };
            if target >= group.max_size() {
                debug!(node_group = %group.id(), "node group at max size");
                continue;
            }
            let template = match self.group_template(group.as_ref(), snapshot) {
                Ok(template) => template,
                Err(err) => {
                    warn!(node_group = %group.id(), error = %err, "cannot build template node");
                    continue;
                }
            };
            let fitting = self.pods_fitting_template(snapshot, &pending, &template)?;
            if !fitting.is_empty() {
                candidates.push((group, template, fitting, target));
            }
        }

        let cluster_nodes = snapshot.node_infos().len();
        let mut best: Option<ScaleUpOption> = None;
        for (group, template, pods, target) in &candidates {
            let registered = instances.get(&group.id()).map_or(0, |i| i.len()) as i64;
            let upcoming: Vec<NodeInfo> = (0..(target - registered).max(0))
                .map(|_| template.clone())
                .collect();
            let similar = candidates
                .iter()
                .filter(|(other, ..)| other.id() != group.id())
                .map(|(other, ..)| Arc::clone(other))
                .collect();
            let ctx = EstimationContext::new(cluster_nodes, self.config.cluster.max_nodes_total)
                .with_similar_node_groups(similar);
            let mut estimator =
                BinpackingEstimator::new(Arc::clone(&self.checker), Box::new(self.limiter()), ctx);
            let result = estimator.estimate_detailed(snapshot, pods, template, &upcoming, group.as_ref())?;
            debug!(
                node_group = %group.id(),
                nodes = result.node_count,
                pods = result.scheduled_pods.len(),
                "scale-up option"
            );
            if result.node_count == 0 {
                continue;
            }
            let option = ScaleUpOption {
                group: Arc::clone(group),
                node_count: result.node_count,
                pods: result.scheduled_pods.len(),
            };
            let better = best.as_ref().is_none_or(|b| {
                option.pods > b.pods || (option.pods == b.pods && option.node_count < b.node_count)
            });
            if better {
                best = Some(option);
            }
        }

        let Some(option) = best else {
            if !candidates.is_empty() {
                self.record(
                    LogLevel::Info,
                    format!("no scale-up: {} pending pods fit existing or upcoming nodes", pending.len()),
                );
            } else {
                self.record(
                    LogLevel::Warning,
                    format!("no node group can host any of {} pending pods", pending.len()),
                );
            }
            return Ok(None);
        };

        let target = option.group.target_size()?;
        let delta = (option.node_count as i64).min(option.group.max_size() - target);
        option.group.increase_size(delta)?;
        self.cache.invalidate_cache_entry(&option.group.id());
        self.record(
            LogLevel::Info,
            format!(
                "scale-up: node group {} {} -> {} ({} pods)",
                option.group.id(),
                target,
                target + delta,
                option.pods
            ),
        );
        Ok(Some(ScaleUpDecision {
            node_group: option.group.id(),
            delta,
            pods: option.pods,
        }))
    }

    fn scale_down(&mut self, snapshot: &mut DeltaSnapshot, now: Timestamp, summary: &mut CycleSummary) {
        if !self.config.scale_down.enabled {
            return;
        }

        let threshold = self.config.scale_down.utilization_threshold;
        let mut candidates = Vec::new();
        // group id -> nodes it may still lose
        let mut headroom: HashMap<String, i64> = HashMap::new();
        let mut group_of: HashMap<String, String> = HashMap::new();

        for info in snapshot.node_infos().iter() {
            let node = info.node();
            if has_to_be_deleted_taint(node) {
                summary
                    .unremovable
                    .push((node.name.clone(), UnremovableReason::CurrentlyBeingDeleted));
                continue;
            }
            let group = match self.provider.node_group_for_node(node) {
                Ok(Some(group)) => group,
                Ok(None) => {
                    summary.unremovable.push((node.name.clone(), UnremovableReason::NotAutoscaled));
                    continue;
                }
                Err(err) => {
                    warn!(node = %node.name, error = %err, "cannot resolve node group");
                    summary.unremovable.push((node.name.clone(), UnremovableReason::UnexpectedError));
                    continue;
                }
            };
            match utilization(info, true, true) {
                Ok(u) if u.utilization < threshold => {
                    debug!(node = %node.name, utilization = u.utilization, resource = u.resource_name, "underutilized");
                }
                Ok(_) => {
                    summary.unremovable.push((node.name.clone(), UnremovableReason::NotUnderutilized));
                    continue;
                }
                Err(err) => {
                    warn!(node = %node.name, error = %err, "cannot compute utilization");
                    summary.unremovable.push((node.name.clone(), UnremovableReason::UnexpectedError));
                    continue;
                }
            }
            if !headroom.contains_key(&group.id()) {
                let room = group.target_size().map_or(0, |t| t - group.min_size());
                headroom.insert(group.id(), room);
            }
            group_of.insert(node.name.clone(), group.id());
            candidates.push(node.name.clone());
        }

        if candidates.is_empty() {
            return;
        }

        let destinations: Vec<String> = snapshot
            .node_infos()
            .iter()
            .map(|info| info.name().to_string())
            .collect();
        let mut pdbs = RemainingPdbTracker::new(self.fixture.pdbs.clone());

        summary.empty_nodes = self
            .removal
            .find_empty_nodes_to_remove(&*snapshot, &candidates, now);
        let (removable, unremovable) =
            self.removal
                .find_nodes_to_remove(snapshot, &candidates, &destinations, now, &mut pdbs);

        for node in removable {
            let room = group_of
                .get(&node.node_name)
                .and_then(|g| headroom.get_mut(g));
            match room {
                Some(room) if *room > 0 => {
                    *room -= 1;
                    self.record(
                        LogLevel::Info,
                        format!(
                            "scale-down: node {} can be removed ({} pods to move)",
                            node.node_name,
                            node.pods_to_reschedule.len()
                        ),
                    );
                    summary.removable_nodes.push(node.node_name);
                }
                _ => {
                    summary.empty_nodes.retain(|n| n != &node.node_name);
                    summary
                        .unremovable
                        .push((node.node_name, UnremovableReason::NodeGroupMinSizeReached));
                }
            }
        }
        for node in unremovable {
            let detail = node
                .blocking_pod
                .as_ref()
                .map(|b| format!(" (pod {}: {})", b.pod.key(), b.reason))
                .unwrap_or_default();
            self.record(
                LogLevel::Debug,
                format!("node {} unremovable: {}{}", node.node_name, node.reason, detail),
            );
            summary.unremovable.push((node.node_name, node.reason));
        }
    }
}
