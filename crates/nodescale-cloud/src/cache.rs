//! Node-instance cache.
//!
//! Keeps the instance list of every node group, keyed by group id. Entries
//! are filled on demand and overwritten by a periodic refresh. The map lock
//! is never held across a provider call: provider calls run on blocking
//! worker threads, one per node group.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nodescale_core::{epoch_secs, Timestamp};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::CloudResult;
use crate::provider::{CloudProvider, Instance, NodeGroup};

pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(2 * 60);
pub const DEFAULT_FRESHNESS_THRESHOLD: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    instances: Vec<Instance>,
    refreshed_at: Timestamp,
}

pub struct NodeInstancesCache {
    provider: Arc<dyn CloudProvider>,
    entries: Mutex<HashMap<String, CacheEntry>>,
    freshness_threshold: Duration,
}

type FetchResult = (String, CloudResult<Vec<Instance>>);

impl NodeInstancesCache {
    pub fn new(provider: Arc<dyn CloudProvider>) -> Self {
        Self::with_freshness(provider, DEFAULT_FRESHNESS_THRESHOLD)
    }

    pub fn with_freshness(provider: Arc<dyn CloudProvider>, freshness_threshold: Duration) -> Self {
        Self {
            provider,
            entries: Mutex::new(HashMap::new()),
            freshness_threshold,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CacheEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stale(&self, entry: &CacheEntry, now: Timestamp) -> bool {
        now.saturating_sub(entry.refreshed_at) >= self.freshness_threshold.as_secs()
    }

    /// Store `instances` for `group_id` as if fetched at `refreshed_at`.
    pub fn insert_entry(&self, group_id: &str, instances: Vec<Instance>, refreshed_at: Timestamp) {
        self.lock().insert(
            group_id.to_string(),
            CacheEntry {
                instances,
                refreshed_at,
            },
        );
    }

    /// Cached instances for `group_id`, without fetching.
    pub fn cached(&self, group_id: &str) -> Option<Vec<Instance>> {
        self.lock().get(group_id).map(|e| e.instances.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Instances of `group`, fetched from the provider on a miss.
    /// A stale entry is still returned; callers that need fresh data
    /// invalidate it first.
    pub fn get(&self, group: &dyn NodeGroup) -> CloudResult<Vec<Instance>> {
        let id = group.id();
        if let Some(instances) = self.cached_checked(&id, epoch_secs()) {
            return Ok(instances);
        }
        let instances = group.nodes()?;
        self.insert_entry(&id, instances.clone(), epoch_secs());
        Ok(instances)
    }

    fn cached_checked(&self, group_id: &str, now: Timestamp) -> Option<Vec<Instance>> {
        let entries = self.lock();
        let entry = entries.get(group_id)?;
        if self.is_stale(entry, now) {
            warn!(
                node_group = %group_id,
                age_secs = now.saturating_sub(entry.refreshed_at),
                "cached instances are stale"
            );
        }
        Some(entry.instances.clone())
    }

    /// Instances of every current node group. Misses are fetched in
    /// parallel; groups whose fetch fails are left out of the result.
    /// Entries for groups that no longer exist are kept until the next
    /// [`refresh`](Self::refresh).
    pub async fn get_all(&self) -> HashMap<String, Vec<Instance>> {
        let now = epoch_secs();
        let mut result = HashMap::new();
        let mut missing = Vec::new();
        for group in self.provider.node_groups() {
            match self.cached_checked(&group.id(), now) {
                Some(instances) => {
                    result.insert(group.id(), instances);
                }
                None => missing.push(group),
            }
        }

        for (id, fetched) in fetch_all(missing).await {
            match fetched {
                Ok(instances) => {
                    self.insert_entry(&id, instances.clone(), epoch_secs());
                    result.insert(id, instances);
                }
                Err(err) => {
                    warn!(node_group = %id, error = %err, "failed to fetch instances");
                }
            }
        }
        result
    }

    /// Re-fetch every current node group and drop entries for groups that
    /// are gone. A failed fetch keeps the previous entry.
    pub async fn refresh(&self) {
        let groups = self.provider.node_groups();
        let current: HashSet<String> = groups.iter().map(|g| g.id()).collect();
        let fetched = fetch_all(groups).await;

        let now = epoch_secs();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|id, _| current.contains(id));
        let evicted = before - entries.len();

        let mut failed = 0usize;
        for (id, result) in fetched {
            match result {
                Ok(instances) => {
                    entries.insert(
                        id,
                        CacheEntry {
                            instances,
                            refreshed_at: now,
                        },
                    );
                }
                Err(err) => {
                    failed += 1;
                    warn!(node_group = %id, error = %err, "instance refresh failed, keeping previous entry");
                }
            }
        }
        debug!(groups = current.len(), evicted, failed, "instance cache refreshed");
    }

    pub fn invalidate_cache_entry(&self, group_id: &str) {
        if self.lock().remove(group_id).is_some() {
            debug!(node_group = %group_id, "instance cache entry invalidated");
        }
    }

    /// Refresh every `interval` until `shutdown` flips.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_secs = interval.as_secs(), "instance cache refresh loop starting");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.refresh().await;
                }
                _ = shutdown.changed() => {
                    info!("instance cache refresh loop stopping");
                    break;
                }
            }
        }
    }
}

/// Fetch instances of every group on its own blocking worker and wait for
/// all of them.
async fn fetch_all(groups: Vec<Arc<dyn NodeGroup>>) -> Vec<FetchResult> {
    let mut tasks = JoinSet::new();
    for group in groups {
        tasks.spawn_blocking(move || (group.id(), group.nodes()));
    }

    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => results.push(result),
            Err(err) => {
                // The group id is lost with the task; the entry is retried on
                // the next miss or refresh.
                warn!(error = %err, "instance fetch task failed");
            }
        }
    }
    results
}
