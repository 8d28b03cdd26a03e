//! Per-estimation limiter.

use std::sync::Arc;
use std::time::{Duration, Instant};

use nodescale_cloud::NodeGroup;
use tracing::debug;

use crate::threshold::{EstimationContext, Threshold};

/// Gatekeeper consulted by the estimator before each new node.
pub trait EstimationLimiter: Send {
    fn start_estimation(&mut self, group: &dyn NodeGroup, ctx: &EstimationContext);
    fn end_estimation(&mut self);
    /// Each `true` answer accounts for exactly one added node.
    fn permission_to_add_node(&mut self) -> bool;
}

/// Combines thresholds: the smallest positive node bound and the shortest
/// positive duration win, and any `-1` node limit forbids adding nodes.
pub struct ThresholdBasedLimiter {
    thresholds: Vec<Arc<dyn Threshold>>,
    max_nodes: i64,
    max_duration: Duration,
    nodes_added: i64,
    started: Option<Instant>,
}

impl ThresholdBasedLimiter {
    pub fn new(thresholds: Vec<Arc<dyn Threshold>>) -> Self {
        Self {
            thresholds,
            max_nodes: 0,
            max_duration: Duration::ZERO,
            nodes_added: 0,
            started: None,
        }
    }

    pub fn max_nodes(&self) -> i64 {
        self.max_nodes
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }
}

impl EstimationLimiter for ThresholdBasedLimiter {
    fn start_estimation(&mut self, group: &dyn NodeGroup, ctx: &EstimationContext) {
        self.started = Some(Instant::now());
        self.nodes_added = 0;
        self.max_nodes = 0;
        self.max_duration = Duration::ZERO;

        for threshold in &self.thresholds {
            let limit = threshold.node_limit(group, ctx);
            if limit < 0 {
                self.max_nodes = -1;
            } else if limit > 0 && self.max_nodes >= 0 && (self.max_nodes == 0 || limit < self.max_nodes) {
                self.max_nodes = limit;
            }

            let duration = threshold.duration_limit(group, ctx);
            if !duration.is_zero() && (self.max_duration.is_zero() || duration < self.max_duration) {
                self.max_duration = duration;
            }
        }
        debug!(
            node_group = %group.id(),
            max_nodes = self.max_nodes,
            max_duration_ms = self.max_duration.as_millis() as u64,
            "estimation limits"
        );
    }

    fn end_estimation(&mut self) {
        self.started = None;
    }

    fn permission_to_add_node(&mut self) -> bool {
        if self.max_nodes < 0 || (self.max_nodes > 0 && self.nodes_added >= self.max_nodes) {
            return false;
        }
        if let Some(started) = self.started {
            if !self.max_duration.is_zero() && started.elapsed() > self.max_duration {
                debug!(
                    max_duration_ms = self.max_duration.as_millis() as u64,
                    "estimation ran out of time"
                );
                return false;
            }
        }
        self.nodes_added += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threshold::{ClusterCapacityThreshold, StaticThreshold};
    use nodescale_cloud::StaticNodeGroup;

    fn group() -> StaticNodeGroup {
        StaticNodeGroup::new("ng", 0, 100)
    }

    fn granted(limiter: &mut ThresholdBasedLimiter) -> usize {
        (0..20).take_while(|_| limiter.permission_to_add_node()).count()
    }

    #[test]
    fn smallest_positive_bound_wins() {
        let mut limiter = ThresholdBasedLimiter::new(vec![
            Arc::new(StaticThreshold::new(0, Duration::ZERO)),
            Arc::new(StaticThreshold::new(5, Duration::ZERO)),
            Arc::new(StaticThreshold::new(3, Duration::ZERO)),
        ]);
        limiter.start_estimation(&group(), &EstimationContext::default());
        assert_eq!(limiter.max_nodes(), 3);
        assert_eq!(granted(&mut limiter), 3);
    }

    #[test]
    fn no_capacity_forces_zero() {
        let mut limiter = ThresholdBasedLimiter::new(vec![
            Arc::new(ClusterCapacityThreshold),
            Arc::new(StaticThreshold::new(5, Duration::ZERO)),
        ]);
        limiter.start_estimation(&group(), &EstimationContext::new(10, 10));
        assert_eq!(limiter.max_nodes(), -1);
        assert_eq!(granted(&mut limiter), 0);
    }

    #[test]
    fn unlimited_without_thresholds() {
        let mut limiter = ThresholdBasedLimiter::new(Vec::new());
        limiter.start_estimation(&group(), &EstimationContext::default());
        assert_eq!(granted(&mut limiter), 20);
    }

    #[test]
    fn restart_resets_the_counter() {
        let mut limiter = ThresholdBasedLimiter::new(vec![Arc::new(StaticThreshold::new(1, Duration::ZERO))]);
        limiter.start_estimation(&group(), &EstimationContext::default());
        assert!(limiter.permission_to_add_node());
        assert!(!limiter.permission_to_add_node());
        limiter.end_estimation();
        limiter.start_estimation(&group(), &EstimationContext::default());
        assert!(limiter.permission_to_add_node());
    }

    #[test]
    fn shortest_duration_wins_and_expires() {
        let mut limiter = ThresholdBasedLimiter::new(vec![
            Arc::new(StaticThreshold::new(0, Duration::from_secs(60))),
            Arc::new(StaticThreshold::new(0, Duration::from_nanos(1))),
        ]);
        limiter.start_estimation(&group(), &EstimationContext::default());
        assert_eq!(limiter.max_duration(), Duration::from_nanos(1));
        std::thread::sleep(Duration::from_millis(5));
        assert!(!limiter.permission_to_add_node());
    }
}
