//! Required inter-pod affinity and anti-affinity.
//!
//! Three checks, all keyed by (topology key, domain value):
//!
//! 1. anti-affinity terms of pods already running must not match the
//!    incoming pod in the candidate's domain,
//! 2. the incoming pod's anti-affinity terms must not match any pod in the
//!    candidate's domain,
//! 3. every incoming affinity term must match some pod in the candidate's
//!    domain, unless no pod in the cluster matches and the pod matches its
//!    own terms (the first replica of a co-located group).

use std::collections::{HashMap, HashSet};

use nodescale_core::{Pod, PodAffinityTerm};
use nodescale_snapshot::{ClusterSnapshot, NodeInfo};

use super::{CycleState, FilterPlugin, FilterStatus};

const STATE_KEY: &str = "InterPodAffinity";

pub struct InterPodAffinity;

type Domain = (String, String);

#[derive(Debug, Default)]
struct AffinityState {
    /// Domains forbidden by anti-affinity of existing pods.
    existing_anti: HashSet<Domain>,
    /// Per incoming anti-affinity term, domains holding a matching pod.
    anti_counts: Vec<HashMap<String, usize>>,
    /// Per incoming affinity term, domains holding a matching pod.
    affinity_counts: Vec<HashMap<String, usize>>,
    affinity_matches_anything: bool,
}

/// Whether `candidate` is selected by `term` declared on a pod in
/// `owner_namespace`.
fn term_matches(term: &PodAffinityTerm, owner_namespace: &str, candidate: &Pod) -> bool {
    let in_namespace = if term.namespaces.is_empty() {
        candidate.namespace == owner_namespace
    } else {
        term.namespaces.iter().any(|ns| *ns == candidate.namespace)
    };
    in_namespace
        && term
            .label_selector
            .as_ref()
            .is_some_and(|s| s.matches(&candidate.labels))
}

fn required_affinity(pod: &Pod) -> &[PodAffinityTerm] {
    pod.affinity
        .as_ref()
        .and_then(|a| a.pod_affinity.as_ref())
        .map(|p| p.required.as_slice())
        .unwrap_or(&[])
}

fn required_anti_affinity(pod: &Pod) -> &[PodAffinityTerm] {
    pod.affinity
        .as_ref()
        .and_then(|a| a.pod_anti_affinity.as_ref())
        .map(|p| p.required.as_slice())
        .unwrap_or(&[])
}

fn count_matches(
    nodes: &[std::sync::Arc<NodeInfo>],
    term: &PodAffinityTerm,
    owner_namespace: &str,
) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for info in nodes {
        let Some(domain) = info.node().labels.get(&term.topology_key) else {
            continue;
        };
        let n = info
            .pods()
            .iter()
            .filter(|p| term_matches(term, owner_namespace, p))
            .count();
        if n > 0 {
            *counts.entry(domain.clone()).or_insert(0) += n;
        }
    }
    counts
}

impl FilterPlugin for InterPodAffinity {
    fn name(&self) -> &'static str {
        "InterPodAffinity"
    }

    fn pre_filter(
        &self,
        snapshot: &dyn ClusterSnapshot,
        pod: &Pod,
        state: &mut CycleState,
    ) -> Result<(), String> {
        let mut affinity = AffinityState::default();

        for info in snapshot.node_infos_with_required_anti_affinity().iter() {
            for existing in info.pods_with_required_anti_affinity() {
                for term in required_anti_affinity(existing) {
                    if !term_matches(term, &existing.namespace, pod) {
                        continue;
                    }
                    if let Some(value) = info.node().labels.get(&term.topology_key) {
                        affinity
                            .existing_anti
                            .insert((term.topology_key.clone(), value.clone()));
                    }
                }
            }
        }

        let incoming_anti = required_anti_affinity(pod);
        let incoming_affinity = required_affinity(pod);
        if !incoming_anti.is_empty() || !incoming_affinity.is_empty() {
            let nodes = snapshot.node_infos();
            affinity.anti_counts = incoming_anti
                .iter()
                .map(|t| count_matches(&nodes, t, &pod.namespace))
                .collect();
            affinity.affinity_counts = incoming_affinity
                .iter()
                .map(|t| count_matches(&nodes, t, &pod.namespace))
                .collect();
            affinity.affinity_matches_anything =
                affinity.affinity_counts.iter().any(|c| !c.is_empty());
        }

        state.write(STATE_KEY, affinity);
        Ok(())
    }

    fn filter(&self, state: &CycleState, pod: &Pod, node_info: &NodeInfo) -> FilterStatus {
        let Some(affinity) = state.read::<AffinityState>(STATE_KEY) else {
            return FilterStatus::Error("inter-pod affinity state was not computed".to_string());
        };
        let labels = &node_info.node().labels;

        let forbidden = labels
            .iter()
            .any(|(k, v)| affinity.existing_anti.contains(&(k.clone(), v.clone())));
        if forbidden {
            return FilterStatus::unschedulable(
                "node(s) didn't satisfy existing pods anti-affinity rules",
            );
        }

        for (term, counts) in required_anti_affinity(pod).iter().zip(&affinity.anti_counts) {
            if let Some(value) = labels.get(&term.topology_key) {
                if counts.get(value).copied().unwrap_or(0) > 0 {
                    return FilterStatus::unschedulable("node(s) didn't match pod anti-affinity rules");
                }
            }
        }

        let terms = required_affinity(pod);
        if terms.is_empty() {
            return FilterStatus::Success;
        }
        if !affinity.affinity_matches_anything
            && terms.iter().all(|t| term_matches(t, &pod.namespace, pod))
        {
            // First pod of its group: only require the topology keys.
            return if terms.iter().all(|t| labels.contains_key(&t.topology_key)) {
                FilterStatus::Success
            } else {
                FilterStatus::unschedulable("node(s) didn't match pod affinity rules")
            };
        }
        for (term, counts) in terms.iter().zip(&affinity.affinity_counts) {
            let satisfied = labels
                .get(&term.topology_key)
                .is_some_and(|v| counts.get(v).copied().unwrap_or(0) > 0);
            if !satisfied {
                return FilterStatus::unschedulable("node(s) didn't match pod affinity rules");
            }
        }
        FilterStatus::Success
    }
}
