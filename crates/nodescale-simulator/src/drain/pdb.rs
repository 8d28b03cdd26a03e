//! Remaining pod disruption budget accounting for one decision cycle.

use nodescale_core::{Pod, PodDisruptionBudget};
use tracing::debug;

use super::{BlockingPod, BlockingPodReason};

#[derive(Debug, Clone)]
struct RemainingPdb {
    pdb: PodDisruptionBudget,
    remaining: i32,
}

/// How many more disruptions each budget allows. Cloning takes a
/// checkpoint that can be restored by assignment.
#[derive(Debug, Clone, Default)]
pub struct RemainingPdbTracker {
    pdbs: Vec<RemainingPdb>,
}

fn pdb_matches(pdb: &PodDisruptionBudget, pod: &Pod) -> bool {
    pdb.namespace == pod.namespace && pdb.selector.matches(&pod.labels)
}

impl RemainingPdbTracker {
    pub fn new(pdbs: Vec<PodDisruptionBudget>) -> Self {
        let mut tracker = Self::default();
        tracker.set_pdbs(pdbs);
        tracker
    }

    /// Reset the tracker to the budgets' current allowances.
    pub fn set_pdbs(&mut self, pdbs: Vec<PodDisruptionBudget>) {
        self.pdbs = pdbs
            .into_iter()
            .map(|pdb| RemainingPdb {
                remaining: pdb.disruptions_allowed,
                pdb,
            })
            .collect();
    }

    pub fn pdbs(&self) -> Vec<&PodDisruptionBudget> {
        self.pdbs.iter().map(|r| &r.pdb).collect()
    }

    pub fn remaining(&self, namespace: &str, name: &str) -> Option<i32> {
        self.pdbs
            .iter()
            .find(|r| r.pdb.namespace == namespace && r.pdb.name == name)
            .map(|r| r.remaining)
    }

    pub fn matching_pdbs(&self, pod: &Pod) -> Vec<&PodDisruptionBudget> {
        self.pdbs
            .iter()
            .filter(|r| pdb_matches(&r.pdb, pod))
            .map(|r| &r.pdb)
            .collect()
    }

    /// A matching budget with no disruptions left, if any.
    pub fn exhausted_pdb(&self, pod: &Pod) -> Option<&PodDisruptionBudget> {
        self.pdbs
            .iter()
            .find(|r| r.remaining < 1 && pdb_matches(&r.pdb, pod))
            .map(|r| &r.pdb)
    }

    /// Whether every pod in `pods` can be disrupted together. Reports the
    /// first pod that would push a budget below zero.
    pub fn can_remove_pods(&self, pods: &[Pod]) -> Result<(), BlockingPod> {
        let mut remaining: Vec<i32> = self.pdbs.iter().map(|r| r.remaining).collect();
        for pod in pods {
            for (i, r) in self.pdbs.iter().enumerate() {
                if !pdb_matches(&r.pdb, pod) {
                    continue;
                }
                remaining[i] -= 1;
                if remaining[i] < 0 {
                    return Err(BlockingPod::new(pod.clone(), BlockingPodReason::NotEnoughPdb));
                }
            }
        }
        Ok(())
    }

    /// Reserve one disruption per matching budget for each pod.
    pub fn remove_pods(&mut self, pods: &[Pod]) {
        for pod in pods {
            for r in self.pdbs.iter_mut().filter(|r| pdb_matches(&r.pdb, pod)) {
                r.remaining -= 1;
                debug!(pdb = %r.pdb.name, pod = %pod.key(), remaining = r.remaining, "reserved disruption");
            }
        }
    }
}
