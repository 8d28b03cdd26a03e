//! Read-only access to pod controllers.

use std::collections::HashMap;

use nodescale_core::pod::{KIND_REPLICATION_CONTROLLER, KIND_REPLICA_SET};

/// Outcome of looking up the controller that owns a pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerLookup {
    /// `replicas` is known for replica sets and replication controllers.
    Found { replicas: Option<i32> },
    NotFound,
    Error(String),
}

pub trait ControllerLister: Send + Sync {
    fn controller(&self, namespace: &str, kind: &str, name: &str) -> ControllerLookup;
}

/// Controllers held in memory, keyed by (namespace, kind, name).
#[derive(Debug, Clone, Default)]
pub struct StaticControllerLister {
    controllers: HashMap<(String, String, String), Option<i32>>,
}

impl StaticControllerLister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, namespace: &str, kind: &str, name: &str, replicas: Option<i32>) {
        let replicas = if kind == KIND_REPLICA_SET || kind == KIND_REPLICATION_CONTROLLER {
            replicas.or(Some(0))
        } else {
            replicas
        };
        self.controllers
            .insert((namespace.into(), kind.into(), name.into()), replicas);
    }
}

impl ControllerLister for StaticControllerLister {
    fn controller(&self, namespace: &str, kind: &str, name: &str) -> ControllerLookup {
        match self
            .controllers
            .get(&(namespace.to_string(), kind.to_string(), name.to_string()))
        {
            Some(replicas) => ControllerLookup::Found {
                replicas: *replicas,
            },
            None => ControllerLookup::NotFound,
        }
    }
}
