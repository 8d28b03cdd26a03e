//! Object builders shared by unit and integration tests across the
//! workspace. Enabled with the `testing` feature.

use std::collections::BTreeMap;

use crate::resources::Resources;
use crate::selector::LabelSelector;
use crate::types::{
    Container, ContainerPort, Node, OwnerReference, Pod, PodDisruptionBudget, PodPhase,
    LABEL_HOSTNAME,
};

/// A ready node whose capacity equals its allocatable, with 110 pod slots
/// and the hostname label set.
pub fn build_test_node(name: &str, milli_cpu: i64, memory: i64) -> Node {
    let resources = Resources::new(milli_cpu, memory).with_pods(110);
    Node {
        name: name.to_string(),
        uid: format!("{name}-uid"),
        labels: BTreeMap::from([(LABEL_HOSTNAME.to_string(), name.to_string())]),
        capacity: resources.clone(),
        allocatable: resources,
        ..Default::default()
    }
}

/// A running pod in `default` with a single container.
pub fn build_test_pod(name: &str, milli_cpu: i64, memory: i64) -> Pod {
    Pod {
        namespace: "default".to_string(),
        name: name.to_string(),
        uid: format!("{name}-uid"),
        phase: PodPhase::Running,
        containers: vec![Container {
            name: "app".to_string(),
            requests: Resources::new(milli_cpu, memory),
            ..Default::default()
        }],
        ..Default::default()
    }
}

pub fn owner_reference(kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("{kind}-{name}-uid").to_lowercase(),
        controller: true,
    }
}

pub fn on_node(mut pod: Pod, node_name: &str) -> Pod {
    pod.node_name = Some(node_name.to_string());
    pod
}

pub fn owned_by(mut pod: Pod, kind: &str, name: &str) -> Pod {
    pod.owner_references = vec![owner_reference(kind, name)];
    pod
}

pub fn with_labels(mut pod: Pod, labels: &[(&str, &str)]) -> Pod {
    for (k, v) in labels {
        pod.labels.insert(k.to_string(), v.to_string());
    }
    pod
}

pub fn with_host_port(mut pod: Pod, port: u16) -> Pod {
    if let Some(container) = pod.containers.first_mut() {
        container.ports.push(ContainerPort {
            container_port: port,
            host_port: port,
            protocol: "TCP".to_string(),
            host_ip: String::new(),
        });
    }
    pod
}

pub fn build_test_pdb(name: &str, labels: &[(&str, &str)], disruptions_allowed: i32) -> PodDisruptionBudget {
    PodDisruptionBudget {
        namespace: "default".to_string(),
        name: name.to_string(),
        selector: LabelSelector::from_labels(labels.iter().map(|(k, v)| (*k, *v))),
        disruptions_allowed,
    }
}
