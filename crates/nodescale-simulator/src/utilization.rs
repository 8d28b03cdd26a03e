//! Node utilization: requested over allocatable, for CPU and memory.

use nodescale_core::resources::{RESOURCE_CPU, RESOURCE_MEMORY};
use nodescale_snapshot::NodeInfo;
use serde::Serialize;

use crate::error::{SimulatorError, SimulatorResult};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct UtilizationInfo {
    pub cpu: f64,
    pub memory: f64,
    /// The larger of `cpu` and `memory`.
    pub utilization: f64,
    /// Which resource `utilization` came from.
    pub resource_name: &'static str,
}

pub fn utilization(
    node_info: &NodeInfo,
    skip_daemon_set_pods: bool,
    skip_mirror_pods: bool,
) -> SimulatorResult<UtilizationInfo> {
    let node = node_info.node();
    let mut milli_cpu = 0i64;
    let mut memory = 0i64;
    for pod in node_info.pods() {
        if (skip_daemon_set_pods && pod.is_daemon_set_pod()) || (skip_mirror_pods && pod.is_mirror_pod()) {
            continue;
        }
        let requests = pod.requests();
        milli_cpu += requests.milli_cpu;
        memory += requests.memory;
    }

    let cpu = ratio(milli_cpu, node.allocatable.milli_cpu, &node.name, RESOURCE_CPU)?;
    let memory = ratio(memory, node.allocatable.memory, &node.name, RESOURCE_MEMORY)?;
    let (utilization, resource_name) = if cpu >= memory {
        (cpu, RESOURCE_CPU)
    } else {
        (memory, RESOURCE_MEMORY)
    };
    Ok(UtilizationInfo {
        cpu,
        memory,
        utilization,
        resource_name,
    })
}

fn ratio(requested: i64, allocatable: i64, node: &str, resource: &'static str) -> SimulatorResult<f64> {
    if allocatable <= 0 {
        return Err(SimulatorError::ZeroAllocatable {
            node: node.to_string(),
            resource,
        });
    }
    Ok(requested as f64 / allocatable as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodescale_core::pod::{ANNOTATION_MIRROR_POD, KIND_DAEMON_SET};
    use nodescale_core::testing::{build_test_node, build_test_pod, owned_by};

    #[test]
    fn reports_the_dominant_resource() {
        let info = NodeInfo::with_pods(
            build_test_node("n", 2000, 1000),
            [build_test_pod("a", 500, 100), build_test_pod("b", 500, 100)],
        );
        let u = utilization(&info, false, false).unwrap();
        assert_eq!(u.cpu, 0.5);
        assert_eq!(u.memory, 0.2);
        assert_eq!(u.utilization, 0.5);
        assert_eq!(u.resource_name, "cpu");
    }

    #[test]
    fn skips_daemon_set_and_mirror_pods_on_request() {
        let mut mirror = build_test_pod("static", 1000, 0);
        mirror.annotations.insert(ANNOTATION_MIRROR_POD.into(), "x".into());
        let info = NodeInfo::with_pods(
            build_test_node("n", 2000, 1000),
            [
                owned_by(build_test_pod("agent", 1000, 0), KIND_DAEMON_SET, "agent"),
                mirror,
                build_test_pod("app", 0, 500),
            ],
        );
        assert_eq!(utilization(&info, false, false).unwrap().cpu, 1.0);
        let u = utilization(&info, true, true).unwrap();
        assert_eq!(u.cpu, 0.0);
        assert_eq!(u.resource_name, "memory");
    }

    #[test]
    fn zero_allocatable_is_an_error() {
        let info = NodeInfo::new(build_test_node("n", 0, 1000));
        assert!(matches!(
            utilization(&info, false, false),
            Err(SimulatorError::ZeroAllocatable { resource: "cpu", .. })
        ));
    }
}
