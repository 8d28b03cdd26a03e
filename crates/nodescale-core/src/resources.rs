//! Resource vectors.
//!
//! A `Resources` value is used for node capacity, node allocatable, container
//! requests/limits and the aggregate requested on a node. CPU is counted in
//! millicores, memory and ephemeral storage in bytes. Extended resources
//! (GPUs, TPUs, device plugins) are opaque integer counts keyed by name.

use std::collections::BTreeMap;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use serde::{Deserialize, Serialize};

pub const RESOURCE_CPU: &str = "cpu";
pub const RESOURCE_MEMORY: &str = "memory";
pub const RESOURCE_EPHEMERAL_STORAGE: &str = "ephemeral-storage";
pub const RESOURCE_PODS: &str = "pods";

pub const GIB: i64 = 1024 * 1024 * 1024;
pub const MIB: i64 = 1024 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Resources {
    pub milli_cpu: i64,
    pub memory: i64,
    pub ephemeral_storage: i64,
    /// Number of pod slots. Only meaningful on capacity/allocatable vectors.
    pub pods: i64,
    pub extended: BTreeMap<String, i64>,
}

impl Resources {
    pub fn new(milli_cpu: i64, memory: i64) -> Self {
        Self {
            milli_cpu,
            memory,
            ..Default::default()
        }
    }

    pub fn with_pods(mut self, pods: i64) -> Self {
        self.pods = pods;
        self
    }

    pub fn with_extended(mut self, name: impl Into<String>, value: i64) -> Self {
        self.extended.insert(name.into(), value);
        self
    }

    pub fn is_zero(&self) -> bool {
        self.milli_cpu == 0
            && self.memory == 0
            && self.ephemeral_storage == 0
            && self.pods == 0
            && self.extended.values().all(|v| *v == 0)
    }

    /// Look up a resource by its canonical name.
    pub fn get(&self, name: &str) -> i64 {
        match name {
            RESOURCE_CPU => self.milli_cpu,
            RESOURCE_MEMORY => self.memory,
            RESOURCE_EPHEMERAL_STORAGE => self.ephemeral_storage,
            RESOURCE_PODS => self.pods,
            other => self.extended.get(other).copied().unwrap_or(0),
        }
    }

    /// Component-wise maximum, used for init-container requests.
    pub fn max(&self, other: &Resources) -> Resources {
        let mut out = Resources {
            milli_cpu: self.milli_cpu.max(other.milli_cpu),
            memory: self.memory.max(other.memory),
            ephemeral_storage: self.ephemeral_storage.max(other.ephemeral_storage),
            pods: self.pods.max(other.pods),
            extended: self.extended.clone(),
        };
        for (name, value) in &other.extended {
            let entry = out.extended.entry(name.clone()).or_insert(0);
            *entry = (*entry).max(*value);
        }
        out
    }

    /// Names of every resource in `self` that exceeds what is left of
    /// `allocatable` once `used` is subtracted. Empty when it fits.
    pub fn insufficient(&self, used: &Resources, allocatable: &Resources) -> Vec<String> {
        let mut missing = Vec::new();
        if self.milli_cpu > 0 && used.milli_cpu + self.milli_cpu > allocatable.milli_cpu {
            missing.push(RESOURCE_CPU.to_string());
        }
        if self.memory > 0 && used.memory + self.memory > allocatable.memory {
            missing.push(RESOURCE_MEMORY.to_string());
        }
        if self.ephemeral_storage > 0
            && used.ephemeral_storage + self.ephemeral_storage > allocatable.ephemeral_storage
        {
            missing.push(RESOURCE_EPHEMERAL_STORAGE.to_string());
        }
        for (name, value) in &self.extended {
            if *value == 0 {
                continue;
            }
            let used_value = used.extended.get(name).copied().unwrap_or(0);
            let available = allocatable.extended.get(name).copied().unwrap_or(0);
            if used_value + value > available {
                missing.push(name.clone());
            }
        }
        missing
    }
}

impl AddAssign<&Resources> for Resources {
    fn add_assign(&mut self, rhs: &Resources) {
        self.milli_cpu += rhs.milli_cpu;
        self.memory += rhs.memory;
        self.ephemeral_storage += rhs.ephemeral_storage;
        self.pods += rhs.pods;
        for (name, value) in &rhs.extended {
            *self.extended.entry(name.clone()).or_insert(0) += value;
        }
    }
}

impl SubAssign<&Resources> for Resources {
    fn sub_assign(&mut self, rhs: &Resources) {
        self.milli_cpu -= rhs.milli_cpu;
        self.memory -= rhs.memory;
        self.ephemeral_storage -= rhs.ephemeral_storage;
        self.pods -= rhs.pods;
        for (name, value) in &rhs.extended {
            *self.extended.entry(name.clone()).or_insert(0) -= value;
        }
        self.extended.retain(|_, v| *v != 0);
    }
}

impl Add<&Resources> for &Resources {
    type Output = Resources;

    fn add(self, rhs: &Resources) -> Resources {
        let mut out = self.clone();
        out += rhs;
        out
    }
}

impl Sub<&Resources> for &Resources {
    type Output = Resources;

    fn sub(self, rhs: &Resources) -> Resources {
        let mut out = self.clone();
        out -= rhs;
        out
    }
}
