//! Core data models for the usage recommender

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Resource kind a usage sample refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// CPU usage in cores
    Cpu,
    /// Memory usage in bytes
    Memory,
}

/// Identifier of a pod: namespace plus pod name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PodId {
    pub namespace: String,
    pub pod_name: String,
}

impl PodId {
    pub fn new(namespace: impl Into<String>, pod_name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            pod_name: pod_name.into(),
        }
    }
}

impl fmt::Display for PodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.pod_name)
    }
}

/// Identifier of a container within a pod
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContainerId {
    pub pod: PodId,
    pub container_name: String,
}

impl ContainerId {
    pub fn new(pod: PodId, container_name: impl Into<String>) -> Self {
        Self {
            pod,
            container_name: container_name.into(),
        }
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.pod, self.container_name)
    }
}

/// One observed usage measurement for one container
///
/// CPU amounts are in cores, memory amounts in bytes. Samples are immutable
/// and consumed exactly once by the aggregation layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageSample {
    /// Time the measurement was taken
    pub measured_at: DateTime<Utc>,
    /// Observed amount (cores for CPU, bytes for memory)
    pub amount: f64,
    /// Which resource this sample measures
    pub resource: ResourceKind,
}

impl UsageSample {
    pub fn new(measured_at: DateTime<Utc>, amount: f64, resource: ResourceKind) -> Self {
        Self {
            measured_at,
            amount,
            resource,
        }
    }
}
