//! Live cluster object graph and aggregate state registry
//!
//! Pods, their containers and the per-container aggregate states form
//! process-wide mutable state shared by sample ingestion and checkpointing.
//! The registry never exposes the underlying maps: entries are created and
//! destroyed only through its methods, so lifecycle (creation on first
//! sample, removal on container deletion) is centrally enforced.
//!
//! Each container's aggregate state sits behind its own mutex. Ingestion for
//! one container is serialized by that lock alone; the checkpoint builder
//! locks one container at a time and never the whole graph, so a slow build
//! cannot stall sample ingestion for unrelated containers.

use crate::aggregation::AggregateContainerState;
use crate::config::AggregationConfig;
use crate::models::{ContainerId, PodId, UsageSample};
use crate::observability::RecommenderMetrics;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// A pod known to the recommender
#[derive(Debug, Clone, Default)]
pub struct PodState {
    /// Labels used for target selector matching
    pub labels: BTreeMap<String, String>,
    /// Names of the pod's containers
    pub container_names: BTreeSet<String>,
}

/// An autoscaler target: selects pods by label and groups their containers
#[derive(Debug, Clone)]
pub struct RecommendationTarget {
    pub namespace: String,
    pub name: String,
    /// Label selector; a pod matches when every selector entry is present
    /// in its labels
    pub selector: BTreeMap<String, String>,
}

impl RecommendationTarget {
    pub fn matches(&self, namespace: &str, labels: &BTreeMap<String, String>) -> bool {
        self.namespace == namespace
            && self
                .selector
                .iter()
                .all(|(key, value)| labels.get(key) == Some(value))
    }
}

/// Registry of pods, containers and their aggregate usage state
pub struct ClusterState {
    config: AggregationConfig,
    pods: DashMap<PodId, PodState>,
    /// Aggregate state per container, each behind its own lock
    states: DashMap<ContainerId, Arc<Mutex<AggregateContainerState>>>,
    /// Recommendation targets by (namespace, name)
    targets: DashMap<(String, String), RecommendationTarget>,
    /// State restored from checkpoints, keyed by (namespace, container name),
    /// consumed when the first live sample for a matching container arrives
    restored: DashMap<(String, String), AggregateContainerState>,
    metrics: RecommenderMetrics,
}

impl ClusterState {
    pub fn new(config: AggregationConfig) -> Self {
        Self {
            config,
            pods: DashMap::new(),
            states: DashMap::new(),
            targets: DashMap::new(),
            restored: DashMap::new(),
            metrics: RecommenderMetrics::new(),
        }
    }

    pub fn config(&self) -> &AggregationConfig {
        &self.config
    }

    /// Register a pod or refresh its labels
    pub fn add_or_update_pod(&self, pod_id: PodId, labels: BTreeMap<String, String>) {
        let mut entry = self.pods.entry(pod_id).or_default();
        entry.labels = labels;
    }

    /// Register a container under its pod
    pub fn add_or_update_container(&self, container_id: &ContainerId) {
        let mut entry = self.pods.entry(container_id.pod.clone()).or_default();
        entry
            .container_names
            .insert(container_id.container_name.clone());
    }

    /// Remove a container and drop its aggregate state
    ///
    /// The container's last checkpoint, if any, remains the durable record.
    pub fn delete_container(&self, container_id: &ContainerId) {
        if let Some(mut pod) = self.pods.get_mut(&container_id.pod) {
            pod.container_names.remove(&container_id.container_name);
        }
        if self.states.remove(container_id).is_some() {
            debug!(container = %container_id, "Dropped aggregate state for deleted container");
            self.metrics.set_containers_tracked(self.states.len() as i64);
        }
    }

    /// Remove a pod with all of its containers
    pub fn delete_pod(&self, pod_id: &PodId) {
        if let Some((_, pod)) = self.pods.remove(pod_id) {
            for name in pod.container_names {
                let container_id = ContainerId::new(pod_id.clone(), name);
                self.states.remove(&container_id);
            }
            self.metrics.set_containers_tracked(self.states.len() as i64);
        }
    }

    /// Feed one usage sample into a container's aggregate state
    ///
    /// The state is created on the first sample for the container. The
    /// per-container lock is held only for the duration of the histogram
    /// update.
    pub fn add_sample(&self, container_id: &ContainerId, sample: &UsageSample) {
        let state = self
            .states
            .entry(container_id.clone())
            .or_insert_with(|| {
                let restored_key = (
                    container_id.pod.namespace.clone(),
                    container_id.container_name.clone(),
                );
                let state = match self.restored.remove(&restored_key) {
                    Some((_, restored)) => {
                        debug!(
                            container = %container_id,
                            "Resuming aggregate state from restored checkpoint"
                        );
                        restored
                    }
                    None => {
                        debug!(container = %container_id, "Creating aggregate state on first sample");
                        AggregateContainerState::new(&self.config)
                    }
                };
                Arc::new(Mutex::new(state))
            })
            .clone();
        self.metrics.set_containers_tracked(self.states.len() as i64);

        let mut state = state.lock().expect("aggregate state lock poisoned");
        if state.add_sample(sample).is_some() {
            self.metrics.inc_windows_closed();
        }
        self.metrics.inc_samples_aggregated();
    }

    /// Look up a container's aggregate state
    pub fn container_state(
        &self,
        container_id: &ContainerId,
    ) -> Option<Arc<Mutex<AggregateContainerState>>> {
        self.states.get(container_id).map(|entry| entry.clone())
    }

    /// Seed a restored aggregate state for a container
    ///
    /// Used at startup before live ingestion resumes: the restored state
    /// becomes the initial state for the first container matching
    /// `namespace`/`container_name`, so live sampling continues on top of
    /// the persisted history.
    pub fn seed_restored_state(
        &self,
        namespace: impl Into<String>,
        container_name: impl Into<String>,
        state: AggregateContainerState,
    ) {
        self.restored
            .insert((namespace.into(), container_name.into()), state);
    }

    /// Register a recommendation target or refresh its selector
    pub fn add_or_update_target(&self, target: RecommendationTarget) {
        self.targets
            .insert((target.namespace.clone(), target.name.clone()), target);
    }

    /// Remove a recommendation target
    pub fn delete_target(&self, namespace: &str, name: &str) {
        self.targets
            .remove(&(namespace.to_string(), name.to_string()));
    }

    /// All registered recommendation targets
    pub fn list_targets(&self) -> Vec<RecommendationTarget> {
        self.targets.iter().map(|entry| entry.clone()).collect()
    }

    /// Container identifiers currently selected by a target
    pub fn select_containers(&self, target: &RecommendationTarget) -> Vec<ContainerId> {
        let mut selected = Vec::new();
        for entry in self.pods.iter() {
            let (pod_id, pod) = entry.pair();
            if !target.matches(&pod_id.namespace, &pod.labels) {
                continue;
            }
            for name in &pod.container_names {
                selected.push(ContainerId::new(pod_id.clone(), name.clone()));
            }
        }
        selected
    }

    /// Number of containers with live aggregate state
    pub fn tracked_containers(&self) -> usize {
        self.states.len()
    }
}
