//! Checkpoint building and merge-on-load
//!
//! The builder walks the live object graph and produces, per recommendation
//! target, a deduplicated map of container name to aggregate state view.
//! States of same-named containers across the target's pods merge into one
//! entry. A still-open memory window contributes nothing to the view: only
//! closed, complete window peaks are trustworthy data points, and recording
//! a running maximum would corrupt future recommendations with partial data.
//!
//! The builder performs no I/O. Its result is hand-off data for the
//! [`CheckpointStore`] collaborator, which owns versioning, garbage
//! collection and the durable write/read.

mod writer;

pub use writer::{restore_from_store, CheckpointStore, CheckpointWriter, CheckpointWriterConfig};

use crate::aggregation::AggregateContainerState;
use crate::cluster::{ClusterState, RecommendationTarget};
use crate::config::AggregationConfig;
use crate::errors::{CheckpointError, HistogramError};
use crate::histogram::DecayingHistogram;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Serialized form of one decaying histogram
///
/// Carries its own bucket layout and half-life so incompatibility with the
/// running configuration is detectable at restore time. The open memory
/// window is deliberately never part of this form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramCheckpoint {
    pub bucket_count: usize,
    pub max_value: f64,
    pub half_life_secs: i64,
    pub reference_time: DateTime<Utc>,
    pub bucket_weights: Vec<f64>,
}

impl HistogramCheckpoint {
    pub fn from_histogram(histogram: &DecayingHistogram) -> Self {
        Self {
            bucket_count: histogram.options().bucket_count(),
            max_value: histogram.options().max_value(),
            half_life_secs: histogram.half_life().num_seconds(),
            reference_time: histogram.reference_time(),
            bucket_weights: histogram.bucket_weights().to_vec(),
        }
    }

    /// Validate against the running configuration and rebuild the histogram
    fn to_histogram(
        &self,
        config: &AggregationConfig,
        expected: crate::histogram::HistogramOptions,
        container: &str,
    ) -> Result<DecayingHistogram, CheckpointError> {
        if self.bucket_count != expected.bucket_count() || self.max_value != expected.max_value()
        {
            return Err(CheckpointError::IncompatibleLayout {
                container: container.to_string(),
                source: HistogramError::IncompatibleBuckets {
                    left_buckets: expected.bucket_count(),
                    left_max: expected.max_value(),
                    right_buckets: self.bucket_count,
                    right_max: self.max_value,
                },
            });
        }
        if self.half_life_secs != config.half_life_secs {
            return Err(CheckpointError::IncompatibleLayout {
                container: container.to_string(),
                source: HistogramError::IncompatibleHalfLife {
                    left_secs: config.half_life_secs,
                    right_secs: self.half_life_secs,
                },
            });
        }
        if self.bucket_weights.len() != self.bucket_count {
            return Err(CheckpointError::Corrupt {
                container: container.to_string(),
                reason: format!(
                    "{} bucket weights for {} buckets",
                    self.bucket_weights.len(),
                    self.bucket_count
                ),
            });
        }
        if let Some(weight) = self
            .bucket_weights
            .iter()
            .find(|w| !w.is_finite() || **w < 0.0)
        {
            return Err(CheckpointError::Corrupt {
                container: container.to_string(),
                reason: format!("invalid bucket weight {weight}"),
            });
        }
        Ok(DecayingHistogram::from_parts(
            expected,
            config.half_life(),
            self.reference_time,
            self.bucket_weights.clone(),
        ))
    }
}

/// One persisted checkpoint record for one container of one target
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerCheckpoint {
    pub namespace: String,
    pub target_name: String,
    pub container_name: String,
    pub cpu_usage: HistogramCheckpoint,
    pub memory_peaks: HistogramCheckpoint,
}

/// Read-consistent view of one container's aggregate state
///
/// `memory_peaks` holds closed-window peaks only; the open window is
/// excluded by construction.
#[derive(Debug, Clone)]
pub struct AggregateContainerStateView {
    pub cpu_usage: DecayingHistogram,
    pub memory_peaks: DecayingHistogram,
}

/// Build the checkpointable state map for one recommendation target
///
/// For every container currently selected by the target, the container's
/// window is first closed if it has fully elapsed as of `reference_time`
/// (so an old peak becomes visible without requiring a newer sample), then
/// both histograms are snapshotted and decayed up to `reference_time`.
/// Containers with no recorded state are omitted. The result is
/// deterministic: the same reference time with no intervening samples
/// yields an identical map.
pub fn build_aggregate_container_state_map(
    cluster: &ClusterState,
    target: &RecommendationTarget,
    reference_time: DateTime<Utc>,
) -> Result<BTreeMap<String, AggregateContainerStateView>, HistogramError> {
    let mut result: BTreeMap<String, AggregateContainerStateView> = BTreeMap::new();

    for container_id in cluster.select_containers(target) {
        let Some(state) = cluster.container_state(&container_id) else {
            // No samples ever observed; nothing to checkpoint.
            continue;
        };

        // Per-container lock: the view is atomic with respect to this
        // container's writer, without a global lock over the graph.
        let view = {
            let mut state = state.lock().expect("aggregate state lock poisoned");
            state.close_expired_window(reference_time);
            let mut cpu_usage = state.cpu_snapshot();
            let mut memory_peaks = state.peaks_snapshot();
            cpu_usage.decay_to(reference_time);
            memory_peaks.decay_to(reference_time);
            AggregateContainerStateView {
                cpu_usage,
                memory_peaks,
            }
        };

        match result.entry(container_id.container_name.clone()) {
            std::collections::btree_map::Entry::Vacant(entry) => {
                entry.insert(view);
            }
            std::collections::btree_map::Entry::Occupied(mut entry) => {
                let merged = entry.get_mut();
                merged.cpu_usage.merge(&view.cpu_usage)?;
                merged.memory_peaks.merge(&view.memory_peaks)?;
            }
        }
    }

    Ok(result)
}

/// Convert a built state map into persistable checkpoint records
pub fn checkpoints_for_target(
    target: &RecommendationTarget,
    state_map: &BTreeMap<String, AggregateContainerStateView>,
) -> Vec<ContainerCheckpoint> {
    state_map
        .iter()
        .map(|(container_name, view)| ContainerCheckpoint {
            namespace: target.namespace.clone(),
            target_name: target.name.clone(),
            container_name: container_name.clone(),
            cpu_usage: HistogramCheckpoint::from_histogram(&view.cpu_usage),
            memory_peaks: HistogramCheckpoint::from_histogram(&view.memory_peaks),
        })
        .collect()
}

/// Reconstruct a fresh aggregate state from one checkpoint record
///
/// The restored state has the persisted CPU and memory-peak histograms
/// merged in and its window tracker unopened. Incompatibility with the
/// running configuration or a malformed payload is returned to the caller,
/// which skips the container (cold start) rather than aborting the restore.
pub fn restore_container_state(
    config: &AggregationConfig,
    checkpoint: &ContainerCheckpoint,
) -> Result<AggregateContainerState, CheckpointError> {
    let container = &checkpoint.container_name;
    let cpu_usage =
        checkpoint
            .cpu_usage
            .to_histogram(config, config.cpu_histogram_options(), container)?;
    let memory_peaks = checkpoint.memory_peaks.to_histogram(
        config,
        config.memory_histogram_options(),
        container,
    )?;

    let mut state = AggregateContainerState::new(config);
    state
        .merge_histograms(&cpu_usage, &memory_peaks)
        .map_err(|source| CheckpointError::IncompatibleLayout {
            container: container.clone(),
            source,
        })?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContainerId, PodId, ResourceKind, UsageSample};
    use chrono::TimeZone;

    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn test_cluster() -> (ClusterState, ContainerId, RecommendationTarget) {
        let cluster = ClusterState::new(AggregationConfig::default());
        let container_id = ContainerId::new(PodId::new("namespace-1", "pod-1"), "container-1");
        let labels = BTreeMap::from([("label-1".to_string(), "value-1".to_string())]);
        cluster.add_or_update_pod(container_id.pod.clone(), labels.clone());
        cluster.add_or_update_container(&container_id);
        let target = RecommendationTarget {
            namespace: "namespace-1".to_string(),
            name: "target-1".to_string(),
            selector: labels,
        };
        (cluster, container_id, target)
    }

    #[test]
    fn test_builder_drops_recent_memory_peak() {
        let (cluster, container_id, target) = test_cluster();
        let time_now = at(1);
        cluster.add_sample(
            &container_id,
            &UsageSample::new(time_now, GIB, ResourceKind::Memory),
        );

        // The current peak is excluded from the aggregation.
        let state_map =
            build_aggregate_container_state_map(&cluster, &target, time_now).unwrap();
        let view = state_map.get("container-1").expect("container in map");
        assert!(view.memory_peaks.is_empty());

        // An old peak is not excluded from the aggregation.
        let time_later = time_now + cluster.config().memory_aggregation_interval();
        let state_map =
            build_aggregate_container_state_map(&cluster, &target, time_later).unwrap();
        let view = state_map.get("container-1").expect("container in map");
        assert!(!view.memory_peaks.is_empty());
    }

    #[test]
    fn test_builder_omits_container_without_samples() {
        let (cluster, _, target) = test_cluster();
        let state_map = build_aggregate_container_state_map(&cluster, &target, at(1)).unwrap();
        assert!(state_map.is_empty());
    }

    #[test]
    fn test_builder_merges_same_named_containers_across_pods() {
        let (cluster, container_id, target) = test_cluster();
        let sibling = ContainerId::new(PodId::new("namespace-1", "pod-2"), "container-1");
        let labels = BTreeMap::from([("label-1".to_string(), "value-1".to_string())]);
        cluster.add_or_update_pod(sibling.pod.clone(), labels);
        cluster.add_or_update_container(&sibling);

        cluster.add_sample(
            &container_id,
            &UsageSample::new(at(1), 1.0, ResourceKind::Cpu),
        );
        cluster.add_sample(&sibling, &UsageSample::new(at(1), 2.0, ResourceKind::Cpu));

        let state_map = build_aggregate_container_state_map(&cluster, &target, at(1)).unwrap();
        assert_eq!(state_map.len(), 1);
        let view = state_map.get("container-1").unwrap();
        assert!((view.cpu_usage.total_weight() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_checkpoint_round_trip_preserves_percentiles() {
        let config = AggregationConfig::default();
        let (cluster, container_id, target) = test_cluster();
        for (secs, cores) in [(1, 0.5), (60, 2.5), (120, 1.0)] {
            cluster.add_sample(
                &container_id,
                &UsageSample::new(at(secs), cores, ResourceKind::Cpu),
            );
        }
        cluster.add_sample(
            &container_id,
            &UsageSample::new(at(1), GIB, ResourceKind::Memory),
        );
        let reference_time = at(1) + config.memory_aggregation_interval();

        let state_map =
            build_aggregate_container_state_map(&cluster, &target, reference_time).unwrap();
        let checkpoints = checkpoints_for_target(&target, &state_map);
        assert_eq!(checkpoints.len(), 1);

        let json = serde_json::to_string(&checkpoints[0]).unwrap();
        let decoded: ContainerCheckpoint = serde_json::from_str(&json).unwrap();
        let restored = restore_container_state(&config, &decoded).unwrap();

        let original = state_map.get("container-1").unwrap();
        for p in [0.5, 0.9, 0.99] {
            assert!(
                (restored.cpu_usage().percentile(p).unwrap()
                    - original.cpu_usage.percentile(p).unwrap())
                .abs()
                    < 1e-9
            );
            assert!(
                (restored.memory_peaks().percentile(p).unwrap()
                    - original.memory_peaks.percentile(p).unwrap())
                .abs()
                    < 1e-6
            );
        }
        assert!(restored.open_window().is_none());
    }

    #[test]
    fn test_restore_rejects_incompatible_layout() {
        let (cluster, container_id, target) = test_cluster();
        cluster.add_sample(
            &container_id,
            &UsageSample::new(at(1), 1.0, ResourceKind::Cpu),
        );
        let state_map = build_aggregate_container_state_map(&cluster, &target, at(1)).unwrap();
        let checkpoints = checkpoints_for_target(&target, &state_map);

        let other_config = AggregationConfig {
            bucket_count: 100,
            ..AggregationConfig::default()
        };
        assert!(matches!(
            restore_container_state(&other_config, &checkpoints[0]),
            Err(CheckpointError::IncompatibleLayout { .. })
        ));
    }

    #[test]
    fn test_restore_rejects_corrupt_weights() {
        let config = AggregationConfig::default();
        let (cluster, container_id, target) = test_cluster();
        cluster.add_sample(
            &container_id,
            &UsageSample::new(at(1), 1.0, ResourceKind::Cpu),
        );
        let state_map = build_aggregate_container_state_map(&cluster, &target, at(1)).unwrap();
        let mut checkpoints = checkpoints_for_target(&target, &state_map);

        checkpoints[0].cpu_usage.bucket_weights[0] = f64::NAN;
        assert!(matches!(
            restore_container_state(&config, &checkpoints[0]),
            Err(CheckpointError::Corrupt { .. })
        ));

        checkpoints[0].cpu_usage.bucket_weights.truncate(10);
        assert!(matches!(
            restore_container_state(&config, &checkpoints[0]),
            Err(CheckpointError::Corrupt { .. })
        ));
    }
}
