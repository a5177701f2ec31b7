//! Observability for the usage recommender
//!
//! Prometheus metrics covering sample ingestion, window aggregation and the
//! checkpoint cycle. Metrics register once into the default registry; the
//! public handle is cheap to clone and share.

use prometheus::{register_int_counter, register_int_gauge, IntCounter, IntGauge};
use std::sync::OnceLock;

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<RecommenderMetricsInner> = OnceLock::new();

/// Inner metrics structure that holds the actual Prometheus metrics
struct RecommenderMetricsInner {
    samples_aggregated: IntCounter,
    windows_closed: IntCounter,
    checkpoints_written: IntCounter,
    checkpoints_restored: IntCounter,
    checkpoints_skipped: IntCounter,
    containers_tracked: IntGauge,
}

impl RecommenderMetricsInner {
    fn new() -> Self {
        Self {
            samples_aggregated: register_int_counter!(
                "recommender_samples_aggregated_total",
                "Total number of usage samples absorbed into aggregate state"
            )
            .expect("Failed to register samples_aggregated_total"),

            windows_closed: register_int_counter!(
                "recommender_memory_windows_closed_total",
                "Total number of memory aggregation windows closed"
            )
            .expect("Failed to register memory_windows_closed_total"),

            checkpoints_written: register_int_counter!(
                "recommender_checkpoints_written_total",
                "Total number of container checkpoints handed to storage"
            )
            .expect("Failed to register checkpoints_written_total"),

            checkpoints_restored: register_int_counter!(
                "recommender_checkpoints_restored_total",
                "Total number of container checkpoints restored at startup"
            )
            .expect("Failed to register checkpoints_restored_total"),

            checkpoints_skipped: register_int_counter!(
                "recommender_checkpoints_skipped_total",
                "Total number of checkpoints skipped as corrupt or incompatible"
            )
            .expect("Failed to register checkpoints_skipped_total"),

            containers_tracked: register_int_gauge!(
                "recommender_containers_tracked",
                "Number of containers with live aggregate state"
            )
            .expect("Failed to register containers_tracked"),
        }
    }
}

/// Metrics handle for Prometheus exposition
///
/// A lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct RecommenderMetrics {
    _private: (),
}

impl Default for RecommenderMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RecommenderMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(RecommenderMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &RecommenderMetricsInner {
        GLOBAL_METRICS.get().expect("Metrics not initialized")
    }

    pub fn inc_samples_aggregated(&self) {
        self.inner().samples_aggregated.inc();
    }

    pub fn inc_windows_closed(&self) {
        self.inner().windows_closed.inc();
    }

    pub fn add_checkpoints_written(&self, count: u64) {
        self.inner().checkpoints_written.inc_by(count);
    }

    pub fn inc_checkpoints_restored(&self) {
        self.inner().checkpoints_restored.inc();
    }

    pub fn inc_checkpoints_skipped(&self) {
        self.inner().checkpoints_skipped.inc();
    }

    pub fn set_containers_tracked(&self, count: i64) {
        self.inner().containers_tracked.set(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_handle() {
        let metrics = RecommenderMetrics::new();
        metrics.inc_samples_aggregated();
        metrics.inc_windows_closed();
        metrics.add_checkpoints_written(3);
        metrics.inc_checkpoints_restored();
        metrics.inc_checkpoints_skipped();
        metrics.set_containers_tracked(5);
    }
}
