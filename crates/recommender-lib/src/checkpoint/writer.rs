//! Periodic checkpoint writing and restore-on-startup
//!
//! The writer loop periodically builds the per-target state maps and hands
//! the resulting records to a [`CheckpointStore`]. The store owns the
//! durable write/read, versioning and garbage collection of checkpoints for
//! deleted containers; no I/O happens inside the builder itself.

use super::{
    build_aggregate_container_state_map, checkpoints_for_target, restore_container_state,
    ContainerCheckpoint,
};
use crate::cluster::ClusterState;
use crate::observability::RecommenderMetrics;
use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Durable storage collaborator for checkpoint records
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist one checkpoint cycle's records
    async fn store(&self, checkpoints: Vec<ContainerCheckpoint>) -> Result<()>;

    /// Load all previously persisted records
    async fn load(&self) -> Result<Vec<ContainerCheckpoint>>;
}

/// Configuration for the checkpoint writer loop
#[derive(Debug, Clone)]
pub struct CheckpointWriterConfig {
    /// Interval between checkpoint cycles (default: 10 minutes)
    pub interval: Duration,
}

impl Default for CheckpointWriterConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10 * 60),
        }
    }
}

/// Periodic checkpoint writer
pub struct CheckpointWriter {
    cluster: Arc<ClusterState>,
    store: Arc<dyn CheckpointStore>,
    config: CheckpointWriterConfig,
    metrics: RecommenderMetrics,
}

impl CheckpointWriter {
    pub fn new(
        cluster: Arc<ClusterState>,
        store: Arc<dyn CheckpointStore>,
        config: CheckpointWriterConfig,
    ) -> Self {
        Self {
            cluster,
            store,
            config,
            metrics: RecommenderMetrics::new(),
        }
    }

    /// Run the writer loop until shutdown
    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting checkpoint writer loop"
        );

        let mut ticker = interval(self.config.interval);
        // The first tick fires immediately; skip it so a fresh process does
        // not checkpoint empty state right after restore.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.write_once().await {
                        Ok(written) => {
                            debug!(checkpoints = written, "Checkpoint cycle complete");
                        }
                        Err(e) => {
                            warn!(error = %e, "Checkpoint cycle failed");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down checkpoint writer loop");
                    // Best-effort final checkpoint so a clean shutdown loses
                    // nothing since the last cycle.
                    if let Err(e) = self.write_once().await {
                        warn!(error = %e, "Final checkpoint on shutdown failed");
                    }
                    break;
                }
            }
        }
    }

    /// Build and persist one checkpoint cycle; returns the record count
    pub async fn write_once(&self) -> Result<usize> {
        let reference_time = Utc::now();
        let mut records = Vec::new();

        for target in self.cluster.list_targets() {
            let state_map =
                build_aggregate_container_state_map(&self.cluster, &target, reference_time)?;
            records.extend(checkpoints_for_target(&target, &state_map));
        }

        let written = records.len();
        if written > 0 {
            self.store.store(records).await?;
            self.metrics.add_checkpoints_written(written as u64);
        }
        Ok(written)
    }
}

/// Restore aggregate state from persisted checkpoints at startup
///
/// Each loaded record is reconstructed and seeded into the cluster state so
/// live sampling resumes on top of it. A corrupt or incompatible record is
/// logged and skipped; the affected container starts cold. Returns the
/// number of restored records.
pub async fn restore_from_store(
    cluster: &ClusterState,
    store: &dyn CheckpointStore,
) -> Result<usize> {
    let metrics = RecommenderMetrics::new();
    let records = store.load().await?;
    let mut restored = 0usize;

    for record in records {
        match restore_container_state(cluster.config(), &record) {
            Ok(state) => {
                cluster.seed_restored_state(
                    record.namespace.clone(),
                    record.container_name.clone(),
                    state,
                );
                metrics.inc_checkpoints_restored();
                restored += 1;
            }
            Err(e) => {
                warn!(
                    namespace = %record.namespace,
                    container = %record.container_name,
                    error = %e,
                    "Skipping checkpoint, container starts cold"
                );
                metrics.inc_checkpoints_skipped();
            }
        }
    }

    info!(restored, "Checkpoint restore complete");
    Ok(restored)
}
