//! Sample ingestion loop
//!
//! Pulls batches of usage samples from the metrics collaborator and feeds
//! them into the cluster state. Samples for different containers are
//! independent; within one container timestamps are expected non-decreasing,
//! and out-of-order samples are still accepted (the histogram decays them
//! as of its reference time rather than rewinding).

use crate::cluster::ClusterState;
use crate::models::{ContainerId, UsageSample};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};

/// Metrics collaborator delivering usage samples
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Fetch the next batch of samples; an empty batch means nothing new
    async fn next_batch(&self) -> Result<Vec<(ContainerId, UsageSample)>>;
}

/// Configuration for the sample feeder loop
#[derive(Debug, Clone)]
pub struct FeederConfig {
    /// Interval between fetches (default: 1 minute)
    pub interval: Duration,
}

impl Default for FeederConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
        }
    }
}

/// Periodic loop feeding samples into the cluster state
pub struct FeederLoop {
    cluster: Arc<ClusterState>,
    source: Arc<dyn SampleSource>,
    config: FeederConfig,
}

impl FeederLoop {
    pub fn new(
        cluster: Arc<ClusterState>,
        source: Arc<dyn SampleSource>,
        config: FeederConfig,
    ) -> Self {
        Self {
            cluster,
            source,
            config,
        }
    }

    /// Run the feeder loop until shutdown
    pub async fn run(self, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            "Starting sample feeder loop"
        );

        let mut ticker = interval(self.config.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.feed_once().await {
                        Ok(fed) => {
                            if fed > 0 {
                                debug!(samples = fed, "Feed cycle complete");
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "Feed cycle failed");
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down sample feeder loop");
                    break;
                }
            }
        }
    }

    /// Pull one batch and aggregate it; returns the number of samples fed
    pub async fn feed_once(&self) -> Result<usize> {
        let batch = self.source.next_batch().await?;
        let fed = batch.len();
        for (container_id, sample) in batch {
            self.cluster.add_or_update_container(&container_id);
            self.cluster.add_sample(&container_id, &sample);
        }
        Ok(fed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AggregationConfig;
    use crate::models::{PodId, ResourceKind};
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    struct QueueSource {
        batches: Mutex<Vec<Vec<(ContainerId, UsageSample)>>>,
    }

    #[async_trait]
    impl SampleSource for QueueSource {
        async fn next_batch(&self) -> Result<Vec<(ContainerId, UsageSample)>> {
            let mut batches = self.batches.lock().unwrap();
            Ok(batches.pop().unwrap_or_default())
        }
    }

    #[tokio::test]
    async fn test_feed_once_aggregates_batch() {
        let cluster = Arc::new(ClusterState::new(AggregationConfig::default()));
        let container_id = ContainerId::new(PodId::new("namespace-1", "pod-1"), "container-1");
        let source = Arc::new(QueueSource {
            batches: Mutex::new(vec![vec![(
                container_id.clone(),
                UsageSample::new(Utc.timestamp_opt(1, 0).unwrap(), 0.5, ResourceKind::Cpu),
            )]]),
        });

        let feeder = FeederLoop::new(cluster.clone(), source, FeederConfig::default());
        assert_eq!(feeder.feed_once().await.unwrap(), 1);
        assert_eq!(feeder.feed_once().await.unwrap(), 0);
        assert!(cluster.container_state(&container_id).is_some());
    }
}
