//! Container usage recommender
//!
//! Aggregates observed container CPU and memory usage into decaying
//! histograms and periodically checkpoints the aggregate state so
//! recommendation history survives restarts.

use anyhow::Result;
use recommender_lib::{
    restore_from_store, CheckpointWriter, CheckpointWriterConfig, ClusterState, FeederConfig,
    FeederLoop, RecommenderMetrics,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod store;

/// Ingest queue depth before producers back off
const SAMPLE_QUEUE_SIZE: usize = 10_000;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting recommender");

    let config = config::RecommenderConfig::load()?;
    info!(
        checkpoint_path = %config.checkpoint_path.display(),
        "Recommender configured"
    );

    let metrics = RecommenderMetrics::new();
    let cluster = Arc::new(ClusterState::new(config.aggregation.clone()));
    let checkpoint_store = Arc::new(store::FileCheckpointStore::new(
        config.checkpoint_path.clone(),
    ));

    // Restore aggregate state from the last checkpoint before ingestion starts.
    restore_from_store(&cluster, checkpoint_store.as_ref()).await?;
    metrics.set_containers_tracked(cluster.tracked_containers() as i64);

    let (shutdown_tx, _) = broadcast::channel(1);
    let (samples_tx, samples_rx) = mpsc::channel(SAMPLE_QUEUE_SIZE);

    let feeder = FeederLoop::new(
        cluster.clone(),
        Arc::new(api::QueuedSampleSource::new(samples_rx, SAMPLE_QUEUE_SIZE)),
        FeederConfig {
            interval: Duration::from_secs(config.feed_interval_secs),
        },
    );
    let feeder_handle = tokio::spawn(feeder.run(shutdown_tx.subscribe()));

    let writer = CheckpointWriter::new(
        cluster.clone(),
        checkpoint_store,
        CheckpointWriterConfig {
            interval: Duration::from_secs(config.checkpoint_interval_secs),
        },
    );
    let writer_handle = tokio::spawn(writer.run(shutdown_tx.subscribe()));

    let app_state = Arc::new(api::AppState {
        cluster,
        samples_tx,
    });
    tokio::spawn(api::serve(config.api_port, app_state));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    let _ = shutdown_tx.send(());

    // The writer takes a final checkpoint on shutdown; wait for it.
    let _ = feeder_handle.await;
    let _ = writer_handle.await;

    Ok(())
}
