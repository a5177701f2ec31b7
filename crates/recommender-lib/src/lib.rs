//! Usage aggregation and checkpoint core for the container recommender
//!
//! This crate provides the substrate that turns raw container usage samples
//! into decaying statistical summaries and keeps those summaries durable
//! across restarts:
//! - Decaying histograms with half-life weight decay
//! - Per-container aggregation with memory peak windows
//! - A cluster state registry shared by ingestion and checkpointing
//! - Checkpoint building, periodic writing and merge-on-load

pub mod aggregation;
pub mod checkpoint;
pub mod cluster;
pub mod config;
pub mod errors;
pub mod feeder;
pub mod histogram;
pub mod models;
pub mod observability;

pub use aggregation::AggregateContainerState;
pub use checkpoint::{
    build_aggregate_container_state_map, restore_container_state, restore_from_store,
    AggregateContainerStateView, CheckpointStore, CheckpointWriter, CheckpointWriterConfig,
    ContainerCheckpoint, HistogramCheckpoint,
};
pub use cluster::{ClusterState, PodState, RecommendationTarget};
pub use config::AggregationConfig;
pub use errors::{CheckpointError, HistogramError};
pub use feeder::{FeederConfig, FeederLoop, SampleSource};
pub use histogram::{DecayingHistogram, Histogram, HistogramOptions};
pub use models::{ContainerId, PodId, ResourceKind, UsageSample};
pub use observability::RecommenderMetrics;
