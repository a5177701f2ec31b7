//! Recommender configuration

use anyhow::Result;
use recommender_lib::AggregationConfig;
use serde::Deserialize;
use std::path::PathBuf;

/// Process configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RecommenderConfig {
    /// API server port for health/metrics/ingest
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Path of the checkpoint file
    #[serde(default = "default_checkpoint_path")]
    pub checkpoint_path: PathBuf,

    /// Interval between checkpoint cycles in seconds
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval_secs: u64,

    /// Interval between sample feed cycles in seconds
    #[serde(default = "default_feed_interval")]
    pub feed_interval_secs: u64,

    /// Aggregation policy constants
    #[serde(default)]
    pub aggregation: AggregationConfig,
}

fn default_api_port() -> u16 {
    8080
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from("/var/lib/recommender/checkpoints.json")
}

fn default_checkpoint_interval() -> u64 {
    10 * 60
}

fn default_feed_interval() -> u64 {
    1
}

impl Default for RecommenderConfig {
    fn default() -> Self {
        Self {
            api_port: default_api_port(),
            checkpoint_path: default_checkpoint_path(),
            checkpoint_interval_secs: default_checkpoint_interval(),
            feed_interval_secs: default_feed_interval(),
            aggregation: AggregationConfig::default(),
        }
    }
}

impl RecommenderConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("RECOMMENDER").separator("__"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_default())
    }
}
