//! Aggregation configuration
//!
//! Policy constants shared by all containers: histogram bucket layout,
//! decay half-life and the memory aggregation window length. Values are
//! deserialized with field defaults so a partial config is always usable.

use crate::histogram::HistogramOptions;
use chrono::Duration;
use serde::Deserialize;

/// Configuration for usage aggregation
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    /// Length of one memory aggregation window in seconds (default: 24h)
    #[serde(default = "default_memory_aggregation_interval_secs")]
    pub memory_aggregation_interval_secs: i64,

    /// Histogram decay half-life in seconds (default: 24h)
    #[serde(default = "default_half_life_secs")]
    pub half_life_secs: i64,

    /// Number of fixed-width buckets per histogram
    #[serde(default = "default_bucket_count")]
    pub bucket_count: usize,

    /// Upper bound of the CPU histogram domain, in cores
    #[serde(default = "default_max_cpu_cores")]
    pub max_cpu_cores: f64,

    /// Upper bound of the memory histogram domain, in bytes
    #[serde(default = "default_max_memory_bytes")]
    pub max_memory_bytes: f64,
}

fn default_memory_aggregation_interval_secs() -> i64 {
    24 * 60 * 60
}

fn default_half_life_secs() -> i64 {
    24 * 60 * 60
}

fn default_bucket_count() -> usize {
    400
}

fn default_max_cpu_cores() -> f64 {
    100.0
}

fn default_max_memory_bytes() -> f64 {
    512.0 * 1024.0 * 1024.0 * 1024.0
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            memory_aggregation_interval_secs: default_memory_aggregation_interval_secs(),
            half_life_secs: default_half_life_secs(),
            bucket_count: default_bucket_count(),
            max_cpu_cores: default_max_cpu_cores(),
            max_memory_bytes: default_max_memory_bytes(),
        }
    }
}

impl AggregationConfig {
    /// Length of one memory aggregation window, at least one second so a
    /// zero value from the environment cannot break window alignment
    pub fn memory_aggregation_interval(&self) -> Duration {
        Duration::seconds(self.memory_aggregation_interval_secs.max(1))
    }

    /// Histogram decay half-life, at least one second
    pub fn half_life(&self) -> Duration {
        Duration::seconds(self.half_life_secs.max(1))
    }

    /// Bucket layout for CPU usage histograms
    pub fn cpu_histogram_options(&self) -> HistogramOptions {
        HistogramOptions::new(self.bucket_count, self.max_cpu_cores)
    }

    /// Bucket layout for memory peak histograms
    pub fn memory_histogram_options(&self) -> HistogramOptions {
        HistogramOptions::new(self.bucket_count, self.max_memory_bytes)
    }
}
