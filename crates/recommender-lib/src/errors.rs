//! Error taxonomy for the aggregation and checkpoint core
//!
//! All errors here are pure and local: no operation in this crate performs
//! network or disk I/O, so failures are always returned to the caller and
//! never retried internally.

use thiserror::Error;

/// Errors from histogram operations
#[derive(Debug, Error, PartialEq)]
pub enum HistogramError {
    /// A percentile or summary was requested on a histogram with zero total
    /// weight. Callers recover locally by treating this as "no data yet".
    #[error("histogram is empty")]
    Empty,

    /// Two histograms with mismatched bucket configurations were merged.
    #[error(
        "incompatible histograms: {left_buckets} buckets over [0, {left_max}) \
         vs {right_buckets} buckets over [0, {right_max})"
    )]
    IncompatibleBuckets {
        left_buckets: usize,
        left_max: f64,
        right_buckets: usize,
        right_max: f64,
    },

    /// Two decaying histograms with different half-lives were merged; their
    /// decayed weights are not comparable even at a common reference time.
    #[error("incompatible half-lives: {left_secs}s vs {right_secs}s")]
    IncompatibleHalfLife { left_secs: i64, right_secs: i64 },
}

/// Errors from checkpoint restoration
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// The serialized payload is malformed (bucket count mismatch,
    /// non-finite or negative weights).
    #[error("corrupt checkpoint for {container}: {reason}")]
    Corrupt { container: String, reason: String },

    /// The serialized bucket layout does not match the current histogram
    /// configuration. The caller should skip this container's restoration
    /// and let it start cold.
    #[error("checkpoint layout incompatible for {container}: {source}")]
    IncompatibleLayout {
        container: String,
        #[source]
        source: HistogramError,
    },
}
