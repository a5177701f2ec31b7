//! Decaying histograms for usage aggregation
//!
//! A [`Histogram`] spreads observed amounts over fixed-width buckets on a
//! bounded domain. A [`DecayingHistogram`] wraps it with half-life decay:
//! every stored weight shrinks exponentially with age relative to a moving
//! reference time, so recent observations dominate percentile estimates.
//!
//! Decay is lazy. Bucket weights are attenuated only when the reference
//! time advances (on a newer sample, an explicit [`DecayingHistogram::decay_to`]
//! or a merge), which keeps every query pure given the state and a query time.

use crate::errors::HistogramError;
use chrono::{DateTime, Duration, Utc};

/// Bucket layout of a histogram: `bucket_count` fixed-width buckets over
/// `[0, max_value)`.
///
/// Out-of-domain amounts are clipped, never rejected: values at or above
/// `max_value` land in the top bucket, negative values in bucket zero.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramOptions {
    bucket_count: usize,
    max_value: f64,
}

impl HistogramOptions {
    /// A zero bucket count or a non-positive (or NaN) domain would make the
    /// layout unusable, so such values are clamped to the smallest usable
    /// layout instead of being carried through into arithmetic.
    pub fn new(bucket_count: usize, max_value: f64) -> Self {
        Self {
            bucket_count: bucket_count.max(1),
            max_value: if max_value > 0.0 { max_value } else { 1.0 },
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    pub fn max_value(&self) -> f64 {
        self.max_value
    }

    fn bucket_size(&self) -> f64 {
        self.max_value / self.bucket_count as f64
    }

    /// Bucket index for a value, clipped into the domain
    fn find_bucket(&self, value: f64) -> usize {
        if value <= 0.0 {
            return 0;
        }
        let bucket = (value / self.bucket_size()).floor() as usize;
        bucket.min(self.bucket_count - 1)
    }

    /// Lower boundary of a bucket
    fn bucket_start(&self, bucket: usize) -> f64 {
        self.bucket_size() * bucket as f64
    }

    fn check_compatible(&self, other: &HistogramOptions) -> Result<(), HistogramError> {
        if self != other {
            return Err(HistogramError::IncompatibleBuckets {
                left_buckets: self.bucket_count,
                left_max: self.max_value,
                right_buckets: other.bucket_count,
                right_max: other.max_value,
            });
        }
        Ok(())
    }
}

/// Weighted histogram over fixed-width buckets
#[derive(Debug, Clone)]
pub struct Histogram {
    options: HistogramOptions,
    bucket_weight: Vec<f64>,
    total_weight: f64,
    min_bucket: usize,
    max_bucket: usize,
}

impl Histogram {
    pub fn new(options: HistogramOptions) -> Self {
        Self {
            bucket_weight: vec![0.0; options.bucket_count()],
            total_weight: 0.0,
            min_bucket: options.bucket_count() - 1,
            max_bucket: 0,
            options,
        }
    }

    /// Rebuild a histogram from raw bucket weights. The caller has validated
    /// the weight vector against `options` (length, finiteness, sign).
    pub(crate) fn from_weights(options: HistogramOptions, bucket_weight: Vec<f64>) -> Self {
        debug_assert_eq!(bucket_weight.len(), options.bucket_count());
        let total_weight = bucket_weight.iter().sum();
        let min_bucket = bucket_weight
            .iter()
            .position(|w| *w > 0.0)
            .unwrap_or(options.bucket_count() - 1);
        let max_bucket = bucket_weight
            .iter()
            .rposition(|w| *w > 0.0)
            .unwrap_or(0);
        Self {
            bucket_weight,
            total_weight,
            min_bucket,
            max_bucket,
            options,
        }
    }

    pub fn options(&self) -> &HistogramOptions {
        &self.options
    }

    pub fn bucket_weights(&self) -> &[f64] {
        &self.bucket_weight
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// True iff no bucket currently holds nonzero weight
    pub fn is_empty(&self) -> bool {
        self.total_weight == 0.0
    }

    /// Add `weight` at the bucket covering `value`
    pub fn add_sample(&mut self, value: f64, weight: f64) {
        let bucket = self.options.find_bucket(value);
        self.bucket_weight[bucket] += weight;
        self.total_weight += weight;
        self.min_bucket = self.min_bucket.min(bucket);
        self.max_bucket = self.max_bucket.max(bucket);
    }

    /// Multiply every bucket weight by `factor`
    pub fn scale(&mut self, factor: f64) {
        debug_assert!(factor >= 0.0, "scale factor must be non-negative");
        if self.is_empty() {
            return;
        }
        for weight in &mut self.bucket_weight {
            *weight *= factor;
        }
        self.total_weight *= factor;
    }

    /// Add another histogram's weights bucket-wise, scaled by `factor`
    fn add_scaled(&mut self, other: &Histogram, factor: f64) {
        for (bucket, weight) in other.bucket_weight.iter().enumerate() {
            if *weight > 0.0 {
                self.bucket_weight[bucket] += weight * factor;
            }
        }
        self.total_weight += other.total_weight * factor;
        if !other.is_empty() {
            self.min_bucket = self.min_bucket.min(other.min_bucket);
            self.max_bucket = self.max_bucket.max(other.max_bucket);
        }
    }

    /// Merge another histogram into this one
    pub fn merge(&mut self, other: &Histogram) -> Result<(), HistogramError> {
        self.options.check_compatible(&other.options)?;
        self.add_scaled(other, 1.0);
        Ok(())
    }

    /// Upper boundary of the bucket at which cumulative weight first
    /// reaches fraction `percentile` of the total weight, capped at
    /// `max_value`
    pub fn percentile(&self, percentile: f64) -> Result<f64, HistogramError> {
        if self.is_empty() {
            return Err(HistogramError::Empty);
        }
        let threshold = percentile * self.total_weight;
        let mut partial_sum = 0.0;
        let mut bucket = self.min_bucket;
        while bucket < self.max_bucket {
            partial_sum += self.bucket_weight[bucket];
            if partial_sum >= threshold {
                break;
            }
            bucket += 1;
        }
        // Report the upper boundary of the bucket holding the percentile.
        // For the top bucket that boundary is the domain maximum, matching
        // how over-domain samples are clipped on the way in.
        Ok(self
            .options
            .bucket_start(bucket + 1)
            .min(self.options.max_value))
    }
}

/// Histogram with exponential time-decay of stored weights
///
/// The weight of a sample halves every `half_life`. All weights are stored
/// decayed to `reference_time`; the reference time only moves forward.
#[derive(Debug, Clone)]
pub struct DecayingHistogram {
    histogram: Histogram,
    half_life: Duration,
    reference_time: DateTime<Utc>,
}

impl DecayingHistogram {
    /// A zero or negative half-life would erase every weight on the first
    /// decay, so it is clamped to one second.
    pub fn new(options: HistogramOptions, half_life: Duration) -> Self {
        Self {
            histogram: Histogram::new(options),
            half_life: half_life.max(Duration::seconds(1)),
            // Placeholder until the first sample arrives; decaying zero
            // weights forward from here is a no-op.
            reference_time: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// Rebuild from checkpointed parts. The caller has validated the weights.
    pub(crate) fn from_parts(
        options: HistogramOptions,
        half_life: Duration,
        reference_time: DateTime<Utc>,
        bucket_weight: Vec<f64>,
    ) -> Self {
        Self {
            histogram: Histogram::from_weights(options, bucket_weight),
            half_life,
            reference_time,
        }
    }

    pub fn options(&self) -> &HistogramOptions {
        self.histogram.options()
    }

    pub fn half_life(&self) -> Duration {
        self.half_life
    }

    pub fn reference_time(&self) -> DateTime<Utc> {
        self.reference_time
    }

    pub fn bucket_weights(&self) -> &[f64] {
        self.histogram.bucket_weights()
    }

    pub fn total_weight(&self) -> f64 {
        self.histogram.total_weight()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Weight multiplier for age `elapsed`: `0.5^(elapsed / half_life)`
    fn decay_factor(&self, elapsed: Duration) -> f64 {
        if elapsed <= Duration::zero() {
            return 1.0;
        }
        let ratio = elapsed.num_milliseconds() as f64 / self.half_life.num_milliseconds() as f64;
        (-ratio * std::f64::consts::LN_2).exp()
    }

    /// Advance the reference time to `time`, attenuating all stored weights.
    /// Times at or before the current reference time are a no-op; the
    /// reference time never rewinds.
    pub fn decay_to(&mut self, time: DateTime<Utc>) {
        if time <= self.reference_time {
            return;
        }
        let factor = self.decay_factor(time - self.reference_time);
        self.histogram.scale(factor);
        self.reference_time = time;
    }

    /// Insert one observation of `value` taken at `time` with base weight 1.0
    ///
    /// A sample newer than the reference time advances it first. A sample
    /// older than the reference time is inserted already decayed as of the
    /// reference time; the histogram is never rewound.
    pub fn add_sample(&mut self, value: f64, time: DateTime<Utc>) {
        self.decay_to(time);
        let weight = self.decay_factor(self.reference_time - time);
        self.histogram.add_sample(value, weight);
    }

    /// Merge another decaying histogram into this one
    ///
    /// Both sides are decayed to the later of the two reference times before
    /// bucket-wise summation, which makes the operation commutative and
    /// associative up to floating rounding.
    pub fn merge(&mut self, other: &DecayingHistogram) -> Result<(), HistogramError> {
        self.histogram
            .options()
            .check_compatible(other.histogram.options())?;
        if self.half_life != other.half_life {
            return Err(HistogramError::IncompatibleHalfLife {
                left_secs: self.half_life.num_seconds(),
                right_secs: other.half_life.num_seconds(),
            });
        }
        self.decay_to(other.reference_time);
        let factor = other.decay_factor(self.reference_time - other.reference_time);
        self.histogram.add_scaled(&other.histogram, factor);
        Ok(())
    }

    /// Percentile over the decayed weights; fails on an empty histogram
    pub fn percentile(&self, percentile: f64) -> Result<f64, HistogramError> {
        self.histogram.percentile(percentile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn options() -> HistogramOptions {
        HistogramOptions::new(10, 10.0)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_empty_histogram() {
        let histogram = Histogram::new(options());
        assert!(histogram.is_empty());
        assert_eq!(histogram.percentile(0.5), Err(HistogramError::Empty));
    }

    #[test]
    fn test_out_of_domain_values_are_clipped() {
        let mut histogram = Histogram::new(options());
        histogram.add_sample(-5.0, 1.0);
        histogram.add_sample(1e9, 1.0);
        assert_eq!(histogram.bucket_weights()[0], 1.0);
        assert_eq!(histogram.bucket_weights()[9], 1.0);
        assert!(!histogram.is_empty());
    }

    #[test]
    fn test_percentile_reports_bucket_boundary() {
        let mut histogram = Histogram::new(options());
        for value in [1.5, 2.5, 3.5, 4.5] {
            histogram.add_sample(value, 1.0);
        }
        // Half the weight sits in buckets 1 and 2; the p50 boundary is the
        // upper edge of bucket 2.
        assert_eq!(histogram.percentile(0.5).unwrap(), 3.0);
        assert_eq!(histogram.percentile(1.0).unwrap(), 5.0);
    }

    #[test]
    fn test_top_bucket_percentile_caps_at_max_value() {
        let mut histogram = Histogram::new(options());
        // Clipped into the top bucket on the way in.
        histogram.add_sample(1e9, 1.0);
        assert_eq!(histogram.percentile(1.0).unwrap(), 10.0);
        assert_eq!(histogram.percentile(0.5).unwrap(), 10.0);
    }

    #[test]
    fn test_degenerate_layout_is_clamped_usable() {
        let options = HistogramOptions::new(0, 0.0);
        assert_eq!(options.bucket_count(), 1);
        assert!(options.max_value() > 0.0);
        let mut histogram = Histogram::new(options);
        histogram.add_sample(5.0, 1.0);
        assert_eq!(histogram.percentile(1.0).unwrap(), options.max_value());
    }

    #[test]
    fn test_merge_incompatible_buckets() {
        let mut left = Histogram::new(HistogramOptions::new(10, 10.0));
        let right = Histogram::new(HistogramOptions::new(20, 10.0));
        assert!(matches!(
            left.merge(&right),
            Err(HistogramError::IncompatibleBuckets { .. })
        ));
    }

    #[test]
    fn test_merge_with_empty_preserves_percentiles() {
        let mut left = Histogram::new(options());
        left.add_sample(4.2, 1.0);
        let before = left.percentile(0.9).unwrap();
        left.merge(&Histogram::new(options())).unwrap();
        assert_eq!(left.percentile(0.9).unwrap(), before);
    }

    #[test]
    fn test_decay_halves_weight_after_half_life() {
        let mut histogram = DecayingHistogram::new(options(), Duration::hours(1));
        histogram.add_sample(5.0, at(0));
        assert_eq!(histogram.total_weight(), 1.0);
        histogram.decay_to(at(3600));
        assert!((histogram.total_weight() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_newer_sample_advances_reference_time() {
        let mut histogram = DecayingHistogram::new(options(), Duration::hours(1));
        histogram.add_sample(5.0, at(0));
        histogram.add_sample(5.0, at(3600));
        assert_eq!(histogram.reference_time(), at(3600));
        // Old weight halved, new weight 1.0.
        assert!((histogram.total_weight() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_older_sample_is_decayed_not_rewound() {
        let mut histogram = DecayingHistogram::new(options(), Duration::hours(1));
        histogram.add_sample(5.0, at(7200));
        histogram.add_sample(5.0, at(3600));
        assert_eq!(histogram.reference_time(), at(7200));
        assert!((histogram.total_weight() - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_decay_to_past_never_yields_negative_weight() {
        let mut histogram = DecayingHistogram::new(options(), Duration::hours(1));
        histogram.add_sample(5.0, at(7200));
        histogram.decay_to(at(0));
        assert_eq!(histogram.reference_time(), at(7200));
        assert!(histogram.total_weight() > 0.0);
    }

    #[test]
    fn test_merge_is_commutative() {
        let half_life = Duration::hours(1);
        let mut a = DecayingHistogram::new(options(), half_life);
        a.add_sample(2.0, at(0));
        a.add_sample(3.0, at(1800));
        let mut b = DecayingHistogram::new(options(), half_life);
        b.add_sample(7.0, at(3600));

        let mut ab = a.clone();
        ab.merge(&b).unwrap();
        let mut ba = b.clone();
        ba.merge(&a).unwrap();

        assert_eq!(ab.reference_time(), ba.reference_time());
        for (left, right) in ab.bucket_weights().iter().zip(ba.bucket_weights()) {
            assert!((left - right).abs() < 1e-9);
        }
    }

    #[test]
    fn test_merge_rejects_half_life_mismatch() {
        let mut left = DecayingHistogram::new(options(), Duration::hours(1));
        let right = DecayingHistogram::new(options(), Duration::hours(2));
        assert!(matches!(
            left.merge(&right),
            Err(HistogramError::IncompatibleHalfLife { .. })
        ));
    }
}
