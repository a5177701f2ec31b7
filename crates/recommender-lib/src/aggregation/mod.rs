//! Per-container usage aggregation
//!
//! An [`AggregateContainerState`] owns the decayed usage history of one
//! container: a CPU usage histogram fed directly from samples and a memory
//! peak histogram fed only from closed aggregation windows. The open
//! window's running maximum lives in a structurally separate field and is
//! never mixed into the peak histogram until its window elapses, so a
//! checkpoint can never observe an incomplete peak.

mod window;

pub use window::{ClosedPeak, PeakWindow, WindowTracker};

use crate::config::AggregationConfig;
use crate::histogram::DecayingHistogram;
use crate::models::{ResourceKind, UsageSample};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Aggregated usage state of one container
#[derive(Debug, Clone)]
pub struct AggregateContainerState {
    cpu_usage: DecayingHistogram,
    memory_peaks: DecayingHistogram,
    window: WindowTracker,
}

impl AggregateContainerState {
    pub fn new(config: &AggregationConfig) -> Self {
        Self {
            cpu_usage: DecayingHistogram::new(config.cpu_histogram_options(), config.half_life()),
            memory_peaks: DecayingHistogram::new(
                config.memory_histogram_options(),
                config.half_life(),
            ),
            window: WindowTracker::new(config.memory_aggregation_interval()),
        }
    }

    /// Aggregated CPU usage, everything observed so far
    pub fn cpu_usage(&self) -> &DecayingHistogram {
        &self.cpu_usage
    }

    /// Aggregated memory peaks from closed windows only
    pub fn memory_peaks(&self) -> &DecayingHistogram {
        &self.memory_peaks
    }

    /// The still-open memory window, if one exists
    pub fn open_window(&self) -> Option<&PeakWindow> {
        self.window.open_window()
    }

    /// Route one usage sample into the aggregation
    ///
    /// CPU samples go straight into the CPU histogram. Memory samples go
    /// through the window tracker; the peak histogram only changes when the
    /// observation closes a previous window. Returns the peak of a window
    /// this sample closed, if any.
    pub fn add_sample(&mut self, sample: &UsageSample) -> Option<ClosedPeak> {
        match sample.resource {
            ResourceKind::Cpu => {
                self.cpu_usage.add_sample(sample.amount, sample.measured_at);
                None
            }
            ResourceKind::Memory => {
                let closed = self.window.observe(sample.amount, sample.measured_at);
                if let Some(closed) = closed {
                    self.fold_closed_peak(closed);
                }
                closed
            }
        }
    }

    /// Close the open window if it has fully elapsed as of `now`, folding
    /// its peak into the peak histogram
    ///
    /// The checkpoint builder calls this with its reference time so peaks of
    /// windows that elapsed without a newer sample still become visible.
    /// Returns the folded peak, if any.
    pub fn close_expired_window(&mut self, now: DateTime<Utc>) -> Option<ClosedPeak> {
        let closed = self.window.close_expired(now);
        if let Some(closed) = closed {
            self.fold_closed_peak(closed);
        }
        closed
    }

    fn fold_closed_peak(&mut self, closed: ClosedPeak) {
        debug!(
            peak = closed.peak,
            closed_at = %closed.closed_at,
            "Aggregating closed memory window peak"
        );
        self.memory_peaks.add_sample(closed.peak, closed.closed_at);
    }

    /// Snapshot of the closed-window peaks
    ///
    /// The open window's maximum has, by construction, never been merged
    /// into the peak histogram, so the snapshot is simply a copy. Callers
    /// must not attempt to flush the open window into the returned copy.
    pub fn peaks_snapshot(&self) -> DecayingHistogram {
        self.memory_peaks.clone()
    }

    /// Snapshot of the CPU usage histogram
    pub fn cpu_snapshot(&self) -> DecayingHistogram {
        self.cpu_usage.clone()
    }

    /// Merge restored checkpoint histograms into this state
    ///
    /// Used on load: the window tracker stays unopened, live sampling
    /// continues on top of the merged history.
    pub fn merge_histograms(
        &mut self,
        cpu_usage: &DecayingHistogram,
        memory_peaks: &DecayingHistogram,
    ) -> Result<(), crate::errors::HistogramError> {
        self.cpu_usage.merge(cpu_usage)?;
        self.memory_peaks.merge(memory_peaks)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

    fn config() -> AggregationConfig {
        AggregationConfig::default()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn memory_sample(secs: i64, amount: f64) -> UsageSample {
        UsageSample::new(at(secs), amount, ResourceKind::Memory)
    }

    #[test]
    fn test_cpu_sample_goes_straight_into_histogram() {
        let mut state = AggregateContainerState::new(&config());
        state.add_sample(&UsageSample::new(at(100), 3.14, ResourceKind::Cpu));
        assert!(!state.cpu_usage().is_empty());
        assert!(state.memory_peaks().is_empty());
    }

    #[test]
    fn test_memory_sample_stays_in_open_window() {
        let mut state = AggregateContainerState::new(&config());
        state.add_sample(&memory_sample(100, GIB));
        assert!(state.memory_peaks().is_empty());
        assert_eq!(state.open_window().unwrap().peak, GIB);
    }

    #[test]
    fn test_window_peak_is_monotonic_maximum() {
        let interval = config().memory_aggregation_interval();
        let mut state = AggregateContainerState::new(&config());
        state.add_sample(&memory_sample(100, 2.0 * GIB));
        state.add_sample(&memory_sample(200, 1.0 * GIB));
        state.add_sample(&memory_sample(300, 3.0 * GIB));
        // Closing the window aggregates the 3 GiB peak.
        state.close_expired_window(at(100) + interval);
        assert!(state.open_window().is_none());
        let peak = state.memory_peaks().percentile(1.0).unwrap();
        assert!(peak >= 3.0 * GIB);
    }

    #[test]
    fn test_close_expired_window_is_idempotent() {
        let interval = config().memory_aggregation_interval();
        let mut state = AggregateContainerState::new(&config());
        state.add_sample(&memory_sample(100, GIB));
        state.close_expired_window(at(100) + interval);
        let weight = state.memory_peaks().total_weight();
        state.close_expired_window(at(100) + interval);
        assert_eq!(state.memory_peaks().total_weight(), weight);
    }
}
