//! Memory peak aggregation windows
//!
//! Memory usage cannot be usefully point-sampled: a transient drop inside a
//! window does not mean the container needs less memory. Only the maximum
//! observation within a bounded interval is a meaningful signal, and only a
//! closed, complete window's peak is trustworthy. The tracker keeps the
//! single running maximum of the open window and reports a peak exactly once,
//! when its window has elapsed.

use chrono::{DateTime, Duration, Utc};

/// The open aggregation window of one container
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PeakWindow {
    /// Start of the window, aligned down to an epoch multiple of the interval
    pub start: DateTime<Utc>,
    /// Maximum memory amount observed so far within the window
    pub peak: f64,
}

/// A completed window's peak, ready for permanent aggregation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClosedPeak {
    /// Peak memory amount over the whole window
    pub peak: f64,
    /// End boundary of the window; the timestamp the peak is aggregated at
    pub closed_at: DateTime<Utc>,
}

/// Tracks the open memory window of one container
///
/// Window boundaries are anchored to the Unix epoch: every window starts at
/// a multiple of the aggregation interval, so all containers share the same
/// boundaries and a process restart does not shift them.
#[derive(Debug, Clone)]
pub struct WindowTracker {
    interval: Duration,
    window: Option<PeakWindow>,
}

impl WindowTracker {
    /// A zero or negative interval would break epoch alignment, so it is
    /// clamped to one second instead of being carried into the arithmetic.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::seconds(1)),
            window: None,
        }
    }

    /// The currently open window, if any
    pub fn open_window(&self) -> Option<&PeakWindow> {
        self.window.as_ref()
    }

    /// Record a memory observation
    ///
    /// Returns the previous window's peak when `time` falls past the open
    /// window's end boundary; the caller folds it into the peak histogram.
    pub fn observe(&mut self, amount: f64, time: DateTime<Utc>) -> Option<ClosedPeak> {
        let closed = self.close_expired(time);
        match &mut self.window {
            Some(window) => {
                window.peak = window.peak.max(amount);
            }
            None => {
                self.window = Some(PeakWindow {
                    start: self.align_down(time),
                    peak: amount,
                });
            }
        }
        closed
    }

    /// Close the open window if it has fully elapsed as of `now`
    ///
    /// Returns the peak to aggregate, stamped with the window's end boundary
    /// so decay is well-defined regardless of when closure is detected.
    pub fn close_expired(&mut self, now: DateTime<Utc>) -> Option<ClosedPeak> {
        let window = self.window?;
        let end = window.start + self.interval;
        if now < end {
            return None;
        }
        self.window = None;
        Some(ClosedPeak {
            peak: window.peak,
            closed_at: end,
        })
    }

    fn align_down(&self, time: DateTime<Utc>) -> DateTime<Utc> {
        let interval_secs = self.interval.num_seconds();
        let aligned = time.timestamp() - time.timestamp().rem_euclid(interval_secs);
        DateTime::<Utc>::UNIX_EPOCH + Duration::seconds(aligned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn tracker() -> WindowTracker {
        WindowTracker::new(Duration::seconds(100))
    }

    #[test]
    fn test_first_observation_opens_aligned_window() {
        let mut tracker = tracker();
        assert!(tracker.observe(5.0, at(130)).is_none());
        let window = tracker.open_window().unwrap();
        assert_eq!(window.start, at(100));
        assert_eq!(window.peak, 5.0);
    }

    #[test]
    fn test_peak_is_running_maximum() {
        let mut tracker = tracker();
        tracker.observe(2.0, at(110));
        tracker.observe(1.0, at(120));
        tracker.observe(3.0, at(130));
        assert_eq!(tracker.open_window().unwrap().peak, 3.0);
    }

    #[test]
    fn test_observation_past_boundary_closes_window() {
        let mut tracker = tracker();
        tracker.observe(7.0, at(150));
        let closed = tracker.observe(2.0, at(210)).unwrap();
        assert_eq!(closed.peak, 7.0);
        assert_eq!(closed.closed_at, at(200));
        let window = tracker.open_window().unwrap();
        assert_eq!(window.start, at(200));
        assert_eq!(window.peak, 2.0);
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let mut tracker = WindowTracker::new(Duration::zero());
        assert!(tracker.observe(5.0, at(130)).is_none());
        let closed = tracker.observe(2.0, at(131)).unwrap();
        assert_eq!(closed.peak, 5.0);
        assert_eq!(closed.closed_at, at(131));
    }

    #[test]
    fn test_close_expired_without_new_sample() {
        let mut tracker = tracker();
        tracker.observe(7.0, at(150));
        assert!(tracker.close_expired(at(199)).is_none());
        let closed = tracker.close_expired(at(200)).unwrap();
        assert_eq!(closed.peak, 7.0);
        assert!(tracker.open_window().is_none());
        // Idempotent once closed.
        assert!(tracker.close_expired(at(300)).is_none());
    }
}
