//! Wall-clock measurement around a unit of work.
//!
//! All timings are taken from the calling process's monotonic clock. Wall-clock timestamps are only
//! attached for reporting and never used to compute durations.

use std::future::Future;
use std::time::{Duration, Instant, SystemTime};

/// A monotonic reference point paired with a wall-clock timestamp.
#[derive(Clone, Copy, Debug)]
pub struct Mark {
    instant: Instant,
    at: SystemTime,
}

impl Mark {
    /// Records the current point in time.
    pub fn now() -> Self {
        Self {
            instant: Instant::now(),
            at: SystemTime::now(),
        }
    }

    /// The wall-clock time at which this mark was taken.
    pub fn at(&self) -> SystemTime {
        self.at
    }

    /// Time elapsed since this mark, never negative.
    pub fn elapsed(&self) -> Duration {
        self.instant.elapsed()
    }

    /// Duration between this mark and a later one, saturating at zero.
    pub fn until(&self, later: &Mark) -> Duration {
        later.instant.saturating_duration_since(self.instant)
    }
}

/// Runs `fut` to completion and returns its output along with the time it took.
pub async fn timed<F: Future>(fut: F) -> (F::Output, Duration) {
    let start = Instant::now();
    let output = fut.await;
    (output, start.elapsed())
}

/// Converts a duration into fractional milliseconds.
///
/// Goes through whole nanoseconds so that exact millisecond values stay exact.
pub fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

/// Rounds a duration to the nearest 0.01ms, the precision used for reporting.
pub fn round_millis(duration: Duration) -> f64 {
    (as_millis_f64(duration) * 100.0).round() / 100.0
}
