//! Throughput sampling and display derivations.

use std::time::{Duration, Instant};

/// Minimum spacing between progress events.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Turns periodic reads of a cumulative byte counter into instantaneous speed.
#[derive(Debug)]
pub struct SpeedSampler {
    interval: Duration,
    last_at: Instant,
    last_bytes: u64,
}

impl SpeedSampler {
    pub fn new(bytes: u64) -> Self {
        Self::with_interval(bytes, PROGRESS_INTERVAL)
    }

    pub fn with_interval(bytes: u64, interval: Duration) -> Self {
        Self { interval, last_at: Instant::now(), last_bytes: bytes }
    }

    /// Returns bytes/second since the previous sample once `interval` has
    /// elapsed, `None` before that.
    pub fn sample(&mut self, bytes: u64) -> Option<f64> {
        self.sample_at(bytes, Instant::now())
    }

    fn sample_at(&mut self, bytes: u64, now: Instant) -> Option<f64> {
        let elapsed = now.saturating_duration_since(self.last_at);
        if elapsed < self.interval {
            return None;
        }
        let secs = elapsed.as_secs_f64();
        let speed = if secs > 0.0 {
            bytes.saturating_sub(self.last_bytes) as f64 / secs
        } else {
            0.0
        };
        self.last_at = now;
        self.last_bytes = bytes;
        Some(speed)
    }
}

/// Percent complete, 0 when the size is unknown.
pub fn progress_percent(downloaded: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    downloaded as f64 / total as f64 * 100.0
}

/// Time left at `speed` bytes/second, `None` when it cannot be estimated.
pub fn eta(downloaded: u64, total: u64, speed: f64) -> Option<Duration> {
    if speed <= 0.0 || !speed.is_finite() {
        return None;
    }
    let remaining = total.saturating_sub(downloaded) as f64;
    Some(Duration::from_secs_f64(remaining / speed))
}
