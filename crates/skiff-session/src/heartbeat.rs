//! Keepalive pacing.

use std::time::Duration;

use tokio::time::Instant;

/// Decides, on each idle tick, whether a keepalive is due.
#[derive(Debug, Clone)]
pub struct Heartbeat {
    interval: Duration,
    last: Instant,
}

impl Heartbeat {
    pub fn new(interval: Duration) -> Self {
        Self::starting_at(interval, Instant::now())
    }

    pub fn starting_at(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            last: start,
        }
    }

    /// `true` at most once per interval. A `true` resets the window.
    pub fn poll(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last) < self.interval {
            return false;
        }
        self.last = now;
        true
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}
