//! Host heartbeat throttle

use std::time::Duration;
use tokio::time::Instant;

/// Limits host time-update pushes to one per interval
///
/// Edge events (play, pause, seeked) bypass the limit through
/// [`HeartbeatThrottle::force`], which also restarts the interval. Once
/// stopped, nothing is ever allowed again.
#[derive(Debug, Clone)]
pub struct HeartbeatThrottle {
    interval: Duration,
    last_push: Option<Instant>,
    stopped: bool,
}

impl HeartbeatThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_push: None,
            stopped: false,
        }
    }

    /// A time update arrived; returns whether it should be pushed
    pub fn on_time_update(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        let now = Instant::now();
        let due = self
            .last_push
            .map(|last| now.duration_since(last) >= self.interval)
            .unwrap_or(true);
        if due {
            self.last_push = Some(now);
        }
        due
    }

    /// Record an immediate push; returns `false` once stopped
    pub fn force(&mut self) -> bool {
        if self.stopped {
            return false;
        }
        self.last_push = Some(Instant::now());
        true
    }

    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}
