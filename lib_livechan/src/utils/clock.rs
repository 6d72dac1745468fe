use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tokio::time::Instant;

/// Wall-clock time derived from a fixed anchor plus tokio's monotonic clock.
///
/// Due estimates are stored as UTC timestamps because they are compared with
/// post publication times, but the poller sleeps on tokio timers. Deriving
/// "now" from the same monotonic source keeps both views consistent and immune
/// to wall-clock jumps.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    wall: DateTime<Utc>,
    mono: Instant,
}

impl Clock {
    pub fn new() -> Self {
        Self {
            wall: Utc::now(),
            mono: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = TimeDelta::from_std(self.mono.elapsed()).unwrap_or_else(|_| TimeDelta::zero());
        self.wall + elapsed
    }

    /// Time left until `at`, zero if it already passed.
    pub fn until(&self, at: DateTime<Utc>) -> Duration {
        (at - self.now()).to_std().unwrap_or(Duration::ZERO)
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
