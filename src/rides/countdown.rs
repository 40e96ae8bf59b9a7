//! Client-side countdown for a pending ride request.
//!
//! Purely informational: reaching zero never changes the ride status, only
//! the server declares a request expired.

use chrono::{DateTime, Utc};
use std::time::Duration;

pub const DEFAULT_REQUEST_WINDOW: Duration = Duration::from_secs(45);

/// Whole seconds left in `window` counted from `started`, clamped at zero.
pub fn seconds_left(started: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> u64 {
    let elapsed = (now - started).num_seconds().max(0) as u64;
    window.as_secs().saturating_sub(elapsed)
}

/// A self-initiated request awaiting a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingRequest {
    pub started_at: DateTime<Utc>,
    pub window: Duration,
}

impl PendingRequest {
    pub fn new(started_at: DateTime<Utc>, window: Duration) -> Self {
        Self { started_at, window }
    }

    pub fn seconds_left(&self, now: DateTime<Utc>) -> u64 {
        seconds_left(self.started_at, now, self.window)
    }

    pub fn is_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.seconds_left(now) == 0
    }
}
