use chrono::{DateTime, Duration, Utc};
use tracing::debug;

/// Caps the number of replies sent per hour.
///
/// The window restarts once more than an hour has passed since it began.
/// Callers check [`RateLimiter::should_respond`] before each reply and call
/// [`RateLimiter::record_response`] after it.
#[derive(Debug)]
pub struct RateLimiter {
    max_per_window: u32,
    window: Duration,
    count: u32,
    window_start: DateTime<Utc>,
}

impl RateLimiter {
    pub fn new(max_per_hour: u32, now: DateTime<Utc>) -> Self {
        Self {
            max_per_window: max_per_hour,
            window: Duration::hours(1),
            count: 0,
            window_start: now,
        }
    }

    pub fn should_respond(&mut self, now: DateTime<Utc>) -> bool {
        if now - self.window_start > self.window {
            debug!(
                "Rate window expired after {count} responses, resetting",
                count = self.count
            );
            self.count = 0;
            self.window_start = now;
        }

        self.count < self.max_per_window
    }

    pub fn record_response(&mut self) {
        self.count = self.count.saturating_add(1);
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn remaining(&self) -> u32 {
        self.max_per_window.saturating_sub(self.count)
    }
}
