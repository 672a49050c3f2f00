use std::time::Duration;

use chrono::{DateTime, Utc};

use auditscope_types::{Quota, RateLimitStatus};

/// Quota assumed before the first response arrives
const DEFAULT_LIMIT: u32 = 60;

/// Tracks the remote quota and turns it into a poll delay
#[derive(Clone, Debug)]
pub struct RateLimiter {
    limit: u32,
    remaining: u32,
    reset_at: DateTime<Utc>,
}

impl RateLimiter {
    /// Create a limiter with an optimistic quota whose reset lies in the past
    pub fn new() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            remaining: DEFAULT_LIMIT,
            reset_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// Overwrite every field present in `quota`, keep the rest
    pub fn update(&mut self, quota: &Quota) {
        if let Some(limit) = quota.limit {
            self.limit = limit;
        }
        if let Some(remaining) = quota.remaining {
            self.remaining = remaining;
        }
        if let Some(reset_at) = quota.reset_at {
            self.reset_at = reset_at;
        }
    }

    /// Delay before the next fetch, never shorter than `min_interval`
    pub fn delay(&self, min_interval: Duration) -> Duration {
        self.delay_at(min_interval, Utc::now())
    }

    /// Same as [`RateLimiter::delay`] with an explicit clock
    pub fn delay_at(&self, min_interval: Duration, now: DateTime<Utc>) -> Duration {
        // A reset time that is not in the future must never stretch the wait.
        if self.remaining <= 1 && self.reset_at > now {
            let until_reset = (self.reset_at - now).to_std().unwrap_or_default();
            return until_reset.max(min_interval);
        }
        min_interval
    }

    pub fn status(&self) -> RateLimitStatus {
        RateLimitStatus {
            limit: self.limit,
            remaining: self.remaining,
            reset_at: self.reset_at,
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
