//! Reconnect backoff state

use services_common::BackoffPolicy;
use std::time::Duration;

/// Consecutive-failure counter over a [`BackoffPolicy`]
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    /// Start with no failures recorded
    #[must_use]
    pub const fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Record a failure and return the delay before the next attempt
    ///
    /// `None` once `max_attempts` retries have been spent.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.policy.max_attempts {
            return None;
        }
        self.attempt += 1;
        Some(self.policy.delay_for(self.attempt))
    }

    /// Forget failures after a successful connection
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Retries spent since the last reset
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempt
    }
}
