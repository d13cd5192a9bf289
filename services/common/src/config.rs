//! Shared configuration primitives

use crate::constants::{
    DEFAULT_BACKOFF_BASE_MS, DEFAULT_BACKOFF_MAX_MS, DEFAULT_BUS_CAPACITY,
    DEFAULT_MAX_RECONNECT_ATTEMPTS,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reconnect backoff policy
///
/// Delays start at `base_delay_ms`, double on every failed attempt and are
/// capped at `max_delay_ms`. After `max_attempts` consecutive failures the
/// connection is given up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffPolicy {
    /// First retry delay in milliseconds
    pub base_delay_ms: u64,
    /// Delay cap in milliseconds
    pub max_delay_ms: u64,
    /// Consecutive failures tolerated before stopping
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// Delay applied before retry number `attempt` (1-based)
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(63);
        let factor = 1u64.checked_shl(exponent).unwrap_or(u64::MAX);
        let delay = self.base_delay_ms.saturating_mul(factor);
        Duration::from_millis(delay.min(self.max_delay_ms.max(self.base_delay_ms)))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BACKOFF_BASE_MS,
            max_delay_ms: DEFAULT_BACKOFF_MAX_MS,
            max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
        }
    }
}

/// Tick bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TickBusConfig {
    /// Channel capacity per topic or pattern
    pub capacity: usize,
}

impl Default for TickBusConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_BUS_CAPACITY,
        }
    }
}
