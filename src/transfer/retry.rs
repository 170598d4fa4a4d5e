//! Retry Scheduler
//!
//! Exponential backoff with a capped interval and a fixed attempt ceiling.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Delay before the first retry
    pub base_delay_ms: u64,
    /// Upper bound for a single delay
    pub max_delay_ms: u64,
    /// Retries allowed on one state before the entity is failed
    pub max_attempts: u32,
    /// Add up to 25% random delay to spread workers apart
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            max_attempts: 10,
            jitter: false,
        }
    }
}

/// Computes when a failed action becomes eligible again
#[derive(Debug, Clone)]
pub struct RetryScheduler {
    config: RetryConfig,
}

impl RetryScheduler {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    #[inline]
    pub fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Deterministic delay for the given retry count
    ///
    /// `0` for a fresh state, then `base * 2^(n-1)` capped at `max_delay_ms`.
    pub fn backoff(&self, retry_count: u32) -> Duration {
        if retry_count == 0 {
            return Duration::ZERO;
        }
        let factor = 1u64.checked_shl(retry_count - 1).unwrap_or(u64::MAX);
        let delay = self
            .config
            .base_delay_ms
            .saturating_mul(factor)
            .min(self.config.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Absolute time of the next attempt after one made at `attempted_at`,
    /// jittered if configured
    pub fn next_attempt_at(&self, attempted_at: i64, retry_count: u32) -> i64 {
        let mut delay = self.backoff(retry_count).as_millis() as i64;
        if self.config.jitter && delay > 0 {
            let spread = (delay / 4).max(1);
            delay += rand::thread_rng().gen_range(0..=spread);
        }
        attempted_at.saturating_add(delay)
    }

    /// True once `retry_count` exceeds the ceiling
    #[inline]
    pub fn is_exhausted(&self, retry_count: u32) -> bool {
        retry_count > self.config.max_attempts
    }
}

impl Default for RetryScheduler {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
