//! Bounded exponential backoff with deterministic jitter.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Backoff constants. Every field is configuration; nothing is hard-wired.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum consecutive retries before giving up (not counting the first try).
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound on any single delay, in milliseconds.
    pub max_backoff_ms: u64,
    /// Growth factor between consecutive delays.
    pub multiplier: f64,
    /// Spread delays by up to `±jitter_fraction * delay` (0.0 = none).
    pub jitter_fraction: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 10,
            initial_backoff_ms: 500,
            max_backoff_ms: 60_000,
            multiplier: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

/// Stateless retry policy: computes the delay for a given attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay before the `attempt`-th retry (1-based), or `None` once retries are spent.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        let base_ms = self.config.initial_backoff_ms as f64
            * self.config.multiplier.powi((attempt - 1) as i32);
        let capped = base_ms.min(self.config.max_backoff_ms as f64);

        // Same attempt number always yields the same offset.
        let spread = ((attempt.wrapping_mul(2_654_435_761) >> 16) % 201) as f64 / 100.0 - 1.0;
        let jittered = capped * (1.0 + self.config.jitter_fraction * spread);
        let total_ms = jittered.clamp(0.0, self.config.max_backoff_ms as f64) as u64;

        Some(Duration::from_millis(total_ms))
    }
}
