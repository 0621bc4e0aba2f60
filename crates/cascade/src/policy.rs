//! Retry policy: capped exponential backoff with equal jitter

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Delay before the first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Attempts before a task is given up as FAILED_PERMANENT
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Share of each delay that is randomised (0.0 - 1.0)
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    5 * 60 * 1_000
}

fn default_max_attempts() -> u32 {
    8
}

fn default_jitter_ratio() -> f64 {
    0.5
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            jitter_ratio: default_jitter_ratio(),
        }
    }
}

impl RetryPolicy {
    /// Un-jittered delay after `attempt` failed attempts (1-based)
    pub fn exponential_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    /// Delay after `attempt` failed attempts, with jitter applied.
    ///
    /// The fixed part is `(1 - jitter_ratio)` of the exponential delay; the
    /// rest is drawn uniformly.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let delay = self.exponential_delay(attempt).as_millis() as u64;
        let ratio = self.jitter_ratio.clamp(0.0, 1.0);
        let jitter_span = (delay as f64 * ratio).round() as u64;
        if jitter_span == 0 {
            return Duration::from_millis(delay);
        }
        let fixed = delay - jitter_span;
        let jitter = rand::thread_rng().gen_range(0..=jitter_span);
        Duration::from_millis(fixed + jitter)
    }

    /// Whether another attempt is allowed after `attempts` made so far
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}
