//! Cascade configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::policy::RetryPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeConfig {
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Scheduler tick when nothing wakes it earlier
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-attempt timeout on the identity update call
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,

    /// Grace period past the attempt timeout before an `IN_FLIGHT` task is
    /// presumed abandoned and released back to `PENDING`
    #[serde(default = "default_lease_margin_ms")]
    pub lease_margin_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_attempt_timeout_ms() -> u64 {
    5_000
}

fn default_lease_margin_ms() -> u64 {
    30_000
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll_interval_ms: default_poll_interval_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            lease_margin_ms: default_lease_margin_ms(),
        }
    }
}

impl CascadeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    /// How long an attempt may stay `IN_FLIGHT` before another pass reclaims it
    pub fn attempt_lease(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms.saturating_add(self.lease_margin_ms))
    }
}
