//! Liveness probes

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;

/// External collaborators the service depends on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum Collaborator {
    Identity,
    TransactionMonitoring,
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Probe timed out after {0}ms")]
    Timeout(u64),

    #[error("Unreachable: {0}")]
    Unreachable(String),

    #[error("Unhealthy status {0}")]
    Unhealthy(u16),
}

/// Lightweight liveness check against one collaborator
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self) -> Result<(), ProbeError>;
}

/// Probe with a switchable result
#[derive(Debug)]
pub struct StaticProbe {
    up: AtomicBool,
}

impl Default for StaticProbe {
    fn default() -> Self {
        Self::new(true)
    }
}

impl StaticProbe {
    pub fn new(up: bool) -> Self {
        Self {
            up: AtomicBool::new(up),
        }
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }
}

#[async_trait]
impl Probe for StaticProbe {
    async fn probe(&self) -> Result<(), ProbeError> {
        if self.up.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProbeError::Unreachable("connection refused".to_string()))
        }
    }
}
