//! Transaction-monitoring collaborator interface

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use kycaml_core::SubjectId;
use thiserror::Error;

/// Errors from the transaction-monitoring collaborator
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Transaction monitoring unreachable: {0}")]
    Unreachable(String),

    #[error("Transaction monitoring timeout after {0}ms")]
    Timeout(u64),

    #[error("Invalid transaction monitoring response: {0}")]
    InvalidResponse(String),
}

/// Source of recent-activity anomaly scores (0-100)
#[async_trait]
pub trait TransactionMonitor: Send + Sync {
    async fn recent_risk(&self, subject_id: &SubjectId) -> Result<f64, MonitorError>;
}

/// In-process monitor with fixed scores
///
/// Useful for tests and local runs without the collaborator.
#[derive(Debug, Default)]
pub struct StaticMonitor {
    scores: RwLock<HashMap<SubjectId, f64>>,
    unavailable: AtomicBool,
}

impl StaticMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_score(&self, subject_id: impl Into<SubjectId>, score: f64) {
        if let Ok(mut scores) = self.scores.write() {
            scores.insert(subject_id.into(), score);
        }
    }

    /// Simulate the collaborator being unreachable
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransactionMonitor for StaticMonitor {
    async fn recent_risk(&self, subject_id: &SubjectId) -> Result<f64, MonitorError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(MonitorError::Unreachable("connection refused".to_string()));
        }
        let scores = self
            .scores
            .read()
            .map_err(|_| MonitorError::Unreachable("score table poisoned".to_string()))?;
        Ok(scores.get(subject_id).copied().unwrap_or(0.0))
    }
}
