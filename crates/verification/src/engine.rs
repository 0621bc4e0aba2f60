//! Verification Engine - risk scoring orchestrator

use std::sync::Arc;

use kycaml_core::{KycError, KycResult, Submission};
use kycaml_store::SubmissionStore;

use crate::config::VerificationConfig;
use crate::decision::{reason, Decision};
use crate::monitor::{MonitorError, TransactionMonitor};

/// Upper bound of the risk scale
const MAX_RISK: u32 = 100;

/// Dependency name reported when monitoring is unavailable
pub const TRANSACTION_MONITORING: &str = "transaction-monitoring";

/// Main Verification Engine
///
/// Combines static rules with the transaction-monitoring anomaly score.
/// Reads the store for velocity only.
pub struct VerificationEngine {
    config: VerificationConfig,
    store: Arc<dyn SubmissionStore>,
    monitor: Arc<dyn TransactionMonitor>,
}

impl VerificationEngine {
    pub fn new(
        config: VerificationConfig,
        store: Arc<dyn SubmissionStore>,
        monitor: Arc<dyn TransactionMonitor>,
    ) -> Self {
        Self {
            config,
            store,
            monitor,
        }
    }

    /// Evaluate a submission.
    ///
    /// Fails with `DependencyUnavailable` when the monitoring collaborator
    /// cannot answer; no decision is forced in that case.
    pub async fn evaluate(&self, submission: &Submission) -> KycResult<Decision> {
        let mut score = self.config.document_weight(submission.document_type);
        let mut reasons = Vec::new();

        // Rule: submission velocity
        let others = self.recent_submissions(submission)?;
        if others > 0 {
            score = score.saturating_add(others.saturating_mul(self.config.velocity_weight));
            reasons.push(reason::HIGH_VELOCITY.to_string());
        }

        // Rule: disallowed jurisdiction
        if let Some(jurisdiction) = &submission.jurisdiction {
            if self.config.is_disallowed(jurisdiction) {
                score = score.saturating_add(self.config.jurisdiction_weight);
                reasons.push(reason::DISALLOWED_JURISDICTION.to_string());
            }
        }

        // Rule: recent transaction anomalies
        let anomaly = self.fetch_anomaly(submission).await?;
        let contribution = (anomaly.clamp(0.0, MAX_RISK as f64) * self.config.anomaly_weight).round() as u32;
        if contribution > 0 {
            score = score.saturating_add(contribution);
            reasons.push(reason::TRANSACTION_ANOMALY.to_string());
        }

        let decision = Decision::from_score(
            score.min(MAX_RISK),
            reasons,
            self.config.threshold_verify,
            self.config.threshold_reject,
        );

        tracing::info!(
            subject_id = %submission.subject_id,
            submission_id = %submission.submission_id,
            risk_score = decision.risk_score,
            outcome = ?decision.outcome,
            reasons = ?decision.reasons,
            "Submission evaluated"
        );
        Ok(decision)
    }

    pub fn config(&self) -> &VerificationConfig {
        &self.config
    }

    /// Count the subject's other submissions inside the velocity window
    fn recent_submissions(&self, submission: &Submission) -> KycResult<u32> {
        let since = submission.submitted_at - self.config.velocity_window();
        let count = self
            .store
            .list_by_subject(&submission.subject_id)?
            .iter()
            .filter(|s| s.submission_id != submission.submission_id)
            .filter(|s| s.submitted_at >= since && s.submitted_at <= submission.submitted_at)
            .count();
        Ok(count as u32)
    }

    async fn fetch_anomaly(&self, submission: &Submission) -> KycResult<f64> {
        let timeout = self.config.monitor_timeout();
        let result = tokio::time::timeout(timeout, self.monitor.recent_risk(&submission.subject_id))
            .await
            .unwrap_or(Err(MonitorError::Timeout(self.config.monitor_timeout_ms)));

        result.map_err(|e| {
            tracing::warn!(
                subject_id = %submission.subject_id,
                submission_id = %submission.submission_id,
                error = %e,
                "Transaction monitoring unavailable, leaving submission under review"
            );
            KycError::dependency_unavailable(TRANSACTION_MONITORING, e.to_string())
        })
    }
}
