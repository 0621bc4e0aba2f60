//! KycService - the exposed operations

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kycaml_cascade::IdentityClient;
use kycaml_core::{
    CascadeTask, KycError, KycResult, SubjectId, Submission, SubmissionId, SubmissionState,
};
use kycaml_health::{Collaborator, DependencyMonitor, DependencyStatus};
use kycaml_store::SubmissionStore;
use kycaml_verification::VerificationEngine;
use tokio::sync::Notify;

use crate::cache::IdentityCache;
use crate::types::{
    AmlSnapshot, AmlStatus, HealthReport, LocalState, OverallHealth, RejectRequest, StatusReport,
    SubmitRequest, SubmitResponse,
};

/// Default TTL of the identity read cache
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Reason tag recorded on operator rejections
pub const OPERATOR_REJECTED: &str = "operator_rejected";

pub struct KycService {
    store: Arc<dyn SubmissionStore>,
    engine: Arc<VerificationEngine>,
    identity: Arc<dyn IdentityClient>,
    health: Arc<DependencyMonitor>,
    cache: IdentityCache,
    cascade_wakeup: Option<Arc<Notify>>,
}

impl KycService {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        engine: Arc<VerificationEngine>,
        identity: Arc<dyn IdentityClient>,
        health: Arc<DependencyMonitor>,
    ) -> Self {
        Self {
            store,
            engine,
            identity,
            health,
            cache: IdentityCache::new(DEFAULT_CACHE_TTL),
            cascade_wakeup: None,
        }
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache = IdentityCache::new(ttl);
        self
    }

    /// Wake the cascade scheduler whenever a task is enqueued
    pub fn with_cascade_wakeup(mut self, wakeup: Arc<Notify>) -> Self {
        self.cascade_wakeup = Some(wakeup);
        self
    }

    pub fn store(&self) -> &Arc<dyn SubmissionStore> {
        &self.store
    }

    /// Accept a submission and evaluate it.
    ///
    /// A transient evaluation failure is returned to the caller and leaves
    /// the submission `UNDER_REVIEW`; retry it with [`KycService::review`].
    pub async fn submit(&self, request: SubmitRequest) -> KycResult<SubmitResponse> {
        let submission = self.store.create(request.into_new_submission())?;
        tracing::info!(
            subject_id = %submission.subject_id,
            submission_id = %submission.submission_id,
            document_type = %submission.document_type,
            "Submission received"
        );

        let submission = self.store.transition(
            &submission.submission_id,
            SubmissionState::Submitted,
            SubmissionState::UnderReview,
            None,
            Vec::new(),
        )?;
        self.decide(submission).await
    }

    /// Re-evaluate a submission left `UNDER_REVIEW` by a dependency failure
    pub async fn review(&self, submission_id: &SubmissionId) -> KycResult<SubmitResponse> {
        let submission = self.store.get(submission_id)?;
        if submission.state != SubmissionState::UnderReview {
            return Err(KycError::invalid_transition(
                submission_id,
                submission.state,
                "REVIEW",
            ));
        }
        self.decide(submission).await
    }

    /// Operator rejection of the subject's active submission
    pub async fn reject(&self, request: RejectRequest) -> KycResult<SubmitResponse> {
        let active = self
            .store
            .active_submission(&request.subject_id)?
            .ok_or_else(|| {
                KycError::NotFound(format!("active submission for subject {}", request.subject_id))
            })?;

        if active.state == SubmissionState::Submitted {
            self.store.transition(
                &active.submission_id,
                SubmissionState::Submitted,
                SubmissionState::UnderReview,
                None,
                Vec::new(),
            )?;
        }

        let reasons = vec![OPERATOR_REJECTED.to_string(), request.reason.clone()];
        let rejected = self.store.transition(
            &active.submission_id,
            SubmissionState::UnderReview,
            SubmissionState::Rejected,
            None,
            reasons,
        )?;
        tracing::info!(
            subject_id = %rejected.subject_id,
            submission_id = %rejected.submission_id,
            reason = %request.reason,
            "Submission rejected by operator"
        );
        self.enqueued(&rejected.subject_id);
        Ok(self.respond(rejected))
    }

    /// Retry a `FAILED_PERMANENT` cascade after manual reconciliation
    pub fn requeue(&self, submission_id: &SubmissionId) -> KycResult<CascadeTask> {
        let task = self.store.requeue(submission_id, Utc::now())?;
        tracing::info!(
            subject_id = %task.subject_id,
            submission_id = %task.submission_id,
            "Cascade requeued"
        );
        self.enqueued(&task.subject_id);
        Ok(task)
    }

    pub async fn get_status(&self, subject_id: &SubjectId) -> KycResult<StatusReport> {
        let submissions = self.store.list_by_subject(subject_id)?;
        let latest_terminal = submissions.iter().rev().find(|s| s.is_terminal());
        let active = submissions.iter().find(|s| !s.is_terminal());
        let last_verified_at = submissions
            .iter()
            .rev()
            .find(|s| s.state == SubmissionState::Verified)
            .and_then(|s| s.decided_at);

        let mut report = StatusReport {
            subject_id: subject_id.clone(),
            local_state: LocalState::NotSubmitted,
            submission_id: None,
            cascade_status: None,
            last_verified_at,
            divergence: false,
            pending_state: None,
            pending_submission_id: None,
            upstream_kyc_status: None,
        };

        match (latest_terminal, active) {
            (Some(terminal), active) => {
                let task = self.store.task_for(&terminal.submission_id)?;
                report.local_state = terminal.state.into();
                report.submission_id = Some(terminal.submission_id.clone());
                report.cascade_status = Some(task.status);
                report.divergence = task.status == kycaml_core::CascadeStatus::FailedPermanent;
                report.pending_state = active.map(|s| s.state);
                report.pending_submission_id = active.map(|s| s.submission_id.clone());
            }
            (None, Some(active)) => {
                report.local_state = active.state.into();
                report.submission_id = Some(active.submission_id.clone());
                report.pending_state = Some(active.state);
                report.pending_submission_id = Some(active.submission_id.clone());
            }
            (None, None) => return Ok(report),
        }

        if report.divergence {
            tracing::warn!(
                subject_id = %subject_id,
                local_state = ?report.local_state,
                "Local decision diverges from identity record"
            );
        }

        report.upstream_kyc_status = self.cache.kyc_status(self.identity.as_ref(), subject_id).await;
        Ok(report)
    }

    /// Risk snapshot from the most recent evaluation
    pub fn check_aml(&self, subject_id: &SubjectId) -> KycResult<AmlSnapshot> {
        let evaluated = self
            .store
            .list_by_subject(subject_id)?
            .into_iter()
            .rev()
            .find(|s| s.is_terminal() && s.risk_score.is_some());

        Ok(match evaluated {
            Some(sub) => AmlSnapshot {
                subject_id: subject_id.clone(),
                aml_status: if sub.state == SubmissionState::Verified {
                    AmlStatus::Cleared
                } else {
                    AmlStatus::Flagged
                },
                risk_score: sub.risk_score,
                risk_level: sub.risk_score.map(|s| self.engine.config().risk_level(s)),
                reasons: sub.reasons,
                checked_at: sub.decided_at,
            },
            None => AmlSnapshot {
                subject_id: subject_id.clone(),
                aml_status: AmlStatus::NotChecked,
                risk_score: None,
                risk_level: None,
                reasons: Vec::new(),
                checked_at: None,
            },
        })
    }

    pub fn health(&self) -> KycResult<HealthReport> {
        let failed_permanent_tasks = self.store.count_failed_permanent()?;
        let identity = self.health.status(Collaborator::Identity);
        let transaction_monitoring = self.health.status(Collaborator::TransactionMonitoring);

        let healthy = identity == DependencyStatus::Up
            && transaction_monitoring == DependencyStatus::Up
            && failed_permanent_tasks == 0;

        Ok(HealthReport {
            status: if healthy {
                OverallHealth::Healthy
            } else {
                OverallHealth::Degraded
            },
            service: DependencyStatus::Up,
            identity,
            transaction_monitoring,
            failed_permanent_tasks,
            dependencies: self.health.snapshot(),
        })
    }

    async fn decide(&self, submission: Submission) -> KycResult<SubmitResponse> {
        let decision = self.engine.evaluate(&submission).await?;
        let decided = self.store.transition(
            &submission.submission_id,
            SubmissionState::UnderReview,
            decision.outcome.to_state(),
            Some(decision.risk_score),
            decision.reasons,
        )?;
        tracing::info!(
            subject_id = %decided.subject_id,
            submission_id = %decided.submission_id,
            state = %decided.state,
            risk_score = decision.risk_score,
            "Submission decided"
        );
        self.enqueued(&decided.subject_id);
        Ok(self.respond(decided))
    }

    fn respond(&self, submission: Submission) -> SubmitResponse {
        let config = self.engine.config();
        let risk_level = submission.risk_score.map(|s| config.risk_level(s));
        SubmitResponse::new(submission, risk_level)
    }

    fn enqueued(&self, subject_id: &SubjectId) {
        self.cache.invalidate(subject_id);
        if let Some(wakeup) = &self.cascade_wakeup {
            wakeup.notify_one();
        }
    }
}
