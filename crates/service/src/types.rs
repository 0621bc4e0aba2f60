//! Request/response types at the service boundary

use chrono::{DateTime, Utc};
use kycaml_core::{
    CascadeStatus, DocumentType, NewSubmission, RiskLevel, SubjectId, Submission, SubmissionId,
    SubmissionState,
};
use kycaml_health::{DependencySnapshot, DependencyStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub subject_id: SubjectId,
    pub document_type: DocumentType,
    pub document_reference: String,
    #[serde(default)]
    pub jurisdiction: Option<String>,
}

impl SubmitRequest {
    pub fn new(
        subject_id: impl Into<SubjectId>,
        document_type: DocumentType,
        document_reference: impl Into<String>,
    ) -> Self {
        Self {
            subject_id: subject_id.into(),
            document_type,
            document_reference: document_reference.into(),
            jurisdiction: None,
        }
    }

    pub fn with_jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = Some(jurisdiction.into());
        self
    }

    pub(crate) fn into_new_submission(self) -> NewSubmission {
        let new = NewSubmission::new(self.subject_id, self.document_type, self.document_reference);
        match self.jurisdiction {
            Some(jurisdiction) => new.with_jurisdiction(jurisdiction),
            None => new,
        }
    }
}

/// Outcome of `submit`, `review` and `reject`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub submission_id: SubmissionId,
    pub subject_id: SubjectId,
    pub state: SubmissionState,
    pub risk_score: Option<u32>,
    pub risk_level: Option<RiskLevel>,
    pub reasons: Vec<String>,
}

impl SubmitResponse {
    pub fn new(sub: Submission, risk_level: Option<RiskLevel>) -> Self {
        Self {
            risk_level,
            submission_id: sub.submission_id,
            subject_id: sub.subject_id,
            state: sub.state,
            risk_score: sub.risk_score,
            reasons: sub.reasons,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectRequest {
    pub subject_id: SubjectId,
    pub reason: String,
}

impl RejectRequest {
    pub fn new(subject_id: impl Into<SubjectId>, reason: impl Into<String>) -> Self {
        Self {
            subject_id: subject_id.into(),
            reason: reason.into(),
        }
    }
}

/// Local status as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocalState {
    NotSubmitted,
    Submitted,
    UnderReview,
    Verified,
    Rejected,
}

impl From<SubmissionState> for LocalState {
    fn from(state: SubmissionState) -> Self {
        match state {
            SubmissionState::Submitted => LocalState::Submitted,
            SubmissionState::UnderReview => LocalState::UnderReview,
            SubmissionState::Verified => LocalState::Verified,
            SubmissionState::Rejected => LocalState::Rejected,
        }
    }
}

/// Merged local and upstream view of a subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub subject_id: SubjectId,
    pub local_state: LocalState,
    /// Submission that `local_state` describes
    pub submission_id: Option<SubmissionId>,
    /// Cascade of the latest terminal submission
    pub cascade_status: Option<CascadeStatus>,
    pub last_verified_at: Option<DateTime<Utc>>,
    /// Local decision not reflected upstream and no longer being retried
    pub divergence: bool,
    /// State of a newer submission still in progress
    pub pending_state: Option<SubmissionState>,
    pub pending_submission_id: Option<SubmissionId>,
    /// Display only, from the identity read cache
    pub upstream_kyc_status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmlStatus {
    Cleared,
    Flagged,
    NotChecked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmlSnapshot {
    pub subject_id: SubjectId,
    pub aml_status: AmlStatus,
    pub risk_score: Option<u32>,
    pub risk_level: Option<RiskLevel>,
    pub reasons: Vec<String>,
    pub checked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallHealth {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: OverallHealth,
    pub service: DependencyStatus,
    pub identity: DependencyStatus,
    pub transaction_monitoring: DependencyStatus,
    pub failed_permanent_tasks: usize,
    pub dependencies: Vec<DependencySnapshot>,
}
