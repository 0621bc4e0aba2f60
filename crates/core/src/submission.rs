//! Compliance submissions and their state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use strum_macros::{Display, EnumString};

use crate::error::{KycError, KycResult};

/// Reference to the external identity record a decision concerns
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(String);

impl SubjectId {
    pub fn new(id: impl Into<String>) -> Self {
        SubjectId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubjectId {
    fn from(id: &str) -> Self {
        SubjectId::new(id)
    }
}

impl From<String> for SubjectId {
    fn from(id: String) -> Self {
        SubjectId(id)
    }
}

impl From<u64> for SubjectId {
    fn from(id: u64) -> Self {
        SubjectId(id.to_string())
    }
}

/// Opaque submission identifier (UUID v4)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionId(String);

impl SubmissionId {
    pub fn generate() -> Self {
        SubmissionId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SubmissionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SubmissionId {
    fn from(id: &str) -> Self {
        SubmissionId(id.to_string())
    }
}

impl From<String> for SubmissionId {
    fn from(id: String) -> Self {
        SubmissionId(id)
    }
}

/// Kind of document under review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DocumentType {
    Passport,
    NationalId,
    DriversLicense,
    ResidencePermit,
    UtilityBill,
    Other,
}

/// Submission lifecycle state
///
/// `SUBMITTED → UNDER_REVIEW → {VERIFIED, REJECTED}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum SubmissionState {
    Submitted,
    UnderReview,
    Verified,
    Rejected,
}

impl SubmissionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SubmissionState::Verified | SubmissionState::Rejected)
    }

    /// Check whether `next` is directly reachable from `self`
    pub fn can_transition_to(self, next: SubmissionState) -> bool {
        use SubmissionState::*;
        matches!(
            (self, next),
            (Submitted, UnderReview) | (UnderReview, Verified) | (UnderReview, Rejected)
        )
    }
}

/// Input for creating a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSubmission {
    pub subject_id: SubjectId,
    pub document_type: DocumentType,
    pub document_reference: String,
    /// ISO country code of the issuing authority, if known
    pub jurisdiction: Option<String>,
}

impl NewSubmission {
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
        self.jurisdiction = Some(jurisdiction.into().to_uppercase());
        self
    }
}

/// One compliance document review
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub submission_id: SubmissionId,
    pub subject_id: SubjectId,
    pub document_type: DocumentType,
    pub document_reference: String,
    pub jurisdiction: Option<String>,
    pub state: SubmissionState,
    pub submitted_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    pub risk_score: Option<u32>,
    /// Reason tags recorded with the decision
    pub reasons: Vec<String>,
}

impl Submission {
    /// Create a fresh `SUBMITTED` submission
    pub fn create(new: NewSubmission, now: DateTime<Utc>) -> Self {
        Self {
            submission_id: SubmissionId::generate(),
            subject_id: new.subject_id,
            document_type: new.document_type,
            document_reference: new.document_reference,
            jurisdiction: new.jurisdiction,
            state: SubmissionState::Submitted,
            submitted_at: now,
            decided_at: None,
            risk_score: None,
            reasons: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Compare-and-set transition.
    ///
    /// Fails with `InvalidTransition` when the current state is not
    /// `expected` or `next` is not reachable from it.
    pub fn apply_transition(
        &mut self,
        expected: SubmissionState,
        next: SubmissionState,
        risk_score: Option<u32>,
        reasons: Vec<String>,
        now: DateTime<Utc>,
    ) -> KycResult<()> {
        if self.state != expected || !self.state.can_transition_to(next) {
            return Err(KycError::invalid_transition(
                &self.submission_id,
                self.state,
                next,
            ));
        }

        self.state = next;
        if risk_score.is_some() {
            self.risk_score = risk_score;
        }
        if next.is_terminal() {
            self.decided_at = Some(now);
            self.reasons = reasons;
        }
        Ok(())
    }
}
