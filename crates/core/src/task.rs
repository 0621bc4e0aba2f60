//! Cascade tasks - upstream propagation of terminal decisions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use strum_macros::{Display, EnumString};

use crate::error::{KycError, KycResult};
use crate::submission::{SubjectId, Submission, SubmissionId, SubmissionState};

/// KYC status pushed to the identity record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TargetState {
    Verified,
    Rejected,
}

impl TargetState {
    /// Target for a terminal submission state, `None` otherwise
    pub fn from_state(state: SubmissionState) -> Option<Self> {
        match state {
            SubmissionState::Verified => Some(TargetState::Verified),
            SubmissionState::Rejected => Some(TargetState::Rejected),
            _ => None,
        }
    }
}

/// Cascade task status
///
/// `PENDING → IN_FLIGHT → {ACKED, FAILED_PERMANENT}`, with `IN_FLIGHT → PENDING`
/// when an attempt is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CascadeStatus {
    Pending,
    InFlight,
    Acked,
    FailedPermanent,
}

impl CascadeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, CascadeStatus::Acked | CascadeStatus::FailedPermanent)
    }
}

/// Result of one propagation attempt, as recorded on the task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskUpdate {
    Acked,
    Retry {
        next_retry_at: DateTime<Utc>,
        error: String,
    },
    FailedPermanent {
        error: String,
    },
}

/// Deterministic idempotency key for a submission's cascade
///
/// Repeated deliveries of the same logical update carry the same key.
pub fn idempotency_key(submission_id: &SubmissionId, target: TargetState) -> String {
    let mut hasher = Sha256::new();
    hasher.update(b"kyc-cascade:");
    hasher.update(submission_id.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(target.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// One propagation of a terminal decision to the identity record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeTask {
    pub submission_id: SubmissionId,
    pub subject_id: SubjectId,
    pub target_state: TargetState,
    pub idempotency_key: String,
    /// Store-wide enqueue order, used for per-subject FIFO
    pub sequence: u64,
    pub status: CascadeStatus,
    pub attempt_count: u32,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_retry_at: DateTime<Utc>,
    pub last_error: Option<String>,
}

impl CascadeTask {
    /// Build the task for a submission that just reached a terminal state
    pub fn for_submission(
        submission: &Submission,
        sequence: u64,
        now: DateTime<Utc>,
    ) -> KycResult<Self> {
        let target_state = TargetState::from_state(submission.state).ok_or_else(|| {
            KycError::invalid_transition(&submission.submission_id, submission.state, "CASCADE")
        })?;

        Ok(Self {
            idempotency_key: idempotency_key(&submission.submission_id, target_state),
            submission_id: submission.submission_id.clone(),
            subject_id: submission.subject_id.clone(),
            target_state,
            sequence,
            status: CascadeStatus::Pending,
            attempt_count: 0,
            created_at: now,
            last_attempt_at: None,
            next_retry_at: now,
            last_error: None,
        })
    }

    pub fn is_active(&self) -> bool {
        !self.status.is_terminal()
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == CascadeStatus::Pending && self.next_retry_at <= now
    }

    /// `PENDING → IN_FLIGHT`, counting the attempt
    pub fn begin_attempt(&mut self, now: DateTime<Utc>) -> KycResult<()> {
        self.expect_status(CascadeStatus::Pending, CascadeStatus::InFlight)?;
        self.status = CascadeStatus::InFlight;
        self.attempt_count += 1;
        self.last_attempt_at = Some(now);
        Ok(())
    }

    /// Record the outcome of an in-flight attempt
    pub fn complete(&mut self, update: TaskUpdate) -> KycResult<()> {
        let next = match &update {
            TaskUpdate::Acked => CascadeStatus::Acked,
            TaskUpdate::Retry { .. } => CascadeStatus::Pending,
            TaskUpdate::FailedPermanent { .. } => CascadeStatus::FailedPermanent,
        };
        self.expect_status(CascadeStatus::InFlight, next)?;

        self.status = next;
        match update {
            TaskUpdate::Acked => self.last_error = None,
            TaskUpdate::Retry { next_retry_at, error } => {
                self.next_retry_at = next_retry_at;
                self.last_error = Some(error);
            }
            TaskUpdate::FailedPermanent { error } => self.last_error = Some(error),
        }
        Ok(())
    }

    /// Whether an in-flight attempt started before `cutoff` (or never recorded
    /// a start) and its worker can be presumed gone
    pub fn lease_expired(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == CascadeStatus::InFlight
            && self.last_attempt_at.map_or(true, |started| started < cutoff)
    }

    /// `IN_FLIGHT → PENDING` for an attempt whose worker never reported back.
    ///
    /// The attempt stays counted, so an abandoned attempt draws on the retry
    /// budget like any other failure.
    pub fn release(&mut self, now: DateTime<Utc>) -> KycResult<()> {
        self.expect_status(CascadeStatus::InFlight, CascadeStatus::Pending)?;
        self.status = CascadeStatus::Pending;
        self.next_retry_at = now;
        self.last_error = Some("attempt lease expired".to_string());
        Ok(())
    }

    /// Push a pending task's due time back without consuming an attempt
    pub fn defer(&mut self, until: DateTime<Utc>) -> KycResult<()> {
        self.expect_status(CascadeStatus::Pending, CascadeStatus::Pending)?;
        self.next_retry_at = until;
        Ok(())
    }

    /// Operator reconciliation: `FAILED_PERMANENT → PENDING` with a fresh budget
    pub fn requeue(&mut self, now: DateTime<Utc>) -> KycResult<()> {
        self.expect_status(CascadeStatus::FailedPermanent, CascadeStatus::Pending)?;
        self.status = CascadeStatus::Pending;
        self.attempt_count = 0;
        self.next_retry_at = now;
        Ok(())
    }

    fn expect_status(&self, expected: CascadeStatus, next: CascadeStatus) -> KycResult<()> {
        if self.status != expected {
            return Err(KycError::invalid_transition(
                &self.submission_id,
                self.status,
                next,
            ));
        }
        Ok(())
    }
}
