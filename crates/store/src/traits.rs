//! Storage abstraction

use chrono::{DateTime, Utc};
use kycaml_core::{
    CascadeTask, KycResult, NewSubmission, SubjectId, Submission, SubmissionId, SubmissionState,
    TaskUpdate,
};

/// Storage for submissions and their cascade tasks
///
/// Implementations must serialize operations per subject and keep unrelated
/// subjects independent.
pub trait SubmissionStore: Send + Sync {
    /// Create a `SUBMITTED` submission.
    ///
    /// Fails with `Conflict` if the subject already has a non-terminal one.
    fn create(&self, new: NewSubmission) -> KycResult<Submission>;

    /// Compare-and-set a submission from `expected` to `next`.
    ///
    /// Entering a terminal state enqueues exactly one cascade task in the
    /// same atomic step.
    fn transition(
        &self,
        submission_id: &SubmissionId,
        expected: SubmissionState,
        next: SubmissionState,
        risk_score: Option<u32>,
        reasons: Vec<String>,
    ) -> KycResult<Submission>;

    fn get(&self, submission_id: &SubmissionId) -> KycResult<Submission>;

    /// All submissions of a subject in insertion order
    fn list_by_subject(&self, subject_id: &SubjectId) -> KycResult<Vec<Submission>>;

    /// The subject's non-terminal submission, if any
    fn active_submission(&self, subject_id: &SubjectId) -> KycResult<Option<Submission>> {
        Ok(self
            .list_by_subject(subject_id)?
            .into_iter()
            .find(|s| !s.is_terminal()))
    }

    /// The cascade task owned by a submission
    fn task_for(&self, submission_id: &SubmissionId) -> KycResult<CascadeTask>;

    /// All cascade tasks of a subject in enqueue order
    fn tasks_by_subject(&self, subject_id: &SubjectId) -> KycResult<Vec<CascadeTask>>;

    /// For each subject, its oldest non-terminal task if that task is due
    fn due_tasks(&self, now: DateTime<Utc>) -> KycResult<Vec<CascadeTask>>;

    /// `PENDING → IN_FLIGHT`; only the subject's oldest active task may start
    fn begin_attempt(&self, submission_id: &SubmissionId, now: DateTime<Utc>)
        -> KycResult<CascadeTask>;

    /// Return `IN_FLIGHT` tasks whose attempt started before `cutoff` to
    /// `PENDING`, due at `now`.
    ///
    /// Recovers tasks left in flight by a worker that crashed or was killed
    /// between `begin_attempt` and `complete_attempt`.
    fn release_expired(
        &self,
        cutoff: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> KycResult<Vec<CascadeTask>>;

    /// Record the outcome of an in-flight attempt
    fn complete_attempt(
        &self,
        submission_id: &SubmissionId,
        update: TaskUpdate,
    ) -> KycResult<CascadeTask>;

    /// Move a pending task's due time without consuming an attempt
    fn defer(&self, submission_id: &SubmissionId, until: DateTime<Utc>) -> KycResult<CascadeTask>;

    /// Reset a `FAILED_PERMANENT` task; only the subject's latest task qualifies
    fn requeue(&self, submission_id: &SubmissionId, now: DateTime<Utc>) -> KycResult<CascadeTask>;

    fn count_failed_permanent(&self) -> KycResult<usize>;
}
