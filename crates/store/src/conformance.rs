//! Behaviour shared by every backend, exercised from each backend's tests

use chrono::{Duration, Utc};
use kycaml_core::{
    CascadeStatus, DocumentType, KycError, NewSubmission, SubjectId, Submission, SubmissionId,
    SubmissionState, TargetState, TaskUpdate,
};

use crate::traits::SubmissionStore;

pub fn run_all(store: &dyn SubmissionStore) {
    create_and_get(store);
    duplicate_active_submission_conflicts(store);
    invalid_transitions_rejected(store);
    unknown_submission_not_found(store);
    terminal_transition_enqueues_one_task(store);
    resubmission_after_terminal(store);
    due_tasks_head_of_queue_only(store);
    retry_and_defer(store);
    requeue_only_latest(store);
    expired_attempt_released(store);
}

fn decide(store: &dyn SubmissionStore, subject: &str, outcome: SubmissionState) -> Submission {
    let sub = store
        .create(NewSubmission::new(subject, DocumentType::Passport, "ref"))
        .unwrap();
    store
        .transition(&sub.submission_id, SubmissionState::Submitted, SubmissionState::UnderReview, None, vec![])
        .unwrap();
    store
        .transition(&sub.submission_id, SubmissionState::UnderReview, outcome, Some(10), vec![])
        .unwrap()
}

fn create_and_get(store: &dyn SubmissionStore) {
    let sub = store
        .create(
            NewSubmission::new("conf-create", DocumentType::NationalId, "s3://doc").with_jurisdiction("de"),
        )
        .unwrap();

    assert_eq!(sub.state, SubmissionState::Submitted);
    assert!(sub.decided_at.is_none());
    assert!(sub.risk_score.is_none());

    let fetched = store.get(&sub.submission_id).unwrap();
    assert_eq!(fetched, sub);
    assert_eq!(fetched.jurisdiction.as_deref(), Some("DE"));

    let active = store
        .active_submission(&SubjectId::from("conf-create"))
        .unwrap()
        .unwrap();
    assert_eq!(active.submission_id, sub.submission_id);
}

fn duplicate_active_submission_conflicts(store: &dyn SubmissionStore) {
    store
        .create(NewSubmission::new("conf-dup", DocumentType::Passport, "a"))
        .unwrap();
    let err = store
        .create(NewSubmission::new("conf-dup", DocumentType::Passport, "b"))
        .unwrap_err();
    assert!(matches!(err, KycError::Conflict(_)));
}

fn invalid_transitions_rejected(store: &dyn SubmissionStore) {
    let sub = store
        .create(NewSubmission::new("conf-invalid", DocumentType::Passport, "a"))
        .unwrap();

    // Skipping review
    let err = store
        .transition(&sub.submission_id, SubmissionState::Submitted, SubmissionState::Verified, None, vec![])
        .unwrap_err();
    assert!(matches!(err, KycError::InvalidTransition { .. }));

    // Stale expected state
    let err = store
        .transition(&sub.submission_id, SubmissionState::UnderReview, SubmissionState::Verified, None, vec![])
        .unwrap_err();
    assert!(matches!(err, KycError::InvalidTransition { .. }));
    assert_eq!(store.get(&sub.submission_id).unwrap().state, SubmissionState::Submitted);

    // Terminal is immutable
    let done = decide(store, "conf-invalid-2", SubmissionState::Verified);
    let err = store
        .transition(&done.submission_id, SubmissionState::Verified, SubmissionState::Rejected, None, vec![])
        .unwrap_err();
    assert!(matches!(err, KycError::InvalidTransition { .. }));
    assert_eq!(store.tasks_by_subject(&SubjectId::from("conf-invalid-2")).unwrap().len(), 1);
}

fn unknown_submission_not_found(store: &dyn SubmissionStore) {
    let id = SubmissionId::from("does-not-exist");
    assert!(matches!(store.get(&id), Err(KycError::NotFound(_))));
    assert!(matches!(
        store.transition(&id, SubmissionState::Submitted, SubmissionState::UnderReview, None, vec![]),
        Err(KycError::NotFound(_))
    ));
    assert!(matches!(store.task_for(&id), Err(KycError::NotFound(_))));
    assert!(store
        .list_by_subject(&SubjectId::from("nobody"))
        .unwrap()
        .is_empty());
}

fn terminal_transition_enqueues_one_task(store: &dyn SubmissionStore) {
    let sub = store
        .create(NewSubmission::new("conf-task", DocumentType::Passport, "a"))
        .unwrap();
    store
        .transition(&sub.submission_id, SubmissionState::Submitted, SubmissionState::UnderReview, None, vec![])
        .unwrap();
    assert!(store.task_for(&sub.submission_id).is_err());

    let decided = store
        .transition(
            &sub.submission_id,
            SubmissionState::UnderReview,
            SubmissionState::Rejected,
            Some(55),
            vec!["manual_review_required".to_string()],
        )
        .unwrap();
    assert_eq!(decided.risk_score, Some(55));
    assert!(decided.decided_at.is_some());
    assert_eq!(decided.reasons, vec!["manual_review_required".to_string()]);

    let task = store.task_for(&sub.submission_id).unwrap();
    assert_eq!(task.target_state, TargetState::Rejected);
    assert_eq!(task.status, CascadeStatus::Pending);
    assert_eq!(task.subject_id, SubjectId::from("conf-task"));
    assert_eq!(store.tasks_by_subject(&SubjectId::from("conf-task")).unwrap().len(), 1);
}

fn resubmission_after_terminal(store: &dyn SubmissionStore) {
    let first = decide(store, "conf-resubmit", SubmissionState::Rejected);
    let second = store
        .create(NewSubmission::new("conf-resubmit", DocumentType::Passport, "b"))
        .unwrap();

    let all = store.list_by_subject(&SubjectId::from("conf-resubmit")).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].submission_id, first.submission_id);
    assert_eq!(all[1].submission_id, second.submission_id);
    assert_eq!(all[0].state, SubmissionState::Rejected);
}

fn due_tasks_head_of_queue_only(store: &dyn SubmissionStore) {
    let first = decide(store, "conf-fifo", SubmissionState::Verified);
    let second = decide(store, "conf-fifo", SubmissionState::Rejected);
    let now = Utc::now();

    let due: Vec<_> = store
        .due_tasks(now)
        .unwrap()
        .into_iter()
        .filter(|t| t.subject_id == SubjectId::from("conf-fifo"))
        .collect();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].submission_id, first.submission_id);

    // The later task cannot jump the queue.
    let err = store.begin_attempt(&second.submission_id, now).unwrap_err();
    assert!(matches!(err, KycError::Conflict(_)));

    let started = store.begin_attempt(&first.submission_id, now).unwrap();
    assert_eq!(started.status, CascadeStatus::InFlight);
    assert_eq!(started.attempt_count, 1);

    // In-flight head blocks the subject entirely.
    assert!(store
        .due_tasks(now)
        .unwrap()
        .iter()
        .all(|t| t.subject_id != SubjectId::from("conf-fifo")));

    store.complete_attempt(&first.submission_id, TaskUpdate::Acked).unwrap();
    let due = store.due_tasks(now).unwrap();
    assert!(due.iter().any(|t| t.submission_id == second.submission_id));
}

fn retry_and_defer(store: &dyn SubmissionStore) {
    let sub = decide(store, "conf-retry", SubmissionState::Verified);
    let now = Utc::now();
    let retry_at = now + Duration::seconds(30);

    store.begin_attempt(&sub.submission_id, now).unwrap();
    let task = store
        .complete_attempt(
            &sub.submission_id,
            TaskUpdate::Retry {
                next_retry_at: retry_at,
                error: "HTTP 503".to_string(),
            },
        )
        .unwrap();
    assert_eq!(task.status, CascadeStatus::Pending);
    assert_eq!(task.last_error.as_deref(), Some("HTTP 503"));
    assert!(!store.due_tasks(now).unwrap().iter().any(|t| t.submission_id == sub.submission_id));
    assert!(store.due_tasks(retry_at).unwrap().iter().any(|t| t.submission_id == sub.submission_id));

    let later = retry_at + Duration::seconds(30);
    let deferred = store.defer(&sub.submission_id, later).unwrap();
    assert_eq!(deferred.attempt_count, 1);
    assert_eq!(deferred.next_retry_at, later);
}

fn requeue_only_latest(store: &dyn SubmissionStore) {
    let before = store.count_failed_permanent().unwrap();
    let first = decide(store, "conf-requeue", SubmissionState::Verified);
    let now = Utc::now();
    store.begin_attempt(&first.submission_id, now).unwrap();
    store
        .complete_attempt(&first.submission_id, TaskUpdate::FailedPermanent { error: "HTTP 422".into() })
        .unwrap();
    assert_eq!(store.count_failed_permanent().unwrap(), before + 1);

    let requeued = store.requeue(&first.submission_id, now).unwrap();
    assert_eq!(requeued.status, CascadeStatus::Pending);
    assert_eq!(requeued.attempt_count, 0);
    assert_eq!(store.count_failed_permanent().unwrap(), before);

    store.begin_attempt(&first.submission_id, now).unwrap();
    store
        .complete_attempt(&first.submission_id, TaskUpdate::FailedPermanent { error: "HTTP 422".into() })
        .unwrap();
    decide(store, "conf-requeue", SubmissionState::Rejected);

    let err = store.requeue(&first.submission_id, now).unwrap_err();
    assert!(matches!(err, KycError::Conflict(_)));
}

fn expired_attempt_released(store: &dyn SubmissionStore) {
    let first = decide(store, "conf-lease", SubmissionState::Verified);
    let second = decide(store, "conf-lease", SubmissionState::Rejected);
    let started = Utc::now();
    let cutoff = started + Duration::seconds(10);
    let now = started + Duration::seconds(30);

    store.begin_attempt(&first.submission_id, started).unwrap();
    let stuck = |at| {
        store
            .due_tasks(at)
            .unwrap()
            .into_iter()
            .filter(|t| t.subject_id == first.subject_id)
            .count()
    };
    assert_eq!(stuck(now), 0);

    // Fresh attempts keep their lease.
    assert!(store
        .release_expired(started, now)
        .unwrap()
        .iter()
        .all(|t| t.subject_id != first.subject_id));
    assert_eq!(store.task_for(&first.submission_id).unwrap().status, CascadeStatus::InFlight);

    let released = store.release_expired(cutoff, now).unwrap();
    let task = released
        .iter()
        .find(|t| t.submission_id == first.submission_id)
        .expect("expired attempt released");
    assert_eq!(task.status, CascadeStatus::Pending);
    assert_eq!(task.attempt_count, 1);
    assert_eq!(task.last_error.as_deref(), Some("attempt lease expired"));

    // The released head goes out again before anything queued behind it.
    let due: Vec<_> = store
        .due_tasks(now)
        .unwrap()
        .into_iter()
        .filter(|t| t.subject_id == first.subject_id)
        .collect();
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].submission_id, first.submission_id);
    assert!(matches!(
        store.begin_attempt(&second.submission_id, now),
        Err(KycError::Conflict(_))
    ));
    assert_eq!(store.begin_attempt(&first.submission_id, now).unwrap().attempt_count, 2);
}
