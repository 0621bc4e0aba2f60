//! Property tests for the submission state machine and task enqueueing

use std::sync::Arc;
use std::thread;

use kycaml_core::{DocumentType, KycError, NewSubmission, SubjectId, SubmissionState};
use kycaml_store::{MemoryStore, SqliteStore, SubmissionStore};
use proptest::prelude::*;

fn any_state() -> impl Strategy<Value = SubmissionState> {
    prop_oneof![
        Just(SubmissionState::Submitted),
        Just(SubmissionState::UnderReview),
        Just(SubmissionState::Verified),
        Just(SubmissionState::Rejected),
    ]
}

/// Apply arbitrary transition attempts and check every observed state change
/// follows the lifecycle, with exactly one task per terminal submission.
fn check_transitions(store: &dyn SubmissionStore, attempts: &[(SubmissionState, SubmissionState)]) {
    let subject = SubjectId::from("prop");
    let mut current = store
        .create(NewSubmission::new(subject.clone(), DocumentType::Passport, "ref"))
        .unwrap();

    for (expected, next) in attempts {
        let before = store.get(&current.submission_id).unwrap().state;
        let result = store.transition(&current.submission_id, *expected, *next, Some(20), vec![]);

        match result {
            Ok(updated) => {
                assert_eq!(before, *expected);
                assert!(before.can_transition_to(*next));
                assert_eq!(updated.state, *next);
                if next.is_terminal() {
                    // Re-verification means a new submission.
                    current = store
                        .create(NewSubmission::new(subject.clone(), DocumentType::Passport, "ref"))
                        .unwrap();
                }
            }
            Err(KycError::InvalidTransition { .. }) => {
                assert!(before != *expected || !before.can_transition_to(*next));
                assert_eq!(store.get(&current.submission_id).unwrap().state, before);
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    let submissions = store.list_by_subject(&subject).unwrap();
    let terminal = submissions.iter().filter(|s| s.is_terminal()).count();
    let tasks = store.tasks_by_subject(&subject).unwrap();
    assert_eq!(tasks.len(), terminal);
    assert_eq!(submissions.iter().filter(|s| !s.is_terminal()).count(), 1);
    for task in &tasks {
        let owner = store.get(&task.submission_id).unwrap();
        assert!(owner.is_terminal());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_memory_transitions_follow_lifecycle(
        attempts in prop::collection::vec((any_state(), any_state()), 1..40)
    ) {
        check_transitions(&MemoryStore::new(), &attempts);
    }

    #[test]
    fn prop_sqlite_transitions_follow_lifecycle(
        attempts in prop::collection::vec((any_state(), any_state()), 1..20)
    ) {
        check_transitions(&SqliteStore::in_memory().unwrap(), &attempts);
    }

    #[test]
    fn prop_concurrent_create_one_active_per_subject(
        threads in 2usize..12,
        subjects in 1usize..4,
    ) {
        let store = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..threads)
            .map(|i| {
                let store = Arc::clone(&store);
                let subject = format!("subject-{}", i % subjects);
                thread::spawn(move || {
                    store.create(NewSubmission::new(subject.as_str(), DocumentType::Passport, "ref"))
                })
            })
            .collect();

        let created = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| r.is_ok())
            .count();

        prop_assert_eq!(created, subjects.min(threads));
        for s in 0..subjects {
            let subject = SubjectId::new(format!("subject-{}", s));
            let active = store
                .list_by_subject(&subject)
                .unwrap()
                .into_iter()
                .filter(|s| !s.is_terminal())
                .count();
            prop_assert!(active <= 1);
        }
    }

    #[test]
    fn prop_concurrent_decisions_enqueue_exactly_once(racers in 2usize..10) {
        let store = Arc::new(MemoryStore::new());
        let sub = store
            .create(NewSubmission::new("racer", DocumentType::Passport, "ref"))
            .unwrap();
        store
            .transition(&sub.submission_id, SubmissionState::Submitted, SubmissionState::UnderReview, None, vec![])
            .unwrap();

        let handles: Vec<_> = (0..racers)
            .map(|i| {
                let store = Arc::clone(&store);
                let id = sub.submission_id.clone();
                let outcome = if i % 2 == 0 { SubmissionState::Verified } else { SubmissionState::Rejected };
                thread::spawn(move || store.transition(&id, SubmissionState::UnderReview, outcome, Some(5), vec![]))
            })
            .collect();
        let wins = handles.into_iter().map(|h| h.join().unwrap()).filter(|r| r.is_ok()).count();

        prop_assert_eq!(wins, 1);
        prop_assert_eq!(store.tasks_by_subject(&SubjectId::from("racer")).unwrap().len(), 1);
    }
}
