//! Integration tests for KycAml
//!
//! These tests drive the full flow: submit → evaluate → decide → cascade →
//! status, against scripted in-process collaborators.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kycaml_cascade::{
    CascadeConfig, CascadePropagator, CascadeScheduler, RetryPolicy, ScriptedIdentity,
    ScriptedReply,
};
use kycaml_core::{CascadeStatus, DocumentType, KycError, RiskLevel, SubjectId, SubmissionState};
use kycaml_health::{Collaborator, DependencyMonitor, DependencyStatus, HealthConfig, StaticProbe};
use kycaml_service::{
    AmlStatus, KycService, LocalState, OverallHealth, RejectRequest, SubmitRequest,
    OPERATOR_REJECTED,
};
use kycaml_store::{MemoryStore, SqliteStore, SubmissionStore};
use kycaml_verification::{StaticMonitor, VerificationConfig, VerificationEngine};
use tempfile::TempDir;

struct Harness {
    service: KycService,
    scheduler: CascadeScheduler,
    identity: Arc<ScriptedIdentity>,
    monitor: Arc<StaticMonitor>,
    monitoring_probe: Arc<StaticProbe>,
    health: Arc<DependencyMonitor>,
    store: Arc<dyn SubmissionStore>,
}

fn harness_with(store: Arc<dyn SubmissionStore>) -> Harness {
    let identity = Arc::new(ScriptedIdentity::new());
    let monitor = Arc::new(StaticMonitor::new());
    let monitoring_probe = Arc::new(StaticProbe::default());
    let health = Arc::new(
        DependencyMonitor::new(HealthConfig::default())
            .with_probe(Collaborator::Identity, identity.clone())
            .with_probe(Collaborator::TransactionMonitoring, monitoring_probe.clone()),
    );

    let cascade = CascadeConfig {
        retry: RetryPolicy {
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            max_attempts: 5,
            jitter_ratio: 0.0,
        },
        ..Default::default()
    };
    let propagator = CascadePropagator::new(identity.clone(), cascade.attempt_timeout());
    let scheduler =
        CascadeScheduler::new(store.clone(), propagator, &cascade).with_health(health.clone());

    let engine = Arc::new(VerificationEngine::new(
        VerificationConfig::default(),
        store.clone(),
        monitor.clone(),
    ));
    let service = KycService::new(store.clone(), engine, identity.clone(), health.clone())
        .with_cache_ttl(Duration::ZERO)
        .with_cascade_wakeup(scheduler.wakeup());

    Harness {
        service,
        scheduler,
        identity,
        monitor,
        monitoring_probe,
        health,
        store,
    }
}

fn harness() -> Harness {
    harness_with(Arc::new(MemoryStore::new()))
}

fn passport(subject: &str) -> SubmitRequest {
    SubmitRequest::new(subject, DocumentType::Passport, format!("vault://{subject}/passport"))
}

/// Test: subject 42 passport → score 10 → VERIFIED → ACKED
#[tokio::test]
async fn test_verified_submission_cascades() {
    let h = harness();
    let subject = SubjectId::from("42");

    let response = h.service.submit(passport("42")).await.unwrap();
    assert_eq!(response.state, SubmissionState::Verified);
    assert_eq!(response.risk_score, Some(10));
    assert_eq!(response.risk_level, Some(RiskLevel::Low));

    let status = h.service.get_status(&subject).await.unwrap();
    assert_eq!(status.local_state, LocalState::Verified);
    assert_eq!(status.cascade_status, Some(CascadeStatus::Pending));
    assert!(!status.divergence);
    assert!(status.last_verified_at.is_some());

    let report = h.scheduler.run_once_at(Utc::now()).await.unwrap();
    assert_eq!(report.acked, 1);

    let status = h.service.get_status(&subject).await.unwrap();
    assert_eq!(status.cascade_status, Some(CascadeStatus::Acked));
    assert_eq!(status.upstream_kyc_status.as_deref(), Some("verified"));
    assert!(!status.divergence);
}

/// Test: identity returns 503 three times, then 200
#[tokio::test]
async fn test_transient_identity_failures_recover() {
    let h = harness();
    h.identity
        .push_replies("42", [ScriptedReply::Status(503); 3]);
    let response = h.service.submit(passport("42")).await.unwrap();

    let mut now = Utc::now() + chrono::Duration::minutes(1);
    let mut delays = Vec::new();
    for _ in 0..3 {
        let report = h.scheduler.run_once_at(now).await.unwrap();
        assert_eq!(report.retried, 1);
        let task = h.store.task_for(&response.submission_id).unwrap();
        delays.push((task.next_retry_at - now).num_milliseconds());
        now = task.next_retry_at;
    }
    assert!(delays.windows(2).all(|w| w[0] < w[1]), "backoff not increasing: {delays:?}");

    h.scheduler.run_once_at(now).await.unwrap();

    let task = h.store.task_for(&response.submission_id).unwrap();
    assert_eq!(task.status, CascadeStatus::Acked);
    assert_eq!(task.attempt_count, 4);

    let keys: Vec<_> = h
        .identity
        .calls()
        .into_iter()
        .map(|c| c.update.idempotency_key)
        .collect();
    assert_eq!(keys.len(), 4);
    assert!(keys.iter().all(|k| k == &task.idempotency_key));
}

/// Test: 422 → FAILED_PERMANENT, divergence flagged, then requeued
#[tokio::test]
async fn test_permanent_rejection_flags_divergence() {
    let h = harness();
    let subject = SubjectId::from("42");
    h.identity.push_replies("42", [ScriptedReply::Status(422)]);
    let response = h.service.submit(passport("42")).await.unwrap();

    h.scheduler.run_once_at(Utc::now()).await.unwrap();

    let status = h.service.get_status(&subject).await.unwrap();
    assert_eq!(status.local_state, LocalState::Verified);
    assert_eq!(status.cascade_status, Some(CascadeStatus::FailedPermanent));
    assert!(status.divergence);

    let health = h.service.health().unwrap();
    assert_eq!(health.failed_permanent_tasks, 1);
    assert_eq!(health.status, OverallHealth::Degraded);

    // Operator reconciles and requeues
    let task = h.service.requeue(&response.submission_id).unwrap();
    assert_eq!(task.status, CascadeStatus::Pending);
    h.scheduler.run_once_at(Utc::now()).await.unwrap();

    let status = h.service.get_status(&subject).await.unwrap();
    assert_eq!(status.cascade_status, Some(CascadeStatus::Acked));
    assert!(!status.divergence);
    assert_eq!(h.service.health().unwrap().status, OverallHealth::Healthy);
}

#[tokio::test]
async fn test_unknown_subject_not_submitted() {
    let h = harness();

    let status = h.service.get_status(&SubjectId::from("nobody")).await.unwrap();
    assert_eq!(status.local_state, LocalState::NotSubmitted);
    assert_eq!(status.cascade_status, None);
    assert!(!status.divergence);

    let aml = h.service.check_aml(&SubjectId::from("nobody")).unwrap();
    assert_eq!(aml.aml_status, AmlStatus::NotChecked);
    assert_eq!(aml.risk_score, None);
}

/// Test: monitoring outage leaves the submission under review until re-evaluated
#[tokio::test]
async fn test_dependency_outage_then_review() {
    let h = harness();
    let subject = SubjectId::from("42");
    h.monitor.set_unavailable(true);

    let err = h.service.submit(passport("42")).await.unwrap_err();
    assert!(matches!(err, KycError::DependencyUnavailable { .. }));

    let status = h.service.get_status(&subject).await.unwrap();
    assert_eq!(status.local_state, LocalState::UnderReview);
    let pending = status.pending_submission_id.unwrap();
    assert!(h.store.tasks_by_subject(&subject).unwrap().is_empty());

    // Second submission while one is active
    let err = h.service.submit(passport("42")).await.unwrap_err();
    assert!(matches!(err, KycError::Conflict(_)));

    h.monitor.set_unavailable(false);
    let response = h.service.review(&pending).await.unwrap();
    assert_eq!(response.state, SubmissionState::Verified);

    // Terminal submissions cannot be reviewed again
    let err = h.service.review(&pending).await.unwrap_err();
    assert!(matches!(err, KycError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_operator_reject_cascades_rejection() {
    let h = harness();
    let subject = SubjectId::from("42");
    h.monitor.set_unavailable(true);
    let _ = h.service.submit(passport("42")).await;

    let response = h
        .service
        .reject(RejectRequest::new("42", "document expired"))
        .await
        .unwrap();
    assert_eq!(response.state, SubmissionState::Rejected);
    assert!(response.reasons.contains(&OPERATOR_REJECTED.to_string()));
    assert!(response.reasons.contains(&"document expired".to_string()));

    h.scheduler.run_once_at(Utc::now()).await.unwrap();
    assert_eq!(h.identity.kyc_status(&subject).as_deref(), Some("rejected"));

    // Nothing left to reject
    let err = h
        .service
        .reject(RejectRequest::new("42", "again"))
        .await
        .unwrap_err();
    assert!(matches!(err, KycError::NotFound(_)));
}

#[tokio::test]
async fn test_resubmission_reports_latest_decision() {
    let h = harness();
    let subject = SubjectId::from("7");

    let first = h
        .service
        .submit(passport("7").with_jurisdiction("KP"))
        .await
        .unwrap();
    assert_eq!(first.state, SubmissionState::Rejected);

    // Re-verification is a new submission
    h.monitor.set_unavailable(true);
    let _ = h.service.submit(passport("7")).await;

    let status = h.service.get_status(&subject).await.unwrap();
    assert_eq!(status.local_state, LocalState::Rejected);
    assert_eq!(status.submission_id, Some(first.submission_id.clone()));
    assert_eq!(status.pending_state, Some(SubmissionState::UnderReview));
    assert_eq!(status.last_verified_at, None);

    h.monitor.set_unavailable(false);
    let second = h
        .service
        .review(&status.pending_submission_id.unwrap())
        .await
        .unwrap();
    // Velocity from the earlier submission: 10 + 10
    assert_eq!(second.risk_score, Some(20));
    assert_eq!(second.state, SubmissionState::Verified);

    // Both cascades settle in decision order
    let now = Utc::now();
    h.scheduler.run_once_at(now).await.unwrap();
    h.scheduler.run_once_at(now).await.unwrap();
    let order: Vec<_> = h
        .identity
        .calls()
        .into_iter()
        .map(|c| c.update.kyc_status.to_string())
        .collect();
    assert_eq!(order, vec!["rejected", "verified"]);

    // The first task is no longer the latest; it cannot be requeued
    let err = h.service.requeue(&first.submission_id).unwrap_err();
    assert!(matches!(err, KycError::InvalidTransition { .. } | KycError::Conflict(_)));

    let status = h.service.get_status(&subject).await.unwrap();
    assert_eq!(status.local_state, LocalState::Verified);
    assert!(status.last_verified_at.is_some());
    assert_eq!(status.pending_state, None);
}

#[tokio::test]
async fn test_check_aml_snapshot() {
    let h = harness();
    h.monitor.set_score("55", 80.0);

    let response = h.service.submit(passport("55")).await.unwrap();
    // 10 + round(80 * 0.5)
    assert_eq!(response.risk_score, Some(50));
    assert_eq!(response.state, SubmissionState::Rejected);

    let aml = h.service.check_aml(&SubjectId::from("55")).unwrap();
    assert_eq!(aml.aml_status, AmlStatus::Flagged);
    assert_eq!(aml.risk_score, Some(50));
    assert_eq!(aml.risk_level, Some(RiskLevel::Medium));
    assert!(aml.checked_at.is_some());

    let cleared = h.service.submit(passport("56")).await.unwrap();
    assert_eq!(cleared.state, SubmissionState::Verified);
    let aml = h.service.check_aml(&SubjectId::from("56")).unwrap();
    assert_eq!(aml.aml_status, AmlStatus::Cleared);
    assert_eq!(aml.risk_level, Some(RiskLevel::Low));
}

#[tokio::test]
async fn test_health_report_tracks_collaborators() {
    let h = harness();
    let report = h.service.health().unwrap();
    assert_eq!(report.status, OverallHealth::Healthy);
    assert_eq!(report.service, DependencyStatus::Up);

    h.identity.set_reachable(false);
    h.monitoring_probe.set_up(false);
    for _ in 0..3 {
        h.health.probe_once().await;
    }

    let report = h.service.health().unwrap();
    assert_eq!(report.status, OverallHealth::Degraded);
    assert_eq!(report.identity, DependencyStatus::Down);
    assert_eq!(report.transaction_monitoring, DependencyStatus::Down);
    assert_eq!(report.failed_permanent_tasks, 0);

    // Decisions made while identity is down are deferred, not failed
    h.service.submit(passport("42")).await.unwrap();
    let cascade = h.scheduler.run_once_at(Utc::now()).await.unwrap();
    assert_eq!(cascade.deferred, 1);
    assert!(h.identity.calls().is_empty());
}

/// Test: the same flow against the SQLite backend, surviving a reopen
#[tokio::test]
async fn test_sqlite_backed_flow() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("kycaml.db");

    let submission_id = {
        let h = harness_with(Arc::new(SqliteStore::new(&db_path).unwrap()));
        let response = h.service.submit(passport("42")).await.unwrap();
        h.scheduler.run_once_at(Utc::now()).await.unwrap();
        response.submission_id
    };

    let h = harness_with(Arc::new(SqliteStore::new(&db_path).unwrap()));
    let status = h.service.get_status(&SubjectId::from("42")).await.unwrap();
    assert_eq!(status.local_state, LocalState::Verified);
    assert_eq!(status.submission_id, Some(submission_id));
    assert_eq!(status.cascade_status, Some(CascadeStatus::Acked));
}

#[tokio::test]
async fn test_concurrent_submissions_single_winner() {
    let h = Arc::new(harness());
    h.monitor.set_unavailable(true);

    let mut handles = Vec::new();
    for i in 0..8 {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            h.service
                .submit(SubmitRequest::new("99", DocumentType::NationalId, format!("doc-{i}")))
                .await
        }));
    }

    let mut conflicts = 0;
    let mut pending = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Err(KycError::Conflict(_)) => conflicts += 1,
            Err(KycError::DependencyUnavailable { .. }) => pending += 1,
            other => panic!("unexpected result: {other:?}"),
        }
    }
    assert_eq!(pending, 1);
    assert_eq!(conflicts, 7);
    assert_eq!(h.store.list_by_subject(&SubjectId::from("99")).unwrap().len(), 1);
}
