//! Timer-driven retry scheduler

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use kycaml_core::{CascadeTask, KycError, KycResult, TaskUpdate};
use kycaml_health::{Collaborator, DependencyMonitor};
use kycaml_store::SubmissionStore;
use tokio::sync::Notify;
use tokio::task::JoinSet;

use crate::config::CascadeConfig;
use crate::policy::RetryPolicy;
use crate::propagator::{CascadePropagator, PropagationOutcome};

/// Summary of one scheduler pass
#[derive(Debug, Default)]
pub struct SchedulerReport {
    pub acked: usize,
    pub retried: usize,
    pub failed: usize,
    /// Postponed because the identity collaborator is down
    pub deferred: usize,
    /// Claimed by another worker between listing and starting
    pub skipped: usize,
    /// Operator-visible conditions raised during the pass
    pub alerts: Vec<KycError>,
}

impl SchedulerReport {
    pub fn is_empty(&self) -> bool {
        self.acked + self.retried + self.failed + self.deferred + self.skipped == 0
    }
}

enum TaskResult {
    Acked,
    Retried,
    Failed(Option<KycError>),
    Skipped,
}

/// Drives cascade tasks from PENDING to a terminal status
#[derive(Clone)]
pub struct CascadeScheduler {
    store: Arc<dyn SubmissionStore>,
    propagator: CascadePropagator,
    policy: RetryPolicy,
    poll_interval: Duration,
    attempt_lease: Duration,
    health: Option<Arc<DependencyMonitor>>,
    wakeup: Arc<Notify>,
}

impl CascadeScheduler {
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        propagator: CascadePropagator,
        config: &CascadeConfig,
    ) -> Self {
        Self {
            store,
            propagator,
            policy: config.retry.clone(),
            poll_interval: config.poll_interval(),
            attempt_lease: config.attempt_lease(),
            health: None,
            wakeup: Arc::new(Notify::new()),
        }
    }

    /// Defer propagation while the monitor reports identity down
    pub fn with_health(mut self, health: Arc<DependencyMonitor>) -> Self {
        self.health = Some(health);
        self
    }

    /// Handle used to wake the scheduler when a task is enqueued
    pub fn wakeup(&self) -> Arc<Notify> {
        self.wakeup.clone()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub async fn run_once(&self) -> KycResult<SchedulerReport> {
        self.run_once_at(Utc::now()).await
    }

    /// Process every task due at `now`, concurrently across subjects
    pub async fn run_once_at(&self, now: DateTime<Utc>) -> KycResult<SchedulerReport> {
        self.release_expired(now)?;

        let due = self.store.due_tasks(now)?;
        let mut report = SchedulerReport::default();
        if due.is_empty() {
            return Ok(report);
        }

        if !self.identity_up() {
            for task in due {
                let until = after(now, self.policy.backoff(task.attempt_count.max(1)));
                self.store.defer(&task.submission_id, until)?;
                tracing::warn!(
                    subject_id = %task.subject_id,
                    submission_id = %task.submission_id,
                    until = %until,
                    "Identity service down, deferring cascade"
                );
                report.deferred += 1;
            }
            return Ok(report);
        }

        let mut workers = JoinSet::new();
        for task in due {
            let this = self.clone();
            workers.spawn(async move { this.process(task, now).await });
        }

        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(Ok(TaskResult::Acked)) => report.acked += 1,
                Ok(Ok(TaskResult::Retried)) => report.retried += 1,
                Ok(Ok(TaskResult::Failed(alert))) => {
                    report.failed += 1;
                    report.alerts.extend(alert);
                }
                Ok(Ok(TaskResult::Skipped)) => report.skipped += 1,
                Ok(Err(e)) => tracing::error!(error = %e, "Cascade task failed to update"),
                Err(e) => tracing::error!(error = %e, "Cascade worker panicked"),
            }
        }

        Ok(report)
    }

    /// Run until `shutdown` resolves, waking on the poll interval or on enqueue
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Cascade scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {}
                _ = self.wakeup.notified() => {}
            }

            match self.run_once().await {
                Ok(report) if !report.is_empty() => tracing::debug!(
                    acked = report.acked,
                    retried = report.retried,
                    failed = report.failed,
                    deferred = report.deferred,
                    "Cascade pass finished"
                ),
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Cascade pass failed"),
            }
        }
    }

    /// Reclaim attempts whose worker died before recording an outcome
    fn release_expired(&self, now: DateTime<Utc>) -> KycResult<()> {
        let cutoff = now - to_chrono(self.attempt_lease);
        for task in self.store.release_expired(cutoff, now)? {
            tracing::warn!(
                subject_id = %task.subject_id,
                submission_id = %task.submission_id,
                attempt = task.attempt_count,
                "Cascade attempt lease expired, releasing for retry"
            );
        }
        Ok(())
    }

    fn identity_up(&self) -> bool {
        self.health
            .as_ref()
            .map_or(true, |h| h.is_up(Collaborator::Identity))
    }

    async fn process(&self, task: CascadeTask, now: DateTime<Utc>) -> KycResult<TaskResult> {
        let task = match self.store.begin_attempt(&task.submission_id, now) {
            Ok(task) => task,
            Err(KycError::Conflict(_)) | Err(KycError::InvalidTransition { .. }) => {
                return Ok(TaskResult::Skipped)
            }
            Err(e) => return Err(e),
        };

        match self.propagator.propagate(&task).await {
            PropagationOutcome::Acked { already_applied } => {
                self.store.complete_attempt(&task.submission_id, TaskUpdate::Acked)?;
                tracing::info!(
                    subject_id = %task.subject_id,
                    submission_id = %task.submission_id,
                    target = %task.target_state,
                    attempt = task.attempt_count,
                    already_applied,
                    "Cascade acknowledged"
                );
                Ok(TaskResult::Acked)
            }
            PropagationOutcome::Retry { error } if self.policy.allows_retry(task.attempt_count) => {
                // Back off from when the attempt ended, not when the pass began
                let finished = Utc::now().max(now);
                let delay = self.policy.backoff(task.attempt_count);
                let next_retry_at = after(finished, delay);
                tracing::warn!(
                    subject_id = %task.subject_id,
                    submission_id = %task.submission_id,
                    attempt = task.attempt_count,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %error,
                    "Cascade attempt failed, retrying"
                );
                self.store.complete_attempt(
                    &task.submission_id,
                    TaskUpdate::Retry {
                        next_retry_at,
                        error,
                    },
                )?;
                Ok(TaskResult::Retried)
            }
            PropagationOutcome::Retry { error } => {
                self.store.complete_attempt(
                    &task.submission_id,
                    TaskUpdate::FailedPermanent {
                        error: format!("retry budget exhausted: {}", error),
                    },
                )?;
                tracing::error!(
                    alert = "cascade_retry_exhausted",
                    subject_id = %task.subject_id,
                    submission_id = %task.submission_id,
                    attempts = task.attempt_count,
                    error = %error,
                    "Cascade retries exhausted, manual reconciliation required"
                );
                Ok(TaskResult::Failed(Some(KycError::CascadeRetryExhausted {
                    submission_id: task.submission_id.to_string(),
                    attempts: task.attempt_count,
                })))
            }
            PropagationOutcome::FailedPermanent { error } => {
                tracing::error!(
                    subject_id = %task.subject_id,
                    submission_id = %task.submission_id,
                    attempt = task.attempt_count,
                    error = %error,
                    "Identity service rejected cascade"
                );
                self.store.complete_attempt(
                    &task.submission_id,
                    TaskUpdate::FailedPermanent { error },
                )?;
                Ok(TaskResult::Failed(None))
            }
        }
    }
}

fn to_chrono(delay: Duration) -> chrono::Duration {
    chrono::Duration::milliseconds(delay.as_millis().min(i64::MAX as u128) as i64)
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    now + to_chrono(delay)
}
