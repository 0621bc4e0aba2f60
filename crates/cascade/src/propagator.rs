//! Single propagation attempt and outcome classification

use std::sync::Arc;
use std::time::Duration;

use kycaml_core::CascadeTask;

use crate::client::{IdentityAck, IdentityClient, IdentityUpdate};
use crate::error::IdentityError;

/// How one attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropagationOutcome {
    Acked { already_applied: bool },
    Retry { error: String },
    FailedPermanent { error: String },
}

impl PropagationOutcome {
    /// Map the collaborator's answer onto an outcome.
    ///
    /// A record that already shows the target status counts as success.
    pub fn classify(result: Result<IdentityAck, IdentityError>) -> Self {
        match result {
            Ok(ack) => PropagationOutcome::Acked {
                already_applied: ack.already_applied,
            },
            Err(e) if e.is_permanent() => PropagationOutcome::FailedPermanent {
                error: e.to_string(),
            },
            Err(e) => PropagationOutcome::Retry {
                error: e.to_string(),
            },
        }
    }
}

/// Sends a task's decision to the identity record
#[derive(Clone)]
pub struct CascadePropagator {
    client: Arc<dyn IdentityClient>,
    attempt_timeout: Duration,
}

impl CascadePropagator {
    pub fn new(client: Arc<dyn IdentityClient>, attempt_timeout: Duration) -> Self {
        Self {
            client,
            attempt_timeout,
        }
    }

    pub async fn propagate(&self, task: &CascadeTask) -> PropagationOutcome {
        let update = IdentityUpdate {
            kyc_status: task.target_state,
            idempotency_key: task.idempotency_key.clone(),
        };

        let result = tokio::time::timeout(
            self.attempt_timeout,
            self.client.update_kyc_status(&task.subject_id, &update),
        )
        .await
        .unwrap_or(Err(IdentityError::Timeout(
            self.attempt_timeout.as_millis() as u64,
        )));

        let outcome = PropagationOutcome::classify(result);
        tracing::debug!(
            subject_id = %task.subject_id,
            submission_id = %task.submission_id,
            attempt = task.attempt_count,
            outcome = ?outcome,
            "Propagation attempt finished"
        );
        outcome
    }
}
