//! Scripted in-process identity collaborator
//!
//! Replies are queued per subject; once a subject's script runs out every
//! update succeeds. Applied idempotency keys are remembered so replays come
//! back as `already_applied`.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kycaml_core::SubjectId;
use kycaml_health::{Probe, ProbeError};

use crate::client::{IdentityAck, IdentityClient, IdentityRecord, IdentityUpdate};
use crate::error::IdentityError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedReply {
    /// Respond with this HTTP status
    Status(u16),
    Timeout,
    ConnectionRefused,
}

/// One recorded update call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityCall {
    pub subject_id: SubjectId,
    pub update: IdentityUpdate,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct FakeState {
    scripts: HashMap<SubjectId, VecDeque<ScriptedReply>>,
    records: HashMap<SubjectId, String>,
    applied_keys: HashSet<String>,
    calls: Vec<IdentityCall>,
}

#[derive(Debug)]
pub struct ScriptedIdentity {
    state: Mutex<FakeState>,
    reachable: AtomicBool,
}

impl Default for ScriptedIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedIdentity {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            reachable: AtomicBool::new(true),
        }
    }

    /// Queue replies for the subject's next update calls
    pub fn push_replies(
        &self,
        subject_id: impl Into<SubjectId>,
        replies: impl IntoIterator<Item = ScriptedReply>,
    ) {
        if let Ok(mut state) = self.state.lock() {
            state
                .scripts
                .entry(subject_id.into())
                .or_default()
                .extend(replies);
        }
    }

    /// Simulate an update that arrived through another channel
    pub fn set_kyc_status(&self, subject_id: impl Into<SubjectId>, kyc_status: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.records.insert(subject_id.into(), kyc_status.to_string());
        }
    }

    /// Take the whole collaborator offline (updates, reads and probes)
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn kyc_status(&self, subject_id: &SubjectId) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|state| state.records.get(subject_id).cloned())
    }

    pub fn calls(&self) -> Vec<IdentityCall> {
        self.state
            .lock()
            .map(|state| state.calls.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, FakeState>, IdentityError> {
        self.state
            .lock()
            .map_err(|_| IdentityError::InvalidResponse("fake state poisoned".to_string()))
    }
}

#[async_trait]
impl IdentityClient for ScriptedIdentity {
    async fn update_kyc_status(
        &self,
        subject_id: &SubjectId,
        update: &IdentityUpdate,
    ) -> Result<IdentityAck, IdentityError> {
        let mut state = self.lock()?;
        state.calls.push(IdentityCall {
            subject_id: subject_id.clone(),
            update: update.clone(),
            at: Utc::now(),
        });

        if !self.reachable.load(Ordering::SeqCst) {
            return Err(IdentityError::Connection("connection refused".to_string()));
        }

        let reply = state
            .scripts
            .get_mut(subject_id)
            .and_then(|script| script.pop_front());
        match reply {
            Some(ScriptedReply::Timeout) => return Err(IdentityError::Timeout(0)),
            Some(ScriptedReply::ConnectionRefused) => {
                return Err(IdentityError::Connection("connection refused".to_string()))
            }
            Some(ScriptedReply::Status(status)) if !(200..300).contains(&status) => {
                return Err(IdentityError::status(status, "scripted failure"));
            }
            _ => {}
        }

        // A replayed key is a no-op, even if a later update has landed since
        if state.applied_keys.contains(&update.idempotency_key) {
            return Ok(IdentityAck { already_applied: true });
        }

        let target = update.kyc_status.to_string();
        let already_applied = state.records.get(subject_id) == Some(&target);
        state.applied_keys.insert(update.idempotency_key.clone());
        state.records.insert(subject_id.clone(), target);

        Ok(IdentityAck { already_applied })
    }

    async fn fetch_identity(&self, subject_id: &SubjectId) -> Result<IdentityRecord, IdentityError> {
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(IdentityError::Connection("connection refused".to_string()));
        }
        let state = self.lock()?;
        Ok(IdentityRecord {
            subject_id: subject_id.clone(),
            kyc_status: state.records.get(subject_id).cloned(),
        })
    }
}

#[async_trait]
impl Probe for ScriptedIdentity {
    async fn probe(&self) -> Result<(), ProbeError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(ProbeError::Unreachable("connection refused".to_string()))
        }
    }
}
