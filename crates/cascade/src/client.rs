//! Identity collaborator interface

use async_trait::async_trait;
use kycaml_core::{SubjectId, TargetState};
use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// Body of `PUT /identity/{subject_id}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityUpdate {
    pub kyc_status: TargetState,
    pub idempotency_key: String,
}

/// Successful update response
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityAck {
    /// The record already carried this update (replay or another channel)
    #[serde(default)]
    pub already_applied: bool,
}

/// The parts of the identity record shown next to local status
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub subject_id: SubjectId,
    #[serde(default)]
    pub kyc_status: Option<String>,
}

#[async_trait]
pub trait IdentityClient: Send + Sync {
    async fn update_kyc_status(
        &self,
        subject_id: &SubjectId,
        update: &IdentityUpdate,
    ) -> Result<IdentityAck, IdentityError>;

    async fn fetch_identity(&self, subject_id: &SubjectId) -> Result<IdentityRecord, IdentityError>;
}
