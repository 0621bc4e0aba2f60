//! KYC errors

use thiserror::Error;

/// Errors shared by the store, engine, propagator and service
#[derive(Debug, Error)]
pub enum KycError {
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid transition for {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Dependency unavailable ({dependency}): {reason}")]
    DependencyUnavailable { dependency: String, reason: String },

    #[error("Cascade retry exhausted for submission {submission_id} after {attempts} attempts")]
    CascadeRetryExhausted { submission_id: String, attempts: u32 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl KycError {
    pub fn invalid_transition(
        id: impl ToString,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        KycError::InvalidTransition {
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn dependency_unavailable(dependency: impl Into<String>, reason: impl Into<String>) -> Self {
        KycError::DependencyUnavailable {
            dependency: dependency.into(),
            reason: reason.into(),
        }
    }

    /// True for errors the caller can recover from by retrying later
    pub fn is_transient(&self) -> bool {
        matches!(self, KycError::DependencyUnavailable { .. })
    }
}

/// Result type for KYC operations
pub type KycResult<T> = Result<T, KycError>;
