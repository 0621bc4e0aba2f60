//! Identity collaborator errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("Identity service timed out after {0}ms")]
    Timeout(u64),

    #[error("Identity service connection failed: {0}")]
    Connection(String),

    #[error("Identity service returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid identity service response: {0}")]
    InvalidResponse(String),
}

impl IdentityError {
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        IdentityError::Status {
            status,
            body: body.into(),
        }
    }

    /// 4xx responses are explicit rejections; everything else may heal
    pub fn is_permanent(&self) -> bool {
        matches!(self, IdentityError::Status { status, .. } if (400..500).contains(status))
    }
}
