//! KycAml Core - domain types shared by every crate
//!
//! ## Lifecycle
//!
//! ```text
//! SUBMITTED ──► UNDER_REVIEW ──┬──► VERIFIED ─┐
//!                              └──► REJECTED ─┴──► CascadeTask
//!                                                   PENDING ──► IN_FLIGHT ──┬──► ACKED
//!                                                      ▲           │        └──► FAILED_PERMANENT
//!                                                      └── retry ──┘
//! ```
//!
//! - [`submission::Submission`] - one compliance document review
//! - [`task::CascadeTask`] - one upstream propagation of a terminal decision
//! - [`error::KycError`] - error taxonomy used across the workspace

pub mod error;
pub mod risk;
pub mod submission;
pub mod task;

pub use error::{KycError, KycResult};
pub use risk::RiskLevel;
pub use submission::{DocumentType, NewSubmission, SubjectId, Submission, SubmissionId, SubmissionState};
pub use task::{idempotency_key, CascadeStatus, CascadeTask, TargetState, TaskUpdate};
