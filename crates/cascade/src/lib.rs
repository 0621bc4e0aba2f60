//! KycAml Cascade Propagator
//!
//! Pushes terminal decisions to the identity record and keeps retrying
//! transient failures until the budget is spent.
//!
//! ```text
//! PENDING ──begin──► IN_FLIGHT ──2xx / already applied──► ACKED
//!    ▲                   │ ──4xx / budget exhausted─────► FAILED_PERMANENT
//!    └──── backoff ──────┘ (5xx, timeout, connection)
//! ```
//!
//! Ordering is FIFO per subject: the store only hands out a subject's oldest
//! unsettled task, so a later decision never overtakes an earlier one.

pub mod client;
pub mod config;
pub mod error;
pub mod fake;
pub mod policy;
pub mod propagator;
pub mod scheduler;

pub use client::{IdentityAck, IdentityClient, IdentityRecord, IdentityUpdate};
pub use config::CascadeConfig;
pub use error::IdentityError;
pub use fake::{IdentityCall, ScriptedIdentity, ScriptedReply};
pub use policy::RetryPolicy;
pub use propagator::{CascadePropagator, PropagationOutcome};
pub use scheduler::{CascadeScheduler, SchedulerReport};
