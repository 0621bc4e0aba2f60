//! KycAml Service
//!
//! Wires the store, verification engine and health monitor behind the
//! exposed operations: `submit`, `review`, `get_status`, `check_aml`,
//! `reject`, `requeue` and `health`. Propagation is never done inline; a
//! decision only enqueues a cascade task and wakes the scheduler.

pub mod cache;
pub mod service;
pub mod types;

pub use cache::IdentityCache;
pub use service::{KycService, DEFAULT_CACHE_TTL, OPERATOR_REJECTED};
pub use types::{
    AmlSnapshot, AmlStatus, HealthReport, LocalState, OverallHealth, RejectRequest, StatusReport,
    SubmitRequest, SubmitResponse,
};
