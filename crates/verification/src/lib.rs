//! KycAml Verification Engine
//!
//! Scores a submission and decides `VERIFIED` or `REJECTED`.
//!
//! ```text
//! document weight ─┐
//! velocity ────────┼──► risk score (0-100) ──► ≤ verify    → VERIFIED
//! jurisdiction ────┤                          ≥ reject    → REJECTED
//! tx anomaly ──────┘                          in between  → REJECTED (manual_review_required)
//! ```
//!
//! The engine only reads the store; callers apply the [`Decision`] through
//! `SubmissionStore::transition`.

pub mod config;
pub mod decision;
pub mod engine;
pub mod monitor;

pub use config::VerificationConfig;
pub use decision::{reason, Decision, Outcome};
pub use engine::VerificationEngine;
pub use monitor::{MonitorError, StaticMonitor, TransactionMonitor};
