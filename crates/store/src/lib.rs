//! KycAml Submission Store
//!
//! Owns submissions and their cascade tasks behind the [`SubmissionStore`]
//! trait so the backend can be swapped without touching the state machine.
//!
//! ## Guarantees
//!
//! - At most one non-terminal submission per subject
//! - Transitions are compare-and-set on `(submission_id, expected_state)`
//! - A transition into a terminal state and the enqueue of its
//!   [`CascadeTask`](kycaml_core::CascadeTask) happen atomically
//! - Cascade tasks are handed out oldest-first per subject
//!
//! ## Backends
//!
//! - [`MemoryStore`] - sharded per-subject partitions
//! - [`SqliteStore`] - SQLite file or in-memory database

mod memory;
mod sqlite;
mod traits;

#[cfg(test)]
pub(crate) mod conformance;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::SubmissionStore;
