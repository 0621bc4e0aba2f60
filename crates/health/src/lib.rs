//! KycAml Health Monitor
//!
//! Samples collaborator reachability on a fixed interval, independent of
//! request traffic. Status flips are debounced:
//!
//! ```text
//! UP   ── N consecutive failures ──► DOWN
//! DOWN ── M consecutive successes ─► UP
//! ```
//!
//! The cascade scheduler reads [`DependencyMonitor::is_up`] to defer
//! propagation while the identity collaborator is down.

pub mod config;
pub mod monitor;
pub mod probe;

pub use config::HealthConfig;
pub use monitor::{DependencyMonitor, DependencySnapshot, DependencyStatus};
pub use probe::{Collaborator, Probe, ProbeError, StaticProbe};
