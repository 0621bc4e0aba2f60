//! KycAml RPC - collaborator clients and CLI orchestration
//!
//! This crate provides the `kycaml` binary, the HTTP clients for the
//! identity and transaction-monitoring services, and configuration loading.

pub mod commands;
pub mod config;
pub mod context;
pub mod http;

pub use config::{ConfigError, EndpointsConfig, KycConfig};
pub use context::{AppContext, Collaborators};
pub use http::{HttpIdentityClient, HttpProbe, HttpTransactionMonitor};
