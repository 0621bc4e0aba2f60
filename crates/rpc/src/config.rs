//! Service configuration file and environment overrides

use std::path::Path;
use std::time::Duration;

use kycaml_cascade::CascadeConfig;
use kycaml_health::HealthConfig;
use kycaml_verification::VerificationConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const IDENTITY_SERVICE_URL: &str = "IDENTITY_SERVICE_URL";
pub const MONITORING_SERVICE_URL: &str = "MONITORING_SERVICE_URL";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Collaborator base URLs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    #[serde(default = "default_identity_url")]
    pub identity_url: String,

    #[serde(default = "default_monitoring_url")]
    pub monitoring_url: String,

    /// Timeout for reads and monitoring calls
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_identity_url() -> String {
    "http://localhost:8001".to_string()
}

fn default_monitoring_url() -> String {
    "http://localhost:8003".to_string()
}

fn default_request_timeout_ms() -> u64 {
    2_000
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            identity_url: default_identity_url(),
            monitoring_url: default_monitoring_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl EndpointsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KycConfig {
    #[serde(default)]
    pub verification: VerificationConfig,

    #[serde(default)]
    pub cascade: CascadeConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub endpoints: EndpointsConfig,

    /// TTL of the identity read cache used by `status`
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
}

fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for KycConfig {
    fn default() -> Self {
        Self {
            verification: VerificationConfig::default(),
            cascade: CascadeConfig::default(),
            health: HealthConfig::default(),
            endpoints: EndpointsConfig::default(),
            cache_ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl KycConfig {
    /// Load from `path` if given, then apply environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.with_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Apply `IDENTITY_SERVICE_URL` / `MONITORING_SERVICE_URL` from `lookup`
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = lookup(IDENTITY_SERVICE_URL).filter(|u| !u.is_empty()) {
            self.endpoints.identity_url = url;
        }
        if let Some(url) = lookup(MONITORING_SERVICE_URL).filter(|u| !u.is_empty()) {
            self.endpoints.monitoring_url = url;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.verification
            .validate()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.cascade.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "cascade.retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.health.failure_threshold == 0 || self.health.recovery_threshold == 0 {
            return Err(ConfigError::Invalid(
                "health thresholds must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}
