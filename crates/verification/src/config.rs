//! Verification configuration with configurable thresholds
//!
//! All thresholds and weights load from the service config file; defaults
//! are conservative.

use std::collections::HashMap;
use std::time::Duration;

use kycaml_core::{DocumentType, KycError, KycResult, RiskLevel};
use serde::{Deserialize, Serialize};

/// Configuration for the Verification Engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationConfig {
    // === Decision thresholds ===
    /// Scores at or below this verify
    #[serde(default = "default_threshold_verify")]
    pub threshold_verify: u32,

    /// Scores at or above this reject outright
    #[serde(default = "default_threshold_reject")]
    pub threshold_reject: u32,

    // === Static rules ===
    /// Base risk per document type
    #[serde(default = "default_document_weights")]
    pub document_weights: HashMap<DocumentType, u32>,

    /// Window for counting the subject's other submissions (in minutes)
    #[serde(default = "default_velocity_window_minutes")]
    pub velocity_window_minutes: i64,

    /// Risk added per other submission inside the window
    #[serde(default = "default_velocity_weight")]
    pub velocity_weight: u32,

    /// ISO country codes that may not be verified
    #[serde(default = "default_disallowed_jurisdictions")]
    pub disallowed_jurisdictions: Vec<String>,

    /// Risk added for a disallowed jurisdiction
    #[serde(default = "default_jurisdiction_weight")]
    pub jurisdiction_weight: u32,

    // === Transaction monitoring ===
    /// Multiplier applied to the 0-100 anomaly score
    #[serde(default = "default_anomaly_weight")]
    pub anomaly_weight: f64,

    /// Timeout for the transaction-monitoring call
    #[serde(default = "default_monitor_timeout_ms")]
    pub monitor_timeout_ms: u64,
}

fn default_threshold_verify() -> u32 {
    30
}

fn default_threshold_reject() -> u32 {
    70
}

fn default_document_weights() -> HashMap<DocumentType, u32> {
    HashMap::from([
        (DocumentType::Passport, 10),
        (DocumentType::NationalId, 15),
        (DocumentType::DriversLicense, 20),
        (DocumentType::ResidencePermit, 20),
        (DocumentType::UtilityBill, 35),
        (DocumentType::Other, 40),
    ])
}

fn default_velocity_window_minutes() -> i64 {
    24 * 60
}

fn default_velocity_weight() -> u32 {
    10
}

fn default_disallowed_jurisdictions() -> Vec<String> {
    vec!["KP".to_string(), "IR".to_string(), "SY".to_string()]
}

fn default_jurisdiction_weight() -> u32 {
    100
}

fn default_anomaly_weight() -> f64 {
    0.5
}

fn default_monitor_timeout_ms() -> u64 {
    500
}

impl Default for VerificationConfig {
    fn default() -> Self {
        Self {
            threshold_verify: default_threshold_verify(),
            threshold_reject: default_threshold_reject(),
            document_weights: default_document_weights(),
            velocity_window_minutes: default_velocity_window_minutes(),
            velocity_weight: default_velocity_weight(),
            disallowed_jurisdictions: default_disallowed_jurisdictions(),
            jurisdiction_weight: default_jurisdiction_weight(),
            anomaly_weight: default_anomaly_weight(),
            monitor_timeout_ms: default_monitor_timeout_ms(),
        }
    }
}

impl VerificationConfig {
    pub fn validate(&self) -> KycResult<()> {
        if self.threshold_verify >= self.threshold_reject {
            return Err(KycError::Config(format!(
                "threshold_verify ({}) must be below threshold_reject ({})",
                self.threshold_verify, self.threshold_reject
            )));
        }
        if self.anomaly_weight.is_nan() || self.anomaly_weight < 0.0 {
            return Err(KycError::Config("anomaly_weight must be non-negative".to_string()));
        }
        Ok(())
    }

    /// Risk level for a score, banded on the decision thresholds
    pub fn risk_level(&self, score: u32) -> RiskLevel {
        RiskLevel::from_thresholds(score, self.threshold_verify, self.threshold_reject)
    }

    /// Weight for a document type; unknown types weigh as `other`
    pub fn document_weight(&self, document_type: DocumentType) -> u32 {
        self.document_weights
            .get(&document_type)
            .or_else(|| self.document_weights.get(&DocumentType::Other))
            .copied()
            .unwrap_or(default_threshold_reject())
    }

    pub fn is_disallowed(&self, jurisdiction: &str) -> bool {
        self.disallowed_jurisdictions
            .iter()
            .any(|j| j.eq_ignore_ascii_case(jurisdiction))
    }

    pub fn monitor_timeout(&self) -> Duration {
        Duration::from_millis(self.monitor_timeout_ms)
    }

    pub fn velocity_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.velocity_window_minutes)
    }
}
