//! Verification decisions

use kycaml_core::SubmissionState;
use serde::{Deserialize, Serialize};

/// Reason tags attached to decisions
pub mod reason {
    pub const HIGH_VELOCITY: &str = "high_velocity";
    pub const DISALLOWED_JURISDICTION: &str = "disallowed_jurisdiction";
    pub const TRANSACTION_ANOMALY: &str = "transaction_anomaly";
    pub const RISK_ABOVE_REJECT_THRESHOLD: &str = "risk_above_reject_threshold";
    pub const MANUAL_REVIEW_REQUIRED: &str = "manual_review_required";
}

/// Terminal outcome chosen by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Verified,
    Rejected,
}

impl Outcome {
    pub fn to_state(self) -> SubmissionState {
        match self {
            Outcome::Verified => SubmissionState::Verified,
            Outcome::Rejected => SubmissionState::Rejected,
        }
    }
}

/// Result of evaluating a submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: Outcome,
    /// 0-100
    pub risk_score: u32,
    pub reasons: Vec<String>,
}

impl Decision {
    /// Apply the decision policy to a computed score.
    ///
    /// Ambiguous scores are rejected, never auto-approved.
    pub fn from_score(
        risk_score: u32,
        mut reasons: Vec<String>,
        threshold_verify: u32,
        threshold_reject: u32,
    ) -> Self {
        let outcome = if risk_score >= threshold_reject {
            reasons.push(reason::RISK_ABOVE_REJECT_THRESHOLD.to_string());
            Outcome::Rejected
        } else if risk_score <= threshold_verify {
            Outcome::Verified
        } else {
            reasons.push(reason::MANUAL_REVIEW_REQUIRED.to_string());
            Outcome::Rejected
        };

        Self {
            outcome,
            risk_score,
            reasons,
        }
    }

    pub fn is_verified(&self) -> bool {
        self.outcome == Outcome::Verified
    }
}
