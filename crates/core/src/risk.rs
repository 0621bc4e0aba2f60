//! Risk levels derived from numeric risk scores
//!
//! Ordered from lowest to highest so snapshots can be compared with `max()`.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use strum_macros::Display;

const MAX_SCORE: u32 = 100;

/// Coarse risk level reported by AML checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RiskLevel {
    Low = 1,
    Medium = 2,
    High = 3,
    Critical = 4,
}

impl RiskLevel {
    /// Map a 0-100 risk score onto a level using the decision thresholds.
    ///
    /// Scores that verify are `Low` and the manual review band is `Medium`.
    /// The rejection band is `High`, with its top third `Critical`. A
    /// flagged subject therefore never reports `Low`.
    pub fn from_thresholds(score: u32, threshold_verify: u32, threshold_reject: u32) -> Self {
        let critical_from = threshold_reject
            .saturating_add(MAX_SCORE.saturating_sub(threshold_reject) * 2 / 3);
        if score <= threshold_verify {
            RiskLevel::Low
        } else if score < threshold_reject {
            RiskLevel::Medium
        } else if score < critical_from {
            RiskLevel::High
        } else {
            RiskLevel::Critical
        }
    }
}

impl PartialOrd for RiskLevel {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RiskLevel {
    fn cmp(&self, other: &Self) -> Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

impl Default for RiskLevel {
    fn default() -> Self {
        RiskLevel::Low
    }
}
