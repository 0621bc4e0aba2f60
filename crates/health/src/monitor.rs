//! Dependency monitor with debounced status

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::Display;

use crate::config::HealthConfig;
use crate::probe::{Collaborator, Probe, ProbeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DependencyStatus {
    Up,
    Down,
}

#[derive(Debug, Clone)]
struct DependencyState {
    status: DependencyStatus,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_checked: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl Default for DependencyState {
    fn default() -> Self {
        Self {
            status: DependencyStatus::Up,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_checked: None,
            last_error: None,
        }
    }
}

/// Point-in-time view of one collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencySnapshot {
    pub collaborator: Collaborator,
    pub status: DependencyStatus,
    pub consecutive_failures: u32,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Rolling up/down status per collaborator
pub struct DependencyMonitor {
    config: HealthConfig,
    probes: Vec<(Collaborator, Arc<dyn Probe>)>,
    states: RwLock<HashMap<Collaborator, DependencyState>>,
}

impl DependencyMonitor {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            probes: Vec::new(),
            states: RwLock::new(HashMap::new()),
        }
    }

    /// Register the probe for a collaborator; it starts UP
    pub fn with_probe(mut self, collaborator: Collaborator, probe: Arc<dyn Probe>) -> Self {
        self.probes.push((collaborator, probe));
        if let Ok(mut states) = self.states.write() {
            states.entry(collaborator).or_default();
        }
        self
    }

    /// Current status; collaborators never probed count as UP
    pub fn is_up(&self, collaborator: Collaborator) -> bool {
        self.status(collaborator) == DependencyStatus::Up
    }

    pub fn status(&self, collaborator: Collaborator) -> DependencyStatus {
        self.states
            .read()
            .ok()
            .and_then(|states| states.get(&collaborator).map(|s| s.status))
            .unwrap_or(DependencyStatus::Up)
    }

    pub fn snapshot(&self) -> Vec<DependencySnapshot> {
        let Ok(states) = self.states.read() else {
            return Vec::new();
        };
        let mut snapshot: Vec<_> = states
            .iter()
            .map(|(collaborator, state)| DependencySnapshot {
                collaborator: *collaborator,
                status: state.status,
                consecutive_failures: state.consecutive_failures,
                last_checked: state.last_checked,
                last_error: state.last_error.clone(),
            })
            .collect();
        snapshot.sort_by_key(|s| s.collaborator.to_string());
        snapshot
    }

    /// Fold one probe result into the debounce counters
    pub fn record(
        &self,
        collaborator: Collaborator,
        result: Result<(), ProbeError>,
        now: DateTime<Utc>,
    ) -> DependencyStatus {
        let Ok(mut states) = self.states.write() else {
            return DependencyStatus::Up;
        };
        let state = states.entry(collaborator).or_default();
        state.last_checked = Some(now);

        match result {
            Ok(()) => {
                state.consecutive_failures = 0;
                state.consecutive_successes += 1;
                state.last_error = None;
                if state.status == DependencyStatus::Down
                    && state.consecutive_successes >= self.config.recovery_threshold
                {
                    state.status = DependencyStatus::Up;
                    tracing::info!(collaborator = %collaborator, "Collaborator recovered");
                }
            }
            Err(e) => {
                state.consecutive_successes = 0;
                state.consecutive_failures += 1;
                tracing::debug!(
                    collaborator = %collaborator,
                    failures = state.consecutive_failures,
                    error = %e,
                    "Probe failed"
                );
                state.last_error = Some(e.to_string());
                if state.status == DependencyStatus::Up
                    && state.consecutive_failures >= self.config.failure_threshold
                {
                    state.status = DependencyStatus::Down;
                    tracing::warn!(
                        collaborator = %collaborator,
                        failures = state.consecutive_failures,
                        "Collaborator marked down"
                    );
                }
            }
        }
        state.status
    }

    /// Run one probe round over every registered collaborator
    pub async fn probe_once(&self) {
        let timeout = self.config.probe_timeout();
        for (collaborator, probe) in &self.probes {
            let result = tokio::time::timeout(timeout, probe.probe())
                .await
                .unwrap_or(Err(ProbeError::Timeout(self.config.probe_timeout_ms)));
            self.record(*collaborator, result, Utc::now());
        }
    }

    /// Probe on the configured interval until `shutdown` resolves
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(self.config.probe_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Health monitor stopped");
                    return;
                }
                _ = ticker.tick() => self.probe_once().await,
            }
        }
    }
}
