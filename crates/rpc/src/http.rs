//! HTTP clients for the identity and transaction-monitoring collaborators

use std::time::Duration;

use async_trait::async_trait;
use kycaml_cascade::{IdentityAck, IdentityClient, IdentityError, IdentityRecord, IdentityUpdate};
use kycaml_core::SubjectId;
use kycaml_health::{Probe, ProbeError};
use kycaml_verification::{MonitorError, TransactionMonitor};
use serde::Deserialize;

fn join(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

/// Identity service client
pub struct HttpIdentityClient {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpIdentityClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
            client: reqwest::Client::new(),
        }
    }

    fn map_error(&self, e: reqwest::Error) -> IdentityError {
        if e.is_timeout() {
            IdentityError::Timeout(self.timeout.as_millis() as u64)
        } else {
            IdentityError::Connection(e.to_string())
        }
    }

    async fn status_error(response: reqwest::Response) -> IdentityError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        IdentityError::status(status, body)
    }
}

#[async_trait]
impl IdentityClient for HttpIdentityClient {
    async fn update_kyc_status(
        &self,
        subject_id: &SubjectId,
        update: &IdentityUpdate,
    ) -> Result<IdentityAck, IdentityError> {
        let url = join(&self.base_url, &format!("/identity/{}", subject_id));
        let response = self
            .client
            .put(&url)
            .timeout(self.timeout)
            .json(update)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }
        // Success bodies are optional; an empty one means a fresh apply
        Ok(response.json().await.unwrap_or_default())
    }

    async fn fetch_identity(&self, subject_id: &SubjectId) -> Result<IdentityRecord, IdentityError> {
        let url = join(&self.base_url, &format!("/identity/{}", subject_id));
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if !response.status().is_success() {
            return Err(Self::status_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| IdentityError::InvalidResponse(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct RecentRiskResponse {
    score: f64,
}

/// Transaction-monitoring client
pub struct HttpTransactionMonitor {
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpTransactionMonitor {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl TransactionMonitor for HttpTransactionMonitor {
    async fn recent_risk(&self, subject_id: &SubjectId) -> Result<f64, MonitorError> {
        let url = join(
            &self.base_url,
            &format!("/transactions/{}/recent-risk", subject_id),
        );
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MonitorError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    MonitorError::Unreachable(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(MonitorError::Unreachable(format!(
                "status {}",
                response.status()
            )));
        }
        let body: RecentRiskResponse = response
            .json()
            .await
            .map_err(|e| MonitorError::InvalidResponse(e.to_string()))?;
        if !body.score.is_finite() {
            return Err(MonitorError::InvalidResponse(format!("score {}", body.score)));
        }
        Ok(body.score)
    }
}

/// `GET {base}/health` liveness probe
pub struct HttpProbe {
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(base_url: &str) -> Self {
        Self {
            url: join(base_url, "/health"),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self) -> Result<(), ProbeError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ProbeError::Unreachable(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProbeError::Unhealthy(response.status().as_u16()))
        }
    }
}
