//! Short-lived read-through cache of upstream KYC status

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use kycaml_cascade::IdentityClient;
use kycaml_core::SubjectId;

pub struct IdentityCache {
    ttl: Duration,
    entries: RwLock<HashMap<SubjectId, (Instant, Option<String>)>>,
}

impl IdentityCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Cached status, fetching on miss; lookup failures yield `None` and are not cached
    pub async fn kyc_status(
        &self,
        client: &dyn IdentityClient,
        subject_id: &SubjectId,
    ) -> Option<String> {
        if let Some(status) = self.fresh(subject_id) {
            return status;
        }

        match client.fetch_identity(subject_id).await {
            Ok(record) => {
                if let Ok(mut entries) = self.entries.write() {
                    entries.insert(subject_id.clone(), (Instant::now(), record.kyc_status.clone()));
                }
                record.kyc_status
            }
            Err(e) => {
                tracing::debug!(subject_id = %subject_id, error = %e, "Identity lookup failed");
                None
            }
        }
    }

    pub fn invalidate(&self, subject_id: &SubjectId) {
        if let Ok(mut entries) = self.entries.write() {
            entries.remove(subject_id);
        }
    }

    fn fresh(&self, subject_id: &SubjectId) -> Option<Option<String>> {
        let entries = self.entries.read().ok()?;
        entries
            .get(subject_id)
            .filter(|(fetched_at, _)| fetched_at.elapsed() < self.ttl)
            .map(|(_, status)| status.clone())
    }
}
