//! Application context - wires everything together

use std::path::Path;
use std::sync::Arc;

use kycaml_cascade::{CascadePropagator, CascadeScheduler, IdentityClient};
use kycaml_health::{Collaborator, DependencyMonitor, Probe};
use kycaml_service::KycService;
use kycaml_store::{SqliteStore, SubmissionStore};
use kycaml_verification::{TransactionMonitor, VerificationEngine};

use crate::config::KycConfig;
use crate::http::{HttpIdentityClient, HttpProbe, HttpTransactionMonitor};

/// Collaborator implementations injected into the context
pub struct Collaborators {
    pub identity: Arc<dyn IdentityClient>,
    pub monitor: Arc<dyn TransactionMonitor>,
    pub identity_probe: Arc<dyn Probe>,
    pub monitoring_probe: Arc<dyn Probe>,
}

impl Collaborators {
    /// HTTP clients for the configured endpoints
    pub fn http(config: &KycConfig) -> Self {
        let endpoints = &config.endpoints;
        Self {
            identity: Arc::new(HttpIdentityClient::new(
                endpoints.identity_url.clone(),
                config.cascade.attempt_timeout(),
            )),
            monitor: Arc::new(HttpTransactionMonitor::new(
                endpoints.monitoring_url.clone(),
                endpoints.request_timeout(),
            )),
            identity_probe: Arc::new(HttpProbe::new(&endpoints.identity_url)),
            monitoring_probe: Arc::new(HttpProbe::new(&endpoints.monitoring_url)),
        }
    }
}

/// Application context - wires together all components
pub struct AppContext {
    pub config: KycConfig,
    pub store: Arc<dyn SubmissionStore>,
    pub service: KycService,
    pub scheduler: CascadeScheduler,
    pub health: Arc<DependencyMonitor>,
}

impl AppContext {
    /// Open the SQLite store under `data_path` with HTTP collaborators
    pub fn new(data_path: impl AsRef<Path>, config: KycConfig) -> Result<Self, anyhow::Error> {
        let data_path = data_path.as_ref();
        std::fs::create_dir_all(data_path)?;

        let store = Arc::new(SqliteStore::new(data_path.join("kycaml.db"))?);
        let collaborators = Collaborators::http(&config);
        Ok(Self::assemble(store, config, collaborators))
    }

    pub fn assemble(
        store: Arc<dyn SubmissionStore>,
        config: KycConfig,
        collaborators: Collaborators,
    ) -> Self {
        let health = Arc::new(
            DependencyMonitor::new(config.health.clone())
                .with_probe(Collaborator::Identity, collaborators.identity_probe)
                .with_probe(Collaborator::TransactionMonitoring, collaborators.monitoring_probe),
        );

        let propagator = CascadePropagator::new(
            collaborators.identity.clone(),
            config.cascade.attempt_timeout(),
        );
        let scheduler = CascadeScheduler::new(store.clone(), propagator, &config.cascade)
            .with_health(health.clone());

        let engine = Arc::new(VerificationEngine::new(
            config.verification.clone(),
            store.clone(),
            collaborators.monitor,
        ));
        let service = KycService::new(store.clone(), engine, collaborators.identity, health.clone())
            .with_cache_ttl(config.cache_ttl())
            .with_cascade_wakeup(scheduler.wakeup());

        Self {
            config,
            store,
            service,
            scheduler,
            health,
        }
    }
}
