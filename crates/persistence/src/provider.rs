//! Persistence provider facade
//!
//! Provisions the store once and hands out the four repositories over a
//! shared [`DocumentStore`].

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::PersistenceConfig;
use crate::document::DocumentStore;
use crate::error::PersistenceError;
use crate::repository::{
    provision, EventRepository, EventSubscriptionRepository, ExecutionErrorSink, Provisioned,
    WorkflowInstanceRepository,
};

/// Entry point for the workflow engine's persistence
#[derive(Clone)]
pub struct PersistenceProvider {
    store: Arc<dyn DocumentStore>,
    config: PersistenceConfig,
    instances: WorkflowInstanceRepository,
    subscriptions: EventSubscriptionRepository,
    events: EventRepository,
    errors: ExecutionErrorSink,
}

impl PersistenceProvider {
    /// Provision `store` for `config` and build the repositories over it
    #[instrument(skip_all)]
    pub async fn new(
        store: Arc<dyn DocumentStore>,
        config: PersistenceConfig,
        cancel: &CancellationToken,
    ) -> Result<Self, PersistenceError> {
        let provisioned = provision(store.as_ref(), &config, cancel).await?;
        Ok(Self::with_provisioned(store, config, &provisioned))
    }

    /// Build the repositories over a store that was already provisioned
    pub fn with_provisioned(
        store: Arc<dyn DocumentStore>,
        config: PersistenceConfig,
        provisioned: &Provisioned,
    ) -> Self {
        Self {
            instances: WorkflowInstanceRepository::new(store.clone(), provisioned, &config),
            subscriptions: EventSubscriptionRepository::new(store.clone(), provisioned, &config),
            events: EventRepository::new(store.clone(), provisioned, &config),
            errors: ExecutionErrorSink::new(store.clone(), provisioned, &config),
            store,
            config,
        }
    }

    /// Re-run provisioning; creating existing indexes again is a no-op
    pub async fn ensure_store_exists(
        &self,
        cancel: &CancellationToken,
    ) -> Result<(), PersistenceError> {
        provision(self.store.as_ref(), &self.config, cancel).await?;
        Ok(())
    }

    pub fn instances(&self) -> &WorkflowInstanceRepository {
        &self.instances
    }

    pub fn subscriptions(&self) -> &EventSubscriptionRepository {
        &self.subscriptions
    }

    pub fn events(&self) -> &EventRepository {
        &self.events
    }

    pub fn errors(&self) -> &ExecutionErrorSink {
        &self.errors
    }

    pub fn config(&self) -> &PersistenceConfig {
        &self.config
    }
}
