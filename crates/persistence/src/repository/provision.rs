//! One-time store provisioning

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument};

use super::cancellable;
use crate::config::PersistenceConfig;
use crate::document::{DocumentStore, IndexDefinition};
use crate::error::PersistenceError;
use crate::model::fields;

/// Proof that the collections and indexes the repositories query exist
///
/// Only [`provision`] creates one; every repository constructor asks for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Provisioned {
    _private: (),
}

/// Create the indexes for `config`'s collections, idempotently
#[instrument(skip_all)]
pub async fn provision(
    store: &dyn DocumentStore,
    config: &PersistenceConfig,
    cancel: &CancellationToken,
) -> Result<Provisioned, PersistenceError> {
    let indexes = index_definitions(config);
    cancellable(cancel, async {
        store.provision(&indexes).await?;
        Ok(())
    })
    .await?;

    info!(indexes = indexes.len(), "document store provisioned");
    Ok(Provisioned { _private: () })
}

/// Secondary indexes backing the runnable and matching queries
pub fn index_definitions(config: &PersistenceConfig) -> Vec<IndexDefinition> {
    use fields::{event, instance, subscription};

    let names = &config.collections;
    let index = |collection: &str, suffix: &str, fields: &[&str]| {
        IndexDefinition::new(&index_name(collection, suffix), collection, fields)
    };

    vec![
        index(
            &names.workflows,
            "runnable",
            &[instance::STATUS, instance::NEXT_EXECUTION],
        ),
        index(
            &names.workflows,
            "created",
            &[instance::CREATE_TIME, fields::ID],
        ),
        index(
            &names.workflows,
            "definition",
            &[instance::WORKFLOW_DEFINITION_ID],
        ),
        index(
            &names.subscriptions,
            "match",
            &[
                subscription::EVENT_NAME,
                subscription::EVENT_KEY,
                subscription::SUBSCRIBE_AS_OF,
            ],
        ),
        index(
            &names.events,
            "runnable",
            &[event::IS_PROCESSED, event::EVENT_TIME],
        ),
        index(
            &names.events,
            "match",
            &[event::EVENT_NAME, event::EVENT_KEY, event::EVENT_TIME],
        ),
    ]
}

// "wfc.workflows" + "runnable" -> "wfc_workflows_runnable"
fn index_name(collection: &str, suffix: &str) -> String {
    let base: String = collection
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    format!("{base}_{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::InMemoryDocumentStore;

    #[test]
    fn test_index_names() {
        let indexes = index_definitions(&PersistenceConfig::default());
        let names: Vec<_> = indexes.iter().map(|i| i.name.as_str()).collect();

        assert_eq!(
            names,
            vec![
                "wfc_workflows_runnable",
                "wfc_workflows_created",
                "wfc_workflows_definition",
                "wfc_subscriptions_match",
                "wfc_events_runnable",
                "wfc_events_match",
            ]
        );
        assert_eq!(indexes[0].collection, "wfc.workflows");
    }

    #[tokio::test]
    async fn test_provision_twice() {
        let store = InMemoryDocumentStore::new();
        let config = PersistenceConfig::default();
        let cancel = CancellationToken::new();

        let first = provision(&store, &config, &cancel).await.unwrap();
        let second = provision(&store, &config, &cancel).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.provisioned_indexes().len(), 6);
    }

    #[tokio::test]
    async fn test_provision_surfaces_outage() {
        let store = InMemoryDocumentStore::new();
        store.set_unavailable(true);

        let result = provision(
            &store,
            &PersistenceConfig::default(),
            &CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(ref e) if e.is_transient()));
    }
}
