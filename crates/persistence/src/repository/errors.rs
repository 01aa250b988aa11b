//! Append-only sink for step execution errors

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::{cancellable, to_document, Provisioned};
use crate::config::PersistenceConfig;
use crate::document::{Document, DocumentStore};
use crate::error::PersistenceError;
use crate::model::fields;
use crate::model::ExecutionError;

/// Write-only store for execution errors
#[derive(Clone)]
pub struct ExecutionErrorSink {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl ExecutionErrorSink {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        _provisioned: &Provisioned,
        config: &PersistenceConfig,
    ) -> Self {
        Self {
            store,
            collection: config.collections.errors.clone(),
        }
    }

    /// Append a batch of errors in one bulk write
    ///
    /// Either the whole batch is stored or none of it. Each record gets a
    /// time-ordered id, so storage order follows batch order.
    #[instrument(skip_all, fields(count = errors.len()))]
    pub async fn persist_errors(
        &self,
        errors: &[ExecutionError],
        cancel: &CancellationToken,
    ) -> Result<(), PersistenceError> {
        if errors.is_empty() {
            return Ok(());
        }

        cancellable(cancel, async {
            let documents = errors
                .iter()
                .map(|error| -> Result<(String, Document), PersistenceError> {
                    let id = Uuid::now_v7().to_string();
                    let mut document = to_document(error)?;
                    if let Value::Object(map) = &mut document {
                        map.insert(fields::ID.to_string(), Value::String(id.clone()));
                    }
                    Ok((id, document))
                })
                .collect::<Result<Vec<_>, _>>()?;

            self.store.bulk_insert(&self.collection, documents).await?;

            debug!(count = errors.len(), "persisted execution errors");
            Ok(())
        })
        .await
    }
}
