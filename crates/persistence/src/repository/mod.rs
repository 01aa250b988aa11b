//! Repositories over the document store
//!
//! Every operation opens its own short-lived unit of work and takes a
//! [`CancellationToken`]. Cancellation drops the in-flight store call, so an
//! uncommitted unit of work is discarded and nothing partial is written.
//!
//! Lookup convention: `get` returns `Ok(None)` for an absent id in every
//! repository. Only mutations that need an existing record fail with
//! [`PersistenceError::NotFound`].

mod errors;
mod events;
mod instances;
mod provision;
mod subscriptions;

use std::collections::HashMap;
use std::future::Future;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::document::Document;
use crate::error::PersistenceError;
use crate::model::fields;

pub use errors::ExecutionErrorSink;
pub use events::EventRepository;
pub use instances::{InstanceFilter, WorkflowInstanceRepository};
pub use provision::{index_definitions, provision, Provisioned};
pub use subscriptions::EventSubscriptionRepository;

/// Run `operation` unless `cancel` fires first
pub(crate) async fn cancellable<T, F>(
    cancel: &CancellationToken,
    operation: F,
) -> Result<T, PersistenceError>
where
    F: Future<Output = Result<T, PersistenceError>>,
{
    if cancel.is_cancelled() {
        return Err(PersistenceError::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PersistenceError::Cancelled),
        result = operation => result,
    }
}

/// Id for a new record: the caller's, or a fresh time-ordered one
pub(crate) fn assign_id(id: &str) -> String {
    if id.is_empty() {
        Uuid::now_v7().to_string()
    } else {
        id.to_string()
    }
}

pub(crate) fn to_document<T: Serialize>(record: &T) -> Result<Document, PersistenceError> {
    Ok(serde_json::to_value(record)?)
}

pub(crate) fn from_document<T: DeserializeOwned>(document: Document) -> Result<T, PersistenceError> {
    Ok(serde_json::from_value(document)?)
}

/// Ids of query results, in result order
pub(crate) fn ids_of(documents: &[Document]) -> Vec<String> {
    documents
        .iter()
        .filter_map(|doc| doc.get(fields::ID).and_then(|id| id.as_str()))
        .map(str::to_string)
        .collect()
}

/// Decode loaded documents and return them in the order `ids` asked for,
/// skipping absent and repeated ids
pub(crate) fn in_request_order<T: DeserializeOwned>(
    ids: &[String],
    documents: Vec<Document>,
) -> Result<Vec<T>, PersistenceError> {
    let mut by_id = HashMap::with_capacity(documents.len());
    for document in documents {
        if let Some(id) = document.get(fields::ID).and_then(|id| id.as_str()) {
            by_id.insert(id.to_string(), document);
        }
    }

    ids.iter()
        .filter_map(|id| by_id.remove(id))
        .map(from_document)
        .collect()
}
