//! Inbound event persistence

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{assign_id, cancellable, from_document, ids_of, to_document, Provisioned};
use crate::config::PersistenceConfig;
use crate::document::{DocumentStore, Filter, Patch, Query, SortKey};
use crate::error::PersistenceError;
use crate::model::fields::{self, event};
use crate::model::{nanos, Event};

/// Store for published events
#[derive(Clone)]
pub struct EventRepository {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl EventRepository {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        _provisioned: &Provisioned,
        config: &PersistenceConfig,
    ) -> Self {
        Self {
            store,
            collection: config.collections.events.clone(),
        }
    }

    /// Persist a new event and return its id
    #[instrument(skip(self, new_event, cancel), fields(event_name = %new_event.event_name, event_key = %new_event.event_key))]
    pub async fn create(
        &self,
        new_event: &Event,
        cancel: &CancellationToken,
    ) -> Result<String, PersistenceError> {
        cancellable(cancel, async {
            let mut new_event = new_event.clone();
            new_event.id = assign_id(&new_event.id);
            let document = to_document(&new_event)?;

            let mut session = self.store.open_session().await?;
            session
                .insert(&self.collection, &new_event.id, document)
                .await?;
            session.commit().await?;

            debug!(event_id = %new_event.id, "created event");
            Ok(new_event.id)
        })
        .await
    }

    /// Get an event by id
    #[instrument(skip(self, cancel))]
    pub async fn get(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<Event>, PersistenceError> {
        cancellable(cancel, async {
            let mut session = self.store.open_session().await?;
            session
                .load(&self.collection, id)
                .await?
                .map(from_document)
                .transpose()
        })
        .await
    }

    /// Ids of unprocessed events that occurred strictly before `as_of`,
    /// earliest first
    #[instrument(skip(self, cancel))]
    pub async fn get_runnable(
        &self,
        as_of: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, PersistenceError> {
        cancellable(cancel, async {
            let query = Query::new(
                Filter::eq(event::IS_PROCESSED, false)
                    .and(Filter::lt(event::EVENT_TIME, nanos(as_of))),
            )
            .order_by(SortKey::asc(event::EVENT_TIME))
            .order_by(SortKey::asc(fields::ID));

            let mut session = self.store.open_session().await?;
            let documents = session.query(&self.collection, &query).await?;
            Ok(ids_of(&documents))
        })
        .await
    }

    /// Ids of events named `event_name` with `event_key` that occurred at or
    /// after `as_of`, processed or not, earliest first
    #[instrument(skip(self, cancel))]
    pub async fn get_by_name_key(
        &self,
        event_name: &str,
        event_key: &str,
        as_of: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, PersistenceError> {
        cancellable(cancel, async {
            let query = Query::new(Filter::all(vec![
                Filter::eq(event::EVENT_NAME, event_name),
                Filter::eq(event::EVENT_KEY, event_key),
                Filter::gte(event::EVENT_TIME, nanos(as_of)),
            ]))
            .order_by(SortKey::asc(event::EVENT_TIME))
            .order_by(SortKey::asc(fields::ID));

            let mut session = self.store.open_session().await?;
            let documents = session.query(&self.collection, &query).await?;
            Ok(ids_of(&documents))
        })
        .await
    }

    /// Flag an event as delivered; idempotent
    #[instrument(skip(self, cancel))]
    pub async fn mark_processed(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), PersistenceError> {
        self.set_processed(id, true, cancel).await
    }

    /// Return an event to the runnable pool; idempotent
    #[instrument(skip(self, cancel))]
    pub async fn mark_unprocessed(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), PersistenceError> {
        self.set_processed(id, false, cancel).await
    }

    async fn set_processed(
        &self,
        id: &str,
        processed: bool,
        cancel: &CancellationToken,
    ) -> Result<(), PersistenceError> {
        cancellable(cancel, async {
            let patch = Patch::new().set(event::IS_PROCESSED, processed);

            let mut session = self.store.open_session().await?;
            session.patch(&self.collection, id, &patch).await?;
            session.commit().await?;

            debug!(processed, "updated event processed flag");
            Ok(())
        })
        .await
    }
}
