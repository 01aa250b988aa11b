//! Event subscription persistence and token leasing
//!
//! A worker delivering an event to a subscription first claims the
//! subscription's token. Claim and release are single conditional patches
//! evaluated by the store, so two hosts racing for the same subscription
//! cannot both win:
//!
//! ```text
//! claim:   id = $id AND (externalToken IS NULL OR externalTokenExpiry < NOW())
//!          -> set externalToken, externalTokenExpiry, externalWorkerId
//! release: id = $id AND externalToken = $token
//!          -> clear externalToken, externalTokenExpiry, externalWorkerId
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{assign_id, cancellable, from_document, to_document, Provisioned};
use crate::config::PersistenceConfig;
use crate::document::{DocumentStore, Filter, Patch, Query, SortKey};
use crate::error::PersistenceError;
use crate::model::fields::{self, subscription};
use crate::model::{nanos, EventSubscription};

/// Store for event subscriptions
#[derive(Clone)]
pub struct EventSubscriptionRepository {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl EventSubscriptionRepository {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        _provisioned: &Provisioned,
        config: &PersistenceConfig,
    ) -> Self {
        Self {
            store,
            collection: config.collections.subscriptions.clone(),
        }
    }

    /// Persist a new subscription and return its id
    #[instrument(skip(self, sub, cancel), fields(workflow_id = %sub.workflow_id, event_name = %sub.event_name))]
    pub async fn create(
        &self,
        sub: &EventSubscription,
        cancel: &CancellationToken,
    ) -> Result<String, PersistenceError> {
        cancellable(cancel, async {
            let mut sub = sub.clone();
            sub.id = assign_id(&sub.id);
            let document = to_document(&sub)?;

            let mut session = self.store.open_session().await?;
            session.insert(&self.collection, &sub.id, document).await?;
            session.commit().await?;

            debug!(subscription_id = %sub.id, "created event subscription");
            Ok(sub.id)
        })
        .await
    }

    /// Delete a subscription; an absent id is not an error
    #[instrument(skip(self, cancel))]
    pub async fn delete(&self, id: &str, cancel: &CancellationToken) -> Result<(), PersistenceError> {
        cancellable(cancel, async {
            let mut session = self.store.open_session().await?;
            session.delete(&self.collection, id).await?;
            session.commit().await?;

            debug!("terminated event subscription");
            Ok(())
        })
        .await
    }

    /// Get a subscription by id
    #[instrument(skip(self, cancel))]
    pub async fn get(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<EventSubscription>, PersistenceError> {
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

    /// First unclaimed subscription to `event_name`/`event_key` active at
    /// `as_of`
    ///
    /// "First" is the earliest `subscribe_as_of`, ties broken by the smallest
    /// id.
    #[instrument(skip(self, cancel))]
    pub async fn find_first_open(
        &self,
        event_name: &str,
        event_key: &str,
        as_of: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Option<EventSubscription>, PersistenceError> {
        cancellable(cancel, self.first_open(event_name, event_key, None, as_of)).await
    }

    /// Like [`Self::find_first_open`], restricted to one workflow
    #[instrument(skip(self, cancel))]
    pub async fn find_first_open_for_workflow(
        &self,
        event_name: &str,
        event_key: &str,
        workflow_id: &str,
        as_of: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Option<EventSubscription>, PersistenceError> {
        cancellable(
            cancel,
            self.first_open(event_name, event_key, Some(workflow_id), as_of),
        )
        .await
    }

    /// Every subscription to `event_name`/`event_key` active at `as_of`,
    /// claimed or not, in the same order as [`Self::find_first_open`]
    #[instrument(skip(self, cancel))]
    pub async fn find_all(
        &self,
        event_name: &str,
        event_key: &str,
        as_of: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<EventSubscription>, PersistenceError> {
        cancellable(cancel, async {
            let query = matching(event_name, event_key, as_of);

            let mut session = self.store.open_session().await?;
            session
                .query(&self.collection, &query)
                .await?
                .into_iter()
                .map(from_document)
                .collect()
        })
        .await
    }

    /// Try to take the subscription's token until `expiry`
    ///
    /// Returns `true` if the token was unset or had expired and now belongs
    /// to `token`/`worker_id`; `false` if another worker holds an unexpired
    /// token or the subscription does not exist. Store failures are errors,
    /// never `false`.
    #[instrument(skip(self, token, cancel))]
    pub async fn claim_token(
        &self,
        id: &str,
        token: &str,
        worker_id: &str,
        expiry: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<bool, PersistenceError> {
        cancellable(cancel, async {
            let filter = Filter::eq(fields::ID, id).and(Filter::any(vec![
                Filter::is_null(subscription::EXTERNAL_TOKEN),
                Filter::before_now(subscription::EXTERNAL_TOKEN_EXPIRY),
            ]));
            let patch = Patch::new()
                .set(subscription::EXTERNAL_TOKEN, token)
                .set(subscription::EXTERNAL_TOKEN_EXPIRY, nanos(expiry))
                .set(subscription::EXTERNAL_WORKER_ID, worker_id);

            let patched = self
                .store
                .patch_where(&self.collection, &filter, &patch)
                .await?;

            let claimed = patched > 0;
            if claimed {
                debug!(%expiry, "claimed subscription token");
            } else {
                debug!("subscription token held elsewhere");
            }
            Ok(claimed)
        })
        .await
    }

    /// Clear the token if it is still `token`
    ///
    /// Returns `false` without changing anything when the stored token
    /// differs, e.g. after the lease expired and another worker claimed it.
    #[instrument(skip(self, token, cancel))]
    pub async fn release_token(
        &self,
        id: &str,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<bool, PersistenceError> {
        cancellable(cancel, async {
            let filter = Filter::eq(fields::ID, id)
                .and(Filter::eq(subscription::EXTERNAL_TOKEN, token));
            let patch = Patch::new()
                .clear(subscription::EXTERNAL_TOKEN)
                .clear(subscription::EXTERNAL_TOKEN_EXPIRY)
                .clear(subscription::EXTERNAL_WORKER_ID);

            let patched = self
                .store
                .patch_where(&self.collection, &filter, &patch)
                .await?;

            let released = patched > 0;
            if !released {
                debug!("token no longer held; release skipped");
            }
            Ok(released)
        })
        .await
    }

    async fn first_open(
        &self,
        event_name: &str,
        event_key: &str,
        workflow_id: Option<&str>,
        as_of: DateTime<Utc>,
    ) -> Result<Option<EventSubscription>, PersistenceError> {
        let mut query = matching(event_name, event_key, as_of).take(1);
        query.filter = query
            .filter
            .and(Filter::is_null(subscription::EXTERNAL_TOKEN));
        if let Some(workflow_id) = workflow_id {
            query.filter = query
                .filter
                .and(Filter::eq(subscription::WORKFLOW_ID, workflow_id));
        }

        let mut session = self.store.open_session().await?;
        session
            .query(&self.collection, &query)
            .await?
            .into_iter()
            .next()
            .map(from_document)
            .transpose()
    }
}

/// Subscriptions to one event name and key, active at `as_of`, in claim order
fn matching(event_name: &str, event_key: &str, as_of: DateTime<Utc>) -> Query {
    Query::new(Filter::all(vec![
        Filter::eq(subscription::EVENT_NAME, event_name),
        Filter::eq(subscription::EVENT_KEY, event_key),
        Filter::lte(subscription::SUBSCRIBE_AS_OF, nanos(as_of)),
    ]))
    .order_by(SortKey::asc(subscription::SUBSCRIBE_AS_OF))
    .order_by(SortKey::asc(fields::ID))
}
