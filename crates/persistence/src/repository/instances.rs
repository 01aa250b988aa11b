//! Workflow instance persistence

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use super::{
    assign_id, cancellable, from_document, ids_of, in_request_order, to_document, Provisioned,
};
use crate::config::PersistenceConfig;
use crate::document::{DocumentStore, Filter, Patch, Query, SortKey};
use crate::error::PersistenceError;
use crate::model::fields::{self, instance};
use crate::model::{nanos, WorkflowInstance, WorkflowStatus};

/// Filter for listing workflow instances
///
/// Set criteria combine conjunctively; unset ones match everything.
#[derive(Debug, Clone, Default)]
pub struct InstanceFilter {
    pub status: Option<WorkflowStatus>,
    pub workflow_definition_id: Option<String>,
    /// Inclusive lower bound on the create time
    pub created_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the create time
    pub created_to: Option<DateTime<Utc>>,
}

impl InstanceFilter {
    pub fn with_status(mut self, status: WorkflowStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_definition(mut self, workflow_definition_id: impl Into<String>) -> Self {
        self.workflow_definition_id = Some(workflow_definition_id.into());
        self
    }

    pub fn created_between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.created_from = Some(from);
        self.created_to = Some(to);
        self
    }

    fn to_filter(&self) -> Filter {
        let mut filter = Filter::True;
        if let Some(status) = self.status {
            filter = filter.and(Filter::eq(instance::STATUS, status.as_str()));
        }
        // An empty definition id means "any definition"
        if let Some(definition) = self
            .workflow_definition_id
            .as_deref()
            .filter(|d| !d.is_empty())
        {
            filter = filter.and(Filter::eq(instance::WORKFLOW_DEFINITION_ID, definition));
        }
        if let Some(from) = self.created_from {
            filter = filter.and(Filter::gte(instance::CREATE_TIME, nanos(from)));
        }
        if let Some(to) = self.created_to {
            filter = filter.and(Filter::lte(instance::CREATE_TIME, nanos(to)));
        }
        filter
    }
}

/// Store for workflow instances
#[derive(Clone)]
pub struct WorkflowInstanceRepository {
    store: Arc<dyn DocumentStore>,
    collection: String,
    max_page_size: u32,
}

impl WorkflowInstanceRepository {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        _provisioned: &Provisioned,
        config: &PersistenceConfig,
    ) -> Self {
        Self {
            store,
            collection: config.collections.workflows.clone(),
            max_page_size: config.max_page_size,
        }
    }

    /// Persist a new instance and return its id
    ///
    /// An instance without an id is assigned one.
    #[instrument(skip(self, workflow, cancel), fields(definition = %workflow.workflow_definition_id))]
    pub async fn create(
        &self,
        workflow: &WorkflowInstance,
        cancel: &CancellationToken,
    ) -> Result<String, PersistenceError> {
        cancellable(cancel, async {
            let mut workflow = workflow.clone();
            workflow.id = assign_id(&workflow.id);
            let document = to_document(&workflow)?;

            let mut session = self.store.open_session().await?;
            session
                .insert(&self.collection, &workflow.id, document)
                .await?;
            session.commit().await?;

            debug!(workflow_id = %workflow.id, "created workflow instance");
            Ok(workflow.id)
        })
        .await
    }

    /// Overwrite the engine-owned fields of an existing instance in one
    /// atomic patch
    #[instrument(skip(self, workflow, cancel), fields(workflow_id = %workflow.id))]
    pub async fn update(
        &self,
        workflow: &WorkflowInstance,
        cancel: &CancellationToken,
    ) -> Result<(), PersistenceError> {
        cancellable(cancel, async {
            let document = to_document(workflow)?;
            let patch = Patch::pick(&document, &instance::WRITABLE);

            let mut session = self.store.open_session().await?;
            session.patch(&self.collection, &workflow.id, &patch).await?;
            session.commit().await?;

            debug!(status = %workflow.status, "persisted workflow instance");
            Ok(())
        })
        .await
    }

    /// Ids of runnable instances due at or before `as_of`, earliest first
    ///
    /// Index-backed: an instance written moments ago may be missing, and one
    /// just claimed by another host may still be listed.
    #[instrument(skip(self, cancel))]
    pub async fn get_runnable(
        &self,
        as_of: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>, PersistenceError> {
        cancellable(cancel, async {
            let query = Query::new(
                Filter::eq(instance::STATUS, WorkflowStatus::Runnable.as_str())
                    .and(Filter::lte(instance::NEXT_EXECUTION, nanos(as_of))),
            )
            .order_by(SortKey::asc(instance::NEXT_EXECUTION))
            .order_by(SortKey::asc(fields::ID));

            let mut session = self.store.open_session().await?;
            let documents = session.query(&self.collection, &query).await?;
            Ok(ids_of(&documents))
        })
        .await
    }

    /// Get an instance by id
    #[instrument(skip(self, cancel))]
    pub async fn get(
        &self,
        id: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<WorkflowInstance>, PersistenceError> {
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

    /// Get the instances with the given ids, in the order asked for
    ///
    /// Absent ids are skipped; no ids yields an empty result.
    #[instrument(skip(self, ids, cancel), fields(count = ids.len()))]
    pub async fn get_many(
        &self,
        ids: &[String],
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkflowInstance>, PersistenceError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        cancellable(cancel, async {
            let mut session = self.store.open_session().await?;
            let documents = session.load_many(&self.collection, ids).await?;
            in_request_order(ids, documents)
        })
        .await
    }

    /// Page through instances matching `filter`
    ///
    /// Ordered by create time, then id, so consecutive pages neither repeat
    /// nor skip instances while others are written. `take` is capped at the
    /// configured maximum page size.
    #[instrument(skip(self, cancel))]
    pub async fn get_filtered(
        &self,
        filter: &InstanceFilter,
        skip: u32,
        take: u32,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkflowInstance>, PersistenceError> {
        cancellable(cancel, async {
            let query = Query::new(filter.to_filter())
                .order_by(SortKey::asc(instance::CREATE_TIME))
                .order_by(SortKey::asc(fields::ID))
                .skip(u64::from(skip))
                .take(u64::from(take.min(self.max_page_size)));

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
}
