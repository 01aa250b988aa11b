//! # Workflow Persistence
//!
//! Durable storage for a workflow orchestration engine on top of a generic
//! document store.
//!
//! ## Features
//!
//! - **Workflow instances**: runnable polling, batch lookup and stable paged listing
//! - **Event subscriptions**: name/key matching with an atomic token lease, so
//!   concurrent engine hosts never deliver one event to a subscription twice
//! - **Events**: runnable polling with processed/unprocessed bookkeeping
//! - **Execution errors**: all-or-nothing batch append
//! - **Cooperative cancellation**: every operation takes a [`CancellationToken`]
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    PersistenceProvider                       │
//! │  (provisions once, hands out the repositories)              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  WorkflowInstance / EventSubscription / Event repositories  │
//! │  ExecutionErrorSink                                         │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      DocumentStore                           │
//! │  (InMemoryDocumentStore, PostgresDocumentStore over JSONB)  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use chrono::{Duration, Utc};
//! use tokio_util::sync::CancellationToken;
//! use workflow_persistence::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), PersistenceError> {
//! let cancel = CancellationToken::new();
//! let store = Arc::new(InMemoryDocumentStore::new());
//! let provider = PersistenceProvider::new(store, PersistenceConfig::default(), &cancel).await?;
//!
//! let now = Utc::now();
//! let sub = EventSubscription::new("wf-1", "order-paid", "order-17", now);
//! let id = provider.subscriptions().create(&sub, &cancel).await?;
//!
//! let expiry = now + Duration::seconds(30);
//! let claimed = provider
//!     .subscriptions()
//!     .claim_token(&id, "token-a", "worker-1", expiry, &cancel)
//!     .await?;
//! assert!(claimed);
//! # Ok(())
//! # }
//! ```
//!
//! [`CancellationToken`]: tokio_util::sync::CancellationToken

pub mod config;
pub mod document;
pub mod error;
pub mod model;
pub mod provider;
pub mod repository;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{CollectionNames, PersistenceConfig};
    pub use crate::document::{
        DocumentStore, InMemoryDocumentStore, PostgresDocumentStore, PostgresStoreConfig,
        StoreError,
    };
    pub use crate::error::PersistenceError;
    pub use crate::model::{
        Event, EventSubscription, ExecutionError, WorkflowInstance, WorkflowStatus,
    };
    pub use crate::provider::PersistenceProvider;
    pub use crate::repository::{
        EventRepository, EventSubscriptionRepository, ExecutionErrorSink, InstanceFilter,
        WorkflowInstanceRepository,
    };
}

// Re-export key types at crate root
pub use config::{CollectionNames, PersistenceConfig};
pub use document::{
    DocumentStore, InMemoryDocumentStore, IndexMode, PostgresDocumentStore, PostgresStoreConfig,
    StoreError,
};
pub use error::PersistenceError;
pub use model::{Event, EventSubscription, ExecutionError, WorkflowInstance, WorkflowStatus};
pub use provider::PersistenceProvider;
pub use repository::{
    provision, EventRepository, EventSubscriptionRepository, ExecutionErrorSink, InstanceFilter,
    Provisioned, WorkflowInstanceRepository,
};
