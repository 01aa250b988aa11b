//! DocumentStore trait definition

use async_trait::async_trait;

use super::query::{Document, Filter, IndexDefinition, Patch, Query};

/// Error type for document store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Insert collided with an existing document
    #[error("document already exists: {collection}/{id}")]
    AlreadyExists { collection: String, id: String },

    /// Patch targeted a document that does not exist
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// Store could not be reached (network, pool exhaustion, timeout)
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Query or index definition the backend cannot express
    #[error("invalid query: {0}")]
    InvalidQuery(String),
}

impl StoreError {
    /// Whether retrying the same call later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Document store consumed by the repositories
///
/// Implementations must be thread-safe and support concurrent access from
/// many engine hosts. Cancellation is cooperative: dropping any returned
/// future abandons the operation, and an uncommitted [`UnitOfWork`] is
/// discarded when dropped.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Open a short-lived unit of work
    async fn open_session(&self) -> Result<Box<dyn UnitOfWork>, StoreError>;

    /// Atomically apply `patch` to every document in `collection` matching
    /// `filter`
    ///
    /// The predicate is evaluated by the store against the current version of
    /// each document, so two racing patches with mutually exclusive
    /// predicates never both apply. Returns the number of documents patched.
    async fn patch_where(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Patch,
    ) -> Result<u64, StoreError>;

    /// Insert a batch of new documents
    ///
    /// All-or-nothing: on any failure, including an id collision, no document
    /// of the batch is stored.
    async fn bulk_insert(
        &self,
        collection: &str,
        documents: Vec<(String, Document)>,
    ) -> Result<(), StoreError>;

    /// Create the given indexes if they do not exist yet
    async fn provision(&self, indexes: &[IndexDefinition]) -> Result<(), StoreError>;
}

/// A unit of work over the store
///
/// Reads observe the store as of the call. Writes become visible to other
/// sessions only after [`UnitOfWork::commit`] succeeds.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Load a document by id
    async fn load(&mut self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Load the documents with the given ids; absent ids are skipped
    async fn load_many(
        &mut self,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<Document>, StoreError>;

    /// Run a filtered query through the collection's indexes
    ///
    /// Index-backed results may lag behind committed writes.
    async fn query(&mut self, collection: &str, query: &Query)
        -> Result<Vec<Document>, StoreError>;

    /// Stage a new document; fails with [`StoreError::AlreadyExists`] on an
    /// id collision, at the latest on commit
    async fn insert(
        &mut self,
        collection: &str,
        id: &str,
        document: Document,
    ) -> Result<(), StoreError>;

    /// Stage a patch of an existing document; fails with
    /// [`StoreError::NotFound`] when it is absent, at the latest on commit
    async fn patch(&mut self, collection: &str, id: &str, patch: &Patch)
        -> Result<(), StoreError>;

    /// Stage a delete; deleting an absent document is not an error
    async fn delete(&mut self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// Commit all staged writes atomically
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;
}
