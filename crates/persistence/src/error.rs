//! Errors surfaced to the workflow engine

use crate::document::StoreError;

/// Error type for repository operations
///
/// Lost conditional writes are not errors: claiming a held token and
/// releasing with a stale token report `false`, and deleting an absent
/// subscription succeeds.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Mutation targeted a record that does not exist
    #[error("record not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    /// Create collided with an existing id
    #[error("record already exists: {collection}/{id}")]
    AlreadyExists { collection: String, id: String },

    /// Abandoned on the caller's cancellation signal; nothing was committed
    #[error("operation cancelled")]
    Cancelled,

    /// Store failure, passed through untouched
    #[error("store error: {0}")]
    Store(StoreError),

    /// Record could not be encoded or a stored document decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl PersistenceError {
    /// Whether the scheduler may retry the call on its next poll
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_transient())
    }
}

impl From<StoreError> for PersistenceError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { collection, id } => Self::NotFound { collection, id },
            StoreError::AlreadyExists { collection, id } => Self::AlreadyExists { collection, id },
            StoreError::Serialization(message) => Self::Serialization(message),
            other => Self::Store(other),
        }
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}
