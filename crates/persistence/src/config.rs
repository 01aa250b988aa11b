//! Persistence configuration

use serde::{Deserialize, Serialize};

/// Default prefix of every collection name
pub const DEFAULT_COLLECTION_PREFIX: &str = "wfc";

/// Collection holding each record type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CollectionNames {
    pub workflows: String,
    pub subscriptions: String,
    pub events: String,
    pub errors: String,
}

impl CollectionNames {
    /// Names under a common prefix, e.g. `wfc.workflows`
    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            workflows: format!("{prefix}.workflows"),
            subscriptions: format!("{prefix}.subscriptions"),
            events: format!("{prefix}.events"),
            errors: format!("{prefix}.errors"),
        }
    }
}

impl Default for CollectionNames {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_COLLECTION_PREFIX)
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistenceConfig {
    /// Collection names
    pub collections: CollectionNames,

    /// Upper bound on `take` for paged instance queries
    pub max_page_size: u32,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            collections: CollectionNames::default(),
            max_page_size: 1000,
        }
    }
}

impl PersistenceConfig {
    /// Create a new persistence configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let collections = std::env::var("WFC_COLLECTION_PREFIX")
            .ok()
            .filter(|prefix| !prefix.is_empty())
            .map(|prefix| CollectionNames::with_prefix(&prefix))
            .unwrap_or(defaults.collections);

        let max_page_size = std::env::var("WFC_MAX_PAGE_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_page_size);

        Self {
            collections,
            ..Default::default()
        }
        .with_max_page_size(max_page_size)
    }

    /// Set collection names
    pub fn with_collections(mut self, collections: CollectionNames) -> Self {
        self.collections = collections;
        self
    }

    /// Set maximum page size
    pub fn with_max_page_size(mut self, size: u32) -> Self {
        self.max_page_size = size.max(1);
        self
    }
}
