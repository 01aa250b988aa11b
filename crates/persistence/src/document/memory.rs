//! In-memory implementation of DocumentStore for testing

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, trace};

use super::query::{Document, Filter, IndexDefinition, Patch, Query};
use super::store::{DocumentStore, StoreError, UnitOfWork};

/// Documents of one collection, ordered by id
type Collection = BTreeMap<String, Document>;

type Collections = HashMap<String, Collection>;

/// How queries see writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexMode {
    /// Queries observe every committed write immediately
    #[default]
    Synchronous,

    /// Queries read a snapshot that only moves on
    /// [`InMemoryDocumentStore::refresh_indexes`], the way a lagging
    /// secondary index would
    Manual,
}

struct Inner {
    documents: RwLock<Collections>,
    index_snapshot: RwLock<Option<Collections>>,
    indexes: RwLock<Vec<IndexDefinition>>,
    latency: RwLock<Duration>,
    unavailable: AtomicBool,
}

impl Inner {
    /// Apply the configured latency and outage to one round trip
    async fn round_trip(&self) -> Result<(), StoreError> {
        let latency = *self.latency.read();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn run_query(&self, collection: &str, query: &Query) -> Vec<Document> {
        let snapshot = self.index_snapshot.read();
        let live = self.documents.read();
        let source = snapshot.as_ref().unwrap_or(&*live);

        let mut matched: Vec<Document> = source
            .get(collection)
            .map(|docs| {
                docs.values()
                    .filter(|doc| query.filter.matches(doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        // Stable sort keeps id order for documents equal under the sort keys
        matched.sort_by(|a, b| query.compare_documents(a, b));

        let skip = usize::try_from(query.skip).unwrap_or(usize::MAX);
        let take = query
            .take
            .map(|t| usize::try_from(t).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);

        matched.into_iter().skip(skip).take(take).collect()
    }
}

/// In-memory implementation of DocumentStore
///
/// This is primarily for testing. It provides the same atomicity as the
/// PostgreSQL implementation: conditional patches evaluate their predicate
/// and apply under one write lock, and a unit of work commits all of its
/// writes or none.
///
/// Cloning yields another handle to the same documents.
///
/// # Example
///
/// ```
/// use workflow_persistence::InMemoryDocumentStore;
///
/// let store = InMemoryDocumentStore::new();
/// assert_eq!(store.document_count("wfc.workflows"), 0);
/// ```
#[derive(Clone)]
pub struct InMemoryDocumentStore {
    inner: Arc<Inner>,
}

impl InMemoryDocumentStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                documents: RwLock::new(HashMap::new()),
                index_snapshot: RwLock::new(None),
                indexes: RwLock::new(Vec::new()),
                latency: RwLock::new(Duration::ZERO),
                unavailable: AtomicBool::new(false),
            }),
        }
    }

    /// Delay every store round trip by `latency`
    pub fn set_latency(&self, latency: Duration) {
        *self.inner.latency.write() = latency;
    }

    /// Make every subsequent round trip fail with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Switch between synchronous and manually refreshed indexes
    pub fn set_index_mode(&self, mode: IndexMode) {
        let mut snapshot = self.inner.index_snapshot.write();
        *snapshot = match mode {
            IndexMode::Synchronous => None,
            IndexMode::Manual => Some(self.inner.documents.read().clone()),
        };
    }

    /// Bring manual indexes up to date with committed writes
    pub fn refresh_indexes(&self) {
        let mut snapshot = self.inner.index_snapshot.write();
        if snapshot.is_some() {
            *snapshot = Some(self.inner.documents.read().clone());
        }
    }

    /// Get the number of documents in a collection
    pub fn document_count(&self, collection: &str) -> usize {
        self.inner
            .documents
            .read()
            .get(collection)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    /// All documents of a collection, ordered by id
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.inner
            .documents
            .read()
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Get a document by id, bypassing sessions
    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        self.inner
            .documents
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id).cloned())
    }

    /// Indexes provisioned so far
    pub fn provisioned_indexes(&self) -> Vec<IndexDefinition> {
        self.inner.indexes.read().clone()
    }

    /// Clear all data (for testing)
    pub fn clear(&self) {
        self.inner.documents.write().clear();
        if let Some(snapshot) = self.inner.index_snapshot.write().as_mut() {
            snapshot.clear();
        }
    }
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn open_session(&self) -> Result<Box<dyn UnitOfWork>, StoreError> {
        self.inner.round_trip().await?;
        Ok(Box::new(InMemorySession {
            inner: Arc::clone(&self.inner),
            staged: Vec::new(),
        }))
    }

    async fn patch_where(
        &self,
        collection: &str,
        filter: &Filter,
        patch: &Patch,
    ) -> Result<u64, StoreError> {
        self.inner.round_trip().await?;

        let mut documents = self.inner.documents.write();
        let Some(docs) = documents.get_mut(collection) else {
            return Ok(0);
        };

        let mut patched = 0;
        for doc in docs.values_mut().filter(|doc| filter.matches(doc)) {
            patch.apply(doc);
            patched += 1;
        }

        trace!(collection, patched, "patched by predicate");
        Ok(patched)
    }

    async fn bulk_insert(
        &self,
        collection: &str,
        documents: Vec<(String, Document)>,
    ) -> Result<(), StoreError> {
        self.inner.round_trip().await?;

        let mut all = self.inner.documents.write();
        let docs = all.entry(collection.to_string()).or_default();

        let mut seen = HashSet::with_capacity(documents.len());
        for (id, _) in &documents {
            if docs.contains_key(id) || !seen.insert(id.as_str()) {
                return Err(StoreError::AlreadyExists {
                    collection: collection.to_string(),
                    id: id.clone(),
                });
            }
        }

        let count = documents.len();
        docs.extend(documents);
        debug!(collection, count, "bulk inserted documents");
        Ok(())
    }

    async fn provision(&self, indexes: &[IndexDefinition]) -> Result<(), StoreError> {
        self.inner.round_trip().await?;

        let mut provisioned = self.inner.indexes.write();
        for index in indexes {
            if !provisioned.iter().any(|i| i.name == index.name) {
                provisioned.push(index.clone());
            }
        }
        Ok(())
    }
}

/// Write staged in an in-memory unit of work
enum StagedWrite {
    Insert {
        collection: String,
        id: String,
        document: Document,
    },
    Patch {
        collection: String,
        id: String,
        patch: Patch,
    },
    Delete {
        collection: String,
        id: String,
    },
}

struct InMemorySession {
    inner: Arc<Inner>,
    staged: Vec<StagedWrite>,
}

impl InMemorySession {
    fn exists(&self, collection: &str, id: &str) -> bool {
        self.inner
            .documents
            .read()
            .get(collection)
            .is_some_and(|docs| docs.contains_key(id))
    }
}

#[async_trait]
impl UnitOfWork for InMemorySession {
    async fn load(&mut self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.inner.round_trip().await?;
        Ok(self
            .inner
            .documents
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id).cloned()))
    }

    async fn load_many(
        &mut self,
        collection: &str,
        ids: &[String],
    ) -> Result<Vec<Document>, StoreError> {
        self.inner.round_trip().await?;
        let documents = self.inner.documents.read();
        let Some(docs) = documents.get(collection) else {
            return Ok(vec![]);
        };
        Ok(ids.iter().filter_map(|id| docs.get(id).cloned()).collect())
    }

    async fn query(
        &mut self,
        collection: &str,
        query: &Query,
    ) -> Result<Vec<Document>, StoreError> {
        self.inner.round_trip().await?;
        Ok(self.inner.run_query(collection, query))
    }

    async fn insert(
        &mut self,
        collection: &str,
        id: &str,
        document: Document,
    ) -> Result<(), StoreError> {
        if self.exists(collection, id) {
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        self.staged.push(StagedWrite::Insert {
            collection: collection.to_string(),
            id: id.to_string(),
            document,
        });
        Ok(())
    }

    async fn patch(
        &mut self,
        collection: &str,
        id: &str,
        patch: &Patch,
    ) -> Result<(), StoreError> {
        self.staged.push(StagedWrite::Patch {
            collection: collection.to_string(),
            id: id.to_string(),
            patch: patch.clone(),
        });
        Ok(())
    }

    async fn delete(&mut self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.staged.push(StagedWrite::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let InMemorySession { inner, staged } = *self;
        if staged.is_empty() {
            return Ok(());
        }
        inner.round_trip().await?;

        let mut documents = inner.documents.write();

        // Resolve every write against an overlay first so a failing write
        // leaves the store untouched.
        let mut overlay: HashMap<(String, String), Option<Document>> = HashMap::new();
        for write in staged {
            match write {
                StagedWrite::Insert {
                    collection,
                    id,
                    document,
                } => {
                    let key = (collection, id);
                    if current(&documents, &overlay, &key).is_some() {
                        return Err(StoreError::AlreadyExists {
                            collection: key.0,
                            id: key.1,
                        });
                    }
                    overlay.insert(key, Some(document));
                }
                StagedWrite::Patch {
                    collection,
                    id,
                    patch,
                } => {
                    let key = (collection, id);
                    let Some(mut document) = current(&documents, &overlay, &key) else {
                        return Err(StoreError::NotFound {
                            collection: key.0,
                            id: key.1,
                        });
                    };
                    patch.apply(&mut document);
                    overlay.insert(key, Some(document));
                }
                StagedWrite::Delete { collection, id } => {
                    overlay.insert((collection, id), None);
                }
            }
        }

        for ((collection, id), document) in overlay {
            let docs = documents.entry(collection).or_default();
            match document {
                Some(document) => {
                    docs.insert(id, document);
                }
                None => {
                    docs.remove(&id);
                }
            }
        }
        Ok(())
    }
}

fn current(
    documents: &Collections,
    overlay: &HashMap<(String, String), Option<Document>>,
    key: &(String, String),
) -> Option<Document> {
    match overlay.get(key) {
        Some(staged) => staged.clone(),
        None => documents
            .get(&key.0)
            .and_then(|docs| docs.get(&key.1).cloned()),
    }
}
