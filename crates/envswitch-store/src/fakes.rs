//! In-memory document store (testing and `memory` profiles)
//!
//! `MemoryDocumentStore` satisfies the `DocumentStore` contract without any
//! external dependencies. Optional capabilities can be switched on or off and
//! individual collections can be made to fail, so callers can exercise both
//! the fast paths and the degraded fallbacks of the switching engine.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use crate::document::{
    group_key, ConnectionIdentity, Document, GroupedTopN, IndexDescriptor, SortKey,
};
use crate::error::StoreError;
use crate::storage_traits::{DocumentStore, StoreResult};

#[derive(Debug, Default, Clone)]
struct MemoryCollection {
    documents: Vec<Document>,
    /// Explicit indexes; `_id_` is implied
    indexes: Vec<IndexDescriptor>,
}

/// Toggles for optional capabilities.
#[derive(Debug, Clone, Copy)]
pub struct MemoryCapabilities {
    pub grouped_top_n: bool,
    pub drop_database: bool,
    pub index_creation: bool,
}

impl Default for MemoryCapabilities {
    fn default() -> Self {
        Self {
            grouped_top_n: false,
            drop_database: true,
            index_creation: true,
        }
    }
}

#[derive(Debug, Default)]
struct FailurePlan {
    reads: HashSet<String>,
    inserts: HashSet<String>,
    deletes: HashSet<String>,
    indexes: HashSet<String>,
}

/// In-memory document store backed by a `BTreeMap<collection, documents>`.
#[derive(Debug)]
pub struct MemoryDocumentStore {
    name: String,
    collections: Mutex<BTreeMap<String, MemoryCollection>>,
    capabilities: MemoryCapabilities,
    failures: Mutex<FailurePlan>,
    probes: AtomicUsize,
}

impl MemoryDocumentStore {
    /// Create an empty store. `name` feeds the connection identity.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            collections: Mutex::new(BTreeMap::new()),
            capabilities: MemoryCapabilities::default(),
            failures: Mutex::new(FailurePlan::default()),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn with_capabilities(mut self, capabilities: MemoryCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_grouped_top_n(mut self, enabled: bool) -> Self {
        self.capabilities.grouped_top_n = enabled;
        self
    }

    pub fn with_drop_database(mut self, enabled: bool) -> Self {
        self.capabilities.drop_database = enabled;
        self
    }

    pub fn with_index_creation(mut self, enabled: bool) -> Self {
        self.capabilities.index_creation = enabled;
        self
    }

    /// Make every read of `collection` fail.
    pub fn fail_reads_on(&self, collection: &str) {
        self.failures().reads.insert(collection.to_string());
    }

    /// Make every insert into `collection` fail.
    pub fn fail_inserts_on(&self, collection: &str) {
        self.failures().inserts.insert(collection.to_string());
    }

    /// Make `delete_all` on `collection` fail.
    pub fn fail_deletes_on(&self, collection: &str) {
        self.failures().deletes.insert(collection.to_string());
    }

    /// Make index creation on `collection` fail.
    pub fn fail_indexes_on(&self, collection: &str) {
        self.failures().indexes.insert(collection.to_string());
    }

    /// Number of capability probes answered so far.
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Synchronous seeding helper; creates the collection if needed.
    pub fn seed(&self, collection: &str, documents: Vec<Document>) {
        let mut collections = self.collections();
        collections
            .entry(collection.to_string())
            .or_default()
            .documents
            .extend(documents);
    }

    /// Synchronous index seeding helper.
    pub fn seed_index(&self, collection: &str, index: IndexDescriptor) {
        let mut collections = self.collections();
        let entry = collections.entry(collection.to_string()).or_default();
        entry.indexes.retain(|i| i.name != index.name);
        entry.indexes.push(index.without_build_hints());
    }

    /// Synchronous view of a collection's documents.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections()
            .get(collection)
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    /// Synchronous view of every collection name.
    pub fn collection_names(&self) -> Vec<String> {
        self.collections().keys().cloned().collect()
    }

    fn collections(&self) -> MutexGuard<'_, BTreeMap<String, MemoryCollection>> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn failures(&self) -> MutexGuard<'_, FailurePlan> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_read(&self, collection: &str) -> StoreResult<()> {
        if self.failures().reads.contains(collection) {
            return Err(StoreError::Connection(format!(
                "injected read failure on {}",
                collection
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn identity(&self) -> ConnectionIdentity {
        ConnectionIdentity::from_descriptor(&format!("memory://{}", self.name))
    }

    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        Ok(self.collection_names())
    }

    async fn find_all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        self.check_read(collection)?;
        Ok(self.documents(collection))
    }

    async fn find_sorted(
        &self,
        collection: &str,
        sort: &[SortKey],
    ) -> StoreResult<Vec<Document>> {
        self.check_read(collection)?;
        let mut documents = self.documents(collection);
        SortKey::sort_documents(&mut documents, sort);
        Ok(documents)
    }

    async fn find_by_id(&self, collection: &str, id: &Value) -> StoreResult<Option<Document>> {
        self.check_read(collection)?;
        Ok(self
            .collections()
            .get(collection)
            .and_then(|c| c.documents.iter().find(|d| d.id() == id).cloned()))
    }

    async fn list_indexes(&self, collection: &str) -> StoreResult<Vec<IndexDescriptor>> {
        self.check_read(collection)?;
        let collections = self.collections();
        let Some(entry) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        let mut indexes = vec![IndexDescriptor::implicit_id()];
        indexes.extend(entry.indexes.iter().cloned());
        Ok(indexes)
    }

    async fn supports_grouped_top_n(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.capabilities.grouped_top_n
    }

    /// Groups with a hash map and sorts each group independently, which is a
    /// different route to the same set the client-side fallback produces.
    async fn grouped_top_n(
        &self,
        collection: &str,
        query: &GroupedTopN,
    ) -> StoreResult<Vec<Document>> {
        if !self.capabilities.grouped_top_n {
            return Err(StoreError::unsupported("grouped_top_n"));
        }
        self.check_read(collection)?;

        let mut groups: HashMap<String, Vec<Document>> = HashMap::new();
        for document in self.documents(collection) {
            let key = group_key(document.get(&query.parent_field));
            groups.entry(key).or_default().push(document);
        }

        let within_group = [
            SortKey::desc(&query.recency_field),
            SortKey::desc(crate::document::ID_FIELD),
        ];
        let mut selected = Vec::new();
        for (_, mut group) in groups {
            SortKey::sort_documents(&mut group, &within_group);
            selected.extend(group.into_iter().take(query.limit));
        }
        Ok(selected)
    }

    async fn insert_many(&self, collection: &str, documents: &[Document]) -> StoreResult<()> {
        if self.failures().inserts.contains(collection) {
            return Err(StoreError::Query(format!(
                "injected insert failure on {}",
                collection
            )));
        }

        let mut collections = self.collections();
        let entry = collections.entry(collection.to_string()).or_default();
        let mut seen: HashSet<String> = entry.documents.iter().map(Document::id_key).collect();
        for document in documents {
            if !seen.insert(document.id_key()) {
                return Err(StoreError::DuplicateKey {
                    collection: collection.to_string(),
                    id: document.id_key(),
                });
            }
        }
        entry.documents.extend(documents.iter().cloned());
        Ok(())
    }

    async fn upsert(&self, collection: &str, document: &Document) -> StoreResult<()> {
        let mut collections = self.collections();
        let entry = collections.entry(collection.to_string()).or_default();
        match entry.documents.iter_mut().find(|d| d.id() == document.id()) {
            Some(existing) => *existing = document.clone(),
            None => entry.documents.push(document.clone()),
        }
        Ok(())
    }

    async fn create_index(&self, collection: &str, index: &IndexDescriptor) -> StoreResult<()> {
        if !self.capabilities.index_creation {
            return Err(StoreError::unsupported("create_index"));
        }
        if self.failures().indexes.contains(collection) {
            return Err(StoreError::Query(format!(
                "injected index failure on {}.{}",
                collection, index.name
            )));
        }
        self.seed_index(collection, index.clone());
        Ok(())
    }

    async fn drop_database(&self) -> StoreResult<()> {
        if !self.capabilities.drop_database {
            return Err(StoreError::unsupported("drop_database"));
        }
        self.collections().clear();
        Ok(())
    }

    async fn delete_all(&self, collection: &str) -> StoreResult<()> {
        if self.failures().deletes.contains(collection) {
            return Err(StoreError::Query(format!(
                "injected delete failure on {}",
                collection
            )));
        }
        if let Some(entry) = self.collections().get_mut(collection) {
            entry.documents.clear();
        }
        Ok(())
    }
}
