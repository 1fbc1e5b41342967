//! Storage trait definition for envswitch
//!
//! [`DocumentStore`] is the only surface the switching engine uses to read
//! and write a live data store. Optional capabilities (server-side grouped
//! top-N, whole-database drop) have default implementations that report
//! [`StoreError::Unsupported`], so a backend opts in by overriding them.
//!
//! In-memory fakes are provided for testing via the `fakes` module.

use async_trait::async_trait;
use serde_json::Value;

use crate::document::{ConnectionIdentity, Document, GroupedTopN, IndexDescriptor, SortKey};
use crate::error::StoreError;

/// Result type for storage operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A live document store connection.
///
/// Guarantees:
/// - `list_collections` returns every physical collection, in a stable order.
/// - `find_all` returns every document of a collection; an unknown collection
///   yields an empty list.
/// - `insert_many` is all-or-nothing from the caller's point of view: an
///   error means the collection must be treated as not restored.
/// - `delete_all` removes documents but keeps index definitions.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Stable identity of the underlying connection, used to key caches.
    fn identity(&self) -> ConnectionIdentity;

    /// Enumerate every physical collection.
    async fn list_collections(&self) -> StoreResult<Vec<String>>;

    /// Read every document of a collection.
    async fn find_all(&self, collection: &str) -> StoreResult<Vec<Document>>;

    /// Read every document of a collection in the given order.
    async fn find_sorted(&self, collection: &str, sort: &[SortKey])
        -> StoreResult<Vec<Document>>;

    /// Read a single document by `_id`.
    async fn find_by_id(&self, collection: &str, id: &Value) -> StoreResult<Option<Document>>;

    /// List index definitions of a collection, including the implicit `_id_`
    /// index when the backend has one.
    async fn list_indexes(&self, collection: &str) -> StoreResult<Vec<IndexDescriptor>>;

    /// Whether [`DocumentStore::grouped_top_n`] can run server-side.
    ///
    /// Callers probe this once per [`ConnectionIdentity`] and cache it.
    async fn supports_grouped_top_n(&self) -> bool {
        false
    }

    /// Server-side "newest N per parent" selection.
    async fn grouped_top_n(
        &self,
        _collection: &str,
        _query: &GroupedTopN,
    ) -> StoreResult<Vec<Document>> {
        Err(StoreError::unsupported("grouped_top_n"))
    }

    /// Bulk insert. Fails on any document that cannot be written.
    async fn insert_many(&self, collection: &str, documents: &[Document]) -> StoreResult<()>;

    /// Insert or replace one document by `_id`.
    async fn upsert(&self, collection: &str, document: &Document) -> StoreResult<()>;

    /// Create (or replace) an index definition.
    async fn create_index(&self, collection: &str, index: &IndexDescriptor) -> StoreResult<()>;

    /// Atomically drop every collection.
    async fn drop_database(&self) -> StoreResult<()> {
        Err(StoreError::unsupported("drop_database"))
    }

    /// Delete every document of a collection.
    async fn delete_all(&self, collection: &str) -> StoreResult<()>;
}
