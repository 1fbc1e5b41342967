//! Portable snapshots of a document store
//!
//! [`SnapshotEngine::backup`] walks every physical collection and applies the
//! resolved copy modes. Version-history collections under
//! [`CopyMode::LatestX`] keep the newest records of each parent, selected
//! either by the store's grouped top-N capability or by a sorted single-pass
//! fallback. Both routes retain the same set of records.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use envswitch_store::{
    group_key, ConnectionIdentity, Document, DocumentStore, GroupedTopN, IndexDescriptor,
    SortKey, ID_FIELD,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::adapter::ModelRegistry;
use crate::copy_policy::{
    resolve_document_scopes, resolve_version_group_modes, CollectionScope, CopyMode,
    ResolvedCopyConfig,
};
use crate::error::Result;
use crate::fsutil::write_atomic_async;
use crate::metrics::METRICS;
use crate::schema::SchemaRegistry;

/// Collections and index definitions captured from one store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub collections: BTreeMap<String, Vec<Document>>,
    pub indexes: BTreeMap<String, Vec<IndexDescriptor>>,
}

impl Snapshot {
    pub fn document_count(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    pub fn index_count(&self) -> usize {
        self.indexes.values().map(Vec::len).sum()
    }

    /// Serialized JSON size in bytes.
    pub fn size_bytes(&self) -> Result<usize> {
        Ok(serde_json::to_vec(self)?.len())
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Human-readable byte size, e.g. `"12.34 KB"`.
pub fn format_file_size(bytes: usize) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}

// ---------------------------------------------------------------------------
// Backup plan
// ---------------------------------------------------------------------------

/// Resolved per-collection copy modes for one backup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackupPlan {
    /// Physical version-history collection → mode
    pub version_modes: BTreeMap<String, CopyMode>,
    /// Physical base collection → document scopes
    pub document_scopes: BTreeMap<String, Vec<CollectionScope>>,
}

impl BackupPlan {
    /// Copy everything verbatim.
    pub fn copy_all() -> Self {
        Self::default()
    }

    pub fn resolve(schema: &SchemaRegistry, models: &ModelRegistry, config: &ResolvedCopyConfig) -> Self {
        Self {
            version_modes: resolve_version_group_modes(schema, models, config),
            document_scopes: resolve_document_scopes(schema, models, config),
        }
    }

    pub fn with_version_mode(mut self, collection: impl Into<String>, mode: CopyMode) -> Self {
        self.version_modes.insert(collection.into(), mode);
        self
    }

    pub fn with_document_scope(mut self, collection: impl Into<String>, scope: CollectionScope) -> Self {
        self.document_scopes
            .entry(collection.into())
            .or_default()
            .push(scope);
        self
    }
}

// ---------------------------------------------------------------------------
// SnapshotEngine
// ---------------------------------------------------------------------------

/// Builds snapshots; remembers which connections support grouped top-N.
#[derive(Debug, Default)]
pub struct SnapshotEngine {
    capability_cache: Mutex<HashMap<ConnectionIdentity, bool>>,
}

impl SnapshotEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture every collection of `store` according to `plan`.
    ///
    /// Any read failure aborts the backup; a partial snapshot is never returned.
    #[instrument(skip_all, fields(store = %store.identity().short()))]
    pub async fn backup(&self, store: &dyn DocumentStore, plan: &BackupPlan) -> Result<Snapshot> {
        let mut snapshot = Snapshot::default();

        for name in store.list_collections().await? {
            let documents = match plan.version_modes.get(&name) {
                Some(CopyMode::None) => {
                    debug!(collection = %name, "skipping version collection");
                    continue;
                }
                Some(CopyMode::All) => store.find_all(&name).await?,
                Some(CopyMode::LatestX(n)) => self.latest_versions(store, &name, *n as usize).await?,
                None => match plan.document_scopes.get(&name) {
                    Some(scopes) => select_scoped(store.find_all(&name).await?, scopes),
                    None => store.find_all(&name).await?,
                },
            };
            let indexes = store.list_indexes(&name).await?;

            debug!(
                collection = %name,
                documents = documents.len(),
                indexes = indexes.len(),
                "collection captured"
            );
            snapshot.collections.insert(name.clone(), documents);
            snapshot.indexes.insert(name, indexes);
        }

        METRICS.inc_snapshots();
        info!(
            collections = snapshot.collections.len(),
            documents = snapshot.document_count(),
            "snapshot created"
        );
        Ok(snapshot)
    }

    /// The `limit` newest records of every parent in `collection`.
    pub async fn latest_versions(
        &self,
        store: &dyn DocumentStore,
        collection: &str,
        limit: usize,
    ) -> Result<Vec<Document>> {
        let query = GroupedTopN::new(limit);

        if self.supports_grouped_top_n(store).await {
            match store.grouped_top_n(collection, &query).await {
                Ok(documents) => return Ok(documents),
                Err(e) if e.is_unsupported() => {
                    debug!(collection, "grouped top-N rejected, using sorted fallback");
                    self.remember(store.identity(), false);
                }
                Err(e) => return Err(e.into()),
            }
        }

        let sort_keys = query.sort_keys();
        let mut sorted = store.find_sorted(collection, &sort_keys).await?;
        // Server-side ORDER BY compares strings lexically and mixes types
        // differently per backend; the shared comparator decides.
        SortKey::sort_documents(&mut sorted, &sort_keys);
        Ok(take_latest_per_parent(sorted, &query))
    }

    /// Probe once per connection identity, then answer from the cache.
    pub async fn supports_grouped_top_n(&self, store: &dyn DocumentStore) -> bool {
        let identity = store.identity();
        if let Some(cached) = self.cached(&identity) {
            return cached;
        }
        let supported = store.supports_grouped_top_n().await;
        debug!(store = %identity.short(), supported, "probed grouped top-N capability");
        self.remember(identity, supported);
        supported
    }

    fn cached(&self, identity: &ConnectionIdentity) -> Option<bool> {
        self.capability_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(identity)
            .copied()
    }

    fn remember(&self, identity: ConnectionIdentity, supported: bool) {
        self.capability_cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(identity, supported);
    }
}

/// Keep the first `query.limit` records of each parent from a list sorted by
/// [`GroupedTopN::sort_keys`], in one forward pass.
///
/// Parents are told apart by [`group_key`], so `1` and `"1"` are separate
/// parents exactly as they are for a native grouped top-N.
pub fn take_latest_per_parent(sorted: Vec<Document>, query: &GroupedTopN) -> Vec<Document> {
    let mut taken: HashMap<String, usize> = HashMap::new();
    let mut kept = Vec::new();

    for document in sorted {
        let count = taken
            .entry(group_key(document.get(&query.parent_field)))
            .or_default();
        if *count < query.limit {
            kept.push(document);
            *count += 1;
        }
    }
    kept
}

/// Apply document scopes to one collection's records.
///
/// Each record belongs to the first scope it matches; records matching no
/// scope are kept.
fn select_scoped(documents: Vec<Document>, scopes: &[CollectionScope]) -> Vec<Document> {
    let mut buckets: Vec<Vec<Document>> = vec![Vec::new(); scopes.len()];
    let mut unscoped = Vec::new();

    for document in documents {
        match scopes.iter().position(|scope| scope.matches(&document)) {
            Some(i) => buckets[i].push(document),
            None => unscoped.push(document),
        }
    }

    let recency = [SortKey::desc("updatedAt"), SortKey::desc(ID_FIELD)];
    let mut selected = unscoped;
    for (scope, mut bucket) in scopes.iter().zip(buckets) {
        match scope.mode {
            CopyMode::All => selected.extend(bucket),
            CopyMode::None => {}
            CopyMode::LatestX(n) => {
                SortKey::sort_documents(&mut bucket, &recency);
                selected.extend(bucket.into_iter().take(n as usize));
            }
        }
    }
    selected
}

// ---------------------------------------------------------------------------
// Pending snapshot handoff
// ---------------------------------------------------------------------------

/// A snapshot parked on disk, restored after the next development connect.
#[derive(Debug, Clone)]
pub struct PendingSnapshot {
    path: PathBuf,
}

impl PendingSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub async fn write(&self, snapshot: &Snapshot) -> Result<()> {
        write_atomic_async(self.path.clone(), snapshot.to_json()?).await?;
        Ok(())
    }

    /// Read and delete the pending snapshot, if any.
    pub async fn take(&self) -> Result<Option<Snapshot>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        tokio::fs::remove_file(&self.path).await?;
        Ok(Some(Snapshot::from_json(&bytes)?))
    }
}

/// Identifiers of a document list, for comparisons in tests and reports.
pub fn id_set(documents: &[Document]) -> HashSet<String> {
    documents.iter().map(Document::id_key).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use envswitch_store::fakes::MemoryDocumentStore;
    use envswitch_store::IndexKey;
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_value(value).unwrap()
    }

    fn ids(values: &[&str]) -> HashSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn formats_sizes() {
        assert_eq!(format_file_size(0), "0.00 B");
        assert_eq!(format_file_size(1536), "1.50 KB");
        assert_eq!(format_file_size(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn forward_pass_restarts_count_per_parent() {
        let query = GroupedTopN::new(1);
        let sorted = vec![
            doc(json!({"_id": 3, "parent": "a"})),
            doc(json!({"_id": 2, "parent": "a"})),
            doc(json!({"_id": 5, "parent": "b"})),
            doc(json!({"_id": 9})),
        ];

        let kept = take_latest_per_parent(sorted, &query);
        assert_eq!(id_set(&kept), ids(&["3", "5", "9"]));
    }

    #[tokio::test]
    async fn capability_is_probed_once_per_connection() {
        let store = MemoryDocumentStore::new("probe").with_grouped_top_n(true);
        let engine = SnapshotEngine::new();

        assert!(engine.supports_grouped_top_n(&store).await);
        assert!(engine.supports_grouped_top_n(&store).await);
        assert_eq!(store.probe_count(), 1);
    }

    #[tokio::test]
    async fn none_mode_skips_collection_and_indexes() {
        let store = MemoryDocumentStore::new("skip");
        store.seed("_posts_versions", vec![doc(json!({"_id": 1, "parent": "p"}))]);
        store.seed_index(
            "_posts_versions",
            IndexDescriptor::new("parent_idx", vec![IndexKey::asc("parent")]),
        );
        store.seed("posts", vec![doc(json!({"_id": "p"}))]);

        let plan = BackupPlan::copy_all().with_version_mode("_posts_versions", CopyMode::None);
        let snapshot = SnapshotEngine::new().backup(&store, &plan).await.unwrap();

        assert!(!snapshot.collections.contains_key("_posts_versions"));
        assert!(!snapshot.indexes.contains_key("_posts_versions"));
        assert_eq!(snapshot.collections["posts"].len(), 1);
    }

    #[tokio::test]
    async fn document_scopes_filter_globals() {
        let store = MemoryDocumentStore::new("scopes");
        store.seed(
            "globals",
            vec![
                doc(json!({"_id": 1, "globalType": "header"})),
                doc(json!({"_id": 2, "globalType": "footer"})),
                doc(json!({"_id": 3, "globalType": "legacy"})),
            ],
        );

        let plan = BackupPlan::copy_all()
            .with_document_scope(
                "globals",
                CollectionScope::filtered(CopyMode::All, "globalType", json!("header")),
            )
            .with_document_scope(
                "globals",
                CollectionScope::filtered(CopyMode::None, "globalType", json!("footer")),
            );
        let snapshot = SnapshotEngine::new().backup(&store, &plan).await.unwrap();

        assert_eq!(
            id_set(&snapshot.collections["globals"]),
            ids(&["1", "3"])
        );
    }

    #[tokio::test]
    async fn latest_x_document_scope_keeps_newest() {
        let store = MemoryDocumentStore::new("latest-docs");
        store.seed(
            "posts",
            vec![
                doc(json!({"_id": 1, "updatedAt": "2024-01-01T00:00:00Z"})),
                doc(json!({"_id": 2, "updatedAt": "2024-03-01T00:00:00Z"})),
                doc(json!({"_id": 3, "updatedAt": "2024-02-01T00:00:00Z"})),
            ],
        );

        let plan = BackupPlan::copy_all()
            .with_document_scope("posts", CollectionScope::unfiltered(CopyMode::LatestX(2)));
        let snapshot = SnapshotEngine::new().backup(&store, &plan).await.unwrap();

        assert_eq!(
            id_set(&snapshot.collections["posts"]),
            ids(&["2", "3"])
        );
    }

    #[tokio::test]
    async fn read_failure_is_fatal() {
        let store = MemoryDocumentStore::new("broken");
        store.seed("users", vec![doc(json!({"_id": 1}))]);
        store.fail_reads_on("users");

        let result = SnapshotEngine::new().backup(&store, &BackupPlan::copy_all()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn pending_snapshot_is_taken_once() {
        let dir = tempfile::tempdir().unwrap();
        let pending = PendingSnapshot::new(dir.path().join("pending.json"));
        assert!(pending.take().await.unwrap().is_none());

        let mut snapshot = Snapshot::default();
        snapshot
            .collections
            .insert("users".into(), vec![doc(json!({"_id": 1}))]);
        pending.write(&snapshot).await.unwrap();
        assert!(pending.exists());

        assert_eq!(pending.take().await.unwrap(), Some(snapshot));
        assert!(!pending.exists());
        assert!(pending.take().await.unwrap().is_none());
    }
}
