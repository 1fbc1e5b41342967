//! Replays a [`Snapshot`] into a live store.
//!
//! The target is cleared first (whole-database drop, else per-collection
//! deletes). Documents are then inserted collection by collection; any insert
//! failure aborts the restore. Indexes are recreated concurrently per
//! collection and their failures are collected rather than raised.

use envswitch_store::{DocumentStore, IndexDescriptor, StoreError};
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::metrics::METRICS;
use crate::snapshot::Snapshot;

/// What a restore did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    /// Whether the whole database was dropped (vs. per-collection deletes)
    pub dropped_database: bool,
    /// Collections whose delete failed during the fallback clear
    pub delete_failures: usize,
    pub collections: usize,
    pub documents: usize,
    pub indexes_created: usize,
    pub indexes_failed: usize,
}

/// The definition recreated on restore: the name and key, the flags that
/// were explicitly set in the source, and a background-build hint.
pub fn restorable_index(source: &IndexDescriptor) -> IndexDescriptor {
    let mut index = IndexDescriptor::new(source.name.clone(), source.key.clone());
    if source.unique == Some(true) {
        index.unique = Some(true);
    }
    if source.sparse == Some(true) {
        index.sparse = Some(true);
    }
    index.expire_after_seconds = source.expire_after_seconds;
    index.partial_filter_expression = match &source.partial_filter_expression {
        Some(Value::Object(filter)) if !filter.is_empty() => Some(Value::Object(filter.clone())),
        _ => None,
    };
    index.background = Some(true);
    index
}

struct IndexFailure {
    collection: String,
    index: String,
    error: StoreError,
}

#[derive(Debug, Default)]
pub struct RestoreEngine;

impl RestoreEngine {
    pub fn new() -> Self {
        Self
    }

    #[instrument(skip_all, fields(store = %store.identity().short(), collections = snapshot.collections.len()))]
    pub async fn restore(&self, store: &dyn DocumentStore, snapshot: &Snapshot) -> Result<RestoreReport> {
        let mut report = RestoreReport::default();
        self.clear(store, &mut report).await?;

        let mut failures = Vec::new();
        let mut attempted = 0;

        for (collection, documents) in &snapshot.collections {
            if !documents.is_empty() {
                debug!(collection = %collection, documents = documents.len(), "inserting documents");
                store.insert_many(collection, documents).await?;
                report.documents += documents.len();
            }
            report.collections += 1;

            let indexes: Vec<IndexDescriptor> = snapshot
                .indexes
                .get(collection)
                .map(|indexes| {
                    indexes
                        .iter()
                        .filter(|i| !i.is_implicit_id())
                        .map(restorable_index)
                        .collect()
                })
                .unwrap_or_default();
            attempted += indexes.len();

            let results = join_all(indexes.iter().map(|index| async move {
                debug!(collection = %collection, index = %index.name, "creating index");
                (index, store.create_index(collection, index).await)
            }))
            .await;

            for (index, result) in results {
                match result {
                    Ok(()) => report.indexes_created += 1,
                    Err(error) => failures.push(IndexFailure {
                        collection: collection.clone(),
                        index: index.name.clone(),
                        error,
                    }),
                }
            }
        }

        report.indexes_failed = failures.len();
        if !failures.is_empty() && failures.len() == attempted {
            warn!(
                failed = failures.len(),
                first_error = %failures[0].error,
                "every index creation failed; the target store may not support these index definitions"
            );
        } else {
            for failure in &failures {
                warn!(
                    collection = %failure.collection,
                    index = %failure.index,
                    error = %failure.error,
                    "failed to create index"
                );
            }
        }

        METRICS.add_documents_restored(report.documents as u64);
        METRICS.add_index_failures(report.indexes_failed as u64);
        info!(
            documents = report.documents,
            indexes_created = report.indexes_created,
            indexes_failed = report.indexes_failed,
            "restore complete"
        );
        Ok(report)
    }

    async fn clear(&self, store: &dyn DocumentStore, report: &mut RestoreReport) -> Result<()> {
        match store.drop_database().await {
            Ok(()) => {
                report.dropped_database = true;
                return Ok(());
            }
            Err(e) if e.is_unsupported() => {
                debug!("drop_database unsupported, deleting collections individually");
            }
            Err(e) => {
                warn!(error = %e, "drop_database failed, deleting collections individually");
            }
        }

        for collection in store.list_collections().await? {
            if let Err(e) = store.delete_all(&collection).await {
                warn!(collection = %collection, error = %e, "failed to clear collection, skipping");
                report.delete_failures += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envswitch_store::fakes::MemoryDocumentStore;
    use envswitch_store::{Document, IndexKey};
    use serde_json::json;

    fn doc(value: serde_json::Value) -> Document {
        Document::from_value(value).unwrap()
    }

    fn snapshot_with(collection: &str, documents: Vec<Document>, indexes: Vec<IndexDescriptor>) -> Snapshot {
        let mut snapshot = Snapshot::default();
        snapshot.collections.insert(collection.to_string(), documents);
        snapshot.indexes.insert(collection.to_string(), indexes);
        snapshot
    }

    #[test]
    fn restorable_index_carries_only_explicit_flags() {
        let source = IndexDescriptor::new("ttl_idx", vec![IndexKey::asc("createdAt")])
            .with_unique(false)
            .with_sparse(true)
            .with_expire_after_seconds(3600)
            .with_partial_filter(json!({}));

        let index = restorable_index(&source);

        assert_eq!(index.unique, None);
        assert_eq!(index.sparse, Some(true));
        assert_eq!(index.expire_after_seconds, Some(3600));
        assert_eq!(index.partial_filter_expression, None);
        assert_eq!(index.background, Some(true));
    }

    #[tokio::test]
    async fn falls_back_to_per_collection_delete() {
        let store = MemoryDocumentStore::new("no-drop").with_drop_database(false);
        store.seed("stale", vec![doc(json!({"_id": 1}))]);
        store.seed("locked", vec![doc(json!({"_id": 1}))]);
        store.fail_deletes_on("locked");

        let report = RestoreEngine::new()
            .restore(&store, &snapshot_with("users", vec![doc(json!({"_id": 7}))], vec![]))
            .await
            .unwrap();

        assert!(!report.dropped_database);
        assert_eq!(report.delete_failures, 1);
        assert!(store.documents("stale").is_empty());
        assert_eq!(store.documents("locked").len(), 1);
        assert_eq!(store.documents("users").len(), 1);
    }

    #[tokio::test]
    async fn insert_failure_aborts() {
        let store = MemoryDocumentStore::new("broken-insert");
        store.fail_inserts_on("users");

        let result = RestoreEngine::new()
            .restore(&store, &snapshot_with("users", vec![doc(json!({"_id": 1}))], vec![]))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn empty_collections_skip_insert_but_get_indexes() {
        let store = MemoryDocumentStore::new("empty-coll");
        store.fail_inserts_on("users");

        let report = RestoreEngine::new()
            .restore(
                &store,
                &snapshot_with(
                    "users",
                    vec![],
                    vec![
                        IndexDescriptor::implicit_id(),
                        IndexDescriptor::new("email_idx", vec![IndexKey::asc("email")]),
                    ],
                ),
            )
            .await
            .unwrap();

        assert_eq!(report.documents, 0);
        assert_eq!(report.indexes_created, 1);
    }

    #[tokio::test]
    async fn index_failures_are_not_fatal() {
        let store = MemoryDocumentStore::new("no-index").with_index_creation(false);

        let report = RestoreEngine::new()
            .restore(
                &store,
                &snapshot_with(
                    "users",
                    vec![doc(json!({"_id": 1}))],
                    vec![
                        IndexDescriptor::new("email_idx", vec![IndexKey::asc("email")]),
                        IndexDescriptor::new("name_idx", vec![IndexKey::desc("name")]),
                    ],
                ),
            )
            .await
            .unwrap();

        assert_eq!(report.documents, 1);
        assert_eq!(report.indexes_created, 0);
        assert_eq!(report.indexes_failed, 2);
    }
}
