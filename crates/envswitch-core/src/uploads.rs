//! Upload-collection guard rails for development.
//!
//! In development, upload documents that came over from production still
//! point at files in production cloud storage. Mutating them from development
//! would touch those files, so [`UploadPolicy::check_mutation`] only lets
//! development touch documents it created itself. Hosts reach it through
//! [`HostHandle::check_upload_mutation`](crate::adapter::HostHandle::check_upload_mutation).

use std::collections::{BTreeMap, BTreeSet};

use envswitch_store::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::environment::Environment;
use crate::error::{Result, SwitchError};
use crate::schema::SchemaRegistry;

/// Marker field stamped on upload documents created in development.
pub const CREATED_DURING_DEVELOPMENT: &str = "createdDuringDevelopment";

/// Per-collection cloud storage settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStorage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
}

/// Where development writes uploaded files.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum FileStorageMode {
    /// Local disk; cloud storage is off in development.
    #[default]
    FileSystem,
    /// Cloud storage under a development prefix.
    CloudStorage {
        prefix: String,
        #[serde(default)]
        collections: BTreeMap<String, CollectionStorage>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOperation {
    Create,
    Update,
    Delete,
}

#[derive(Debug, Clone, Default)]
pub struct UploadPolicy {
    mode: FileStorageMode,
    upload_collections: BTreeSet<String>,
}

impl UploadPolicy {
    pub fn new(mode: FileStorageMode) -> Self {
        Self {
            mode,
            upload_collections: BTreeSet::new(),
        }
    }

    /// Guard the upload collections declared in `schema`.
    pub fn with_schema(mut self, schema: &SchemaRegistry) -> Self {
        self.upload_collections = schema.upload_collections().map(str::to_string).collect();
        self
    }

    pub fn mode(&self) -> &FileStorageMode {
        &self.mode
    }

    pub fn is_upload_collection(&self, slug: &str) -> bool {
        self.upload_collections.contains(slug)
    }

    pub fn cloud_storage_active(&self, env: Environment) -> bool {
        match env {
            Environment::Production => true,
            Environment::Development => matches!(self.mode, FileStorageMode::CloudStorage { .. }),
        }
    }

    pub fn local_storage_active(&self, env: Environment) -> bool {
        env == Environment::Development && !self.cloud_storage_active(env)
    }

    /// Storage prefix for files of `collection`, or `None` when the
    /// collection's own prefix applies unchanged.
    ///
    /// In development cloud mode the development prefix is prepended, so a
    /// `staging` prefix over a `public` collection gives `staging/public`.
    pub fn storage_prefix(&self, env: Environment, collection: &str) -> Option<String> {
        let FileStorageMode::CloudStorage { prefix, collections } = &self.mode else {
            return None;
        };
        if env != Environment::Development {
            return None;
        }

        let own = collections
            .get(collection)
            .and_then(|storage| storage.prefix.as_deref())
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty());
        let base = prefix.trim_matches('/');
        Some(match own {
            Some(own) if base.is_empty() => own.to_string(),
            Some(own) => format!("{base}/{own}"),
            None => base.to_string(),
        })
    }

    /// Reject development updates and deletes of upload documents that were
    /// not created in development.
    pub fn check_mutation(
        &self,
        env: Environment,
        collection: &str,
        operation: UploadOperation,
        documents: &[Document],
    ) -> Result<()> {
        if env != Environment::Development || !self.is_upload_collection(collection) {
            return Ok(());
        }

        let message = match operation {
            UploadOperation::Create => return Ok(()),
            UploadOperation::Update => {
                "Cannot update upload collection documents that were not created during development, as it will potentially modify the file(s) in cloud storage."
            }
            UploadOperation::Delete => {
                "Cannot delete upload collection documents that were not created during development, as it will delete the file(s) in cloud storage."
            }
        };

        if documents.iter().all(created_during_development) {
            Ok(())
        } else {
            Err(SwitchError::UploadRejected(message.to_string()))
        }
    }

    /// Mark a document being created in development.
    pub fn stamp_created_during_development(&self, env: Environment, collection: &str, document: &mut Document) {
        if env == Environment::Development && self.is_upload_collection(collection) {
            document.set(CREATED_DURING_DEVELOPMENT, Value::Bool(true));
        }
    }
}

fn created_during_development(document: &Document) -> bool {
    document.get(CREATED_DURING_DEVELOPMENT) == Some(&Value::Bool(true))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::EntityConfig;
    use serde_json::json;

    fn cloud_policy() -> UploadPolicy {
        let mode: FileStorageMode = serde_json::from_value(json!({
            "mode": "cloud-storage",
            "prefix": "staging",
            "collections": {"media": {"prefix": "public"}, "docs": {}}
        }))
        .unwrap();
        let schema = SchemaRegistry::new()
            .with_collection(EntityConfig::new("media").with_upload(true))
            .with_collection(EntityConfig::new("posts"));
        UploadPolicy::new(mode).with_schema(&schema)
    }

    fn doc(value: serde_json::Value) -> Document {
        Document::from_value(value).unwrap()
    }

    #[test]
    fn storage_activity_by_mode() {
        let local = UploadPolicy::new(FileStorageMode::FileSystem);
        assert!(local.cloud_storage_active(Environment::Production));
        assert!(!local.cloud_storage_active(Environment::Development));
        assert!(local.local_storage_active(Environment::Development));
        assert!(!local.local_storage_active(Environment::Production));

        let cloud = cloud_policy();
        assert!(cloud.cloud_storage_active(Environment::Development));
        assert!(!cloud.local_storage_active(Environment::Development));
    }

    #[test]
    fn prefixes_join_development_and_collection() {
        let policy = cloud_policy();
        assert_eq!(policy.storage_prefix(Environment::Development, "media").as_deref(), Some("staging/public"));
        assert_eq!(policy.storage_prefix(Environment::Development, "docs").as_deref(), Some("staging"));
        assert_eq!(policy.storage_prefix(Environment::Production, "media"), None);
    }

    #[test]
    fn development_rejects_foreign_upload_mutations() {
        let policy = cloud_policy();
        let imported = [doc(json!({"_id": 1, "filename": "a.png"}))];
        let own = [doc(json!({"_id": 2, "createdDuringDevelopment": true}))];

        let err = policy
            .check_mutation(Environment::Development, "media", UploadOperation::Delete, &imported)
            .unwrap_err();
        assert!(err.to_string().starts_with("Cannot delete upload collection documents"));
        assert!(policy
            .check_mutation(Environment::Development, "media", UploadOperation::Update, &own)
            .is_ok());
        assert!(policy
            .check_mutation(Environment::Production, "media", UploadOperation::Update, &imported)
            .is_ok());
        assert!(policy
            .check_mutation(Environment::Development, "posts", UploadOperation::Update, &imported)
            .is_ok());
    }

    #[test]
    fn stamps_only_upload_documents_in_development() {
        let policy = cloud_policy();
        let mut media = doc(json!({"_id": 1}));
        let mut post = doc(json!({"_id": 2}));
        policy.stamp_created_during_development(Environment::Development, "media", &mut media);
        policy.stamp_created_during_development(Environment::Development, "posts", &mut post);

        assert_eq!(media.get(CREATED_DURING_DEVELOPMENT), Some(&json!(true)));
        assert_eq!(post.get(CREATED_DURING_DEVELOPMENT), None);
    }
}
