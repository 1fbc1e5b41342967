//! SurrealDB document store
//!
//! Maps the `DocumentStore` contract onto SurrealDB tables:
//! - every collection is a table, every document a record whose record id is
//!   the document's `_id` (the `_id` field is also stored verbatim)
//! - records created outside this store carry no `_id` field; reads project
//!   the record id's key into `_id` for them
//! - indexes are `DEFINE INDEX ... FIELDS ... [UNIQUE]` definitions
//! - `drop_database` removes the selected database
//!
//! Supports in-memory (`mem://`) and remote (`ws://`, `wss://`, `http(s)://`)
//! endpoints through `surrealdb::engine::any`. The client is created
//! unconnected so an adapter can be built first and connected later.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Namespace, Root};
use surrealdb::Surreal;
use tracing::{debug, info, instrument};

use crate::document::{
    ConnectionIdentity, Document, IndexDescriptor, IndexKey, SortKey,
};
use crate::error::StoreError;
use crate::storage_traits::{DocumentStore, StoreResult};

/// Which level a set of credentials signs in at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SurrealAuth {
    Root,
    Namespace,
    #[default]
    Database,
}

/// Connection parameters for one SurrealDB environment
#[derive(Debug, Clone)]
pub struct SurrealConfig {
    /// Endpoint URL (e.g., "mem://", "ws://127.0.0.1:8000", "wss://xxx.surrealdb.cloud")
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub auth: SurrealAuth,
}

impl SurrealConfig {
    pub fn new(
        endpoint: impl Into<String>,
        namespace: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            namespace: namespace.into(),
            database: database.into(),
            username: None,
            password: None,
            auth: SurrealAuth::default(),
        }
    }

    /// In-memory database, mostly for development and tests.
    pub fn in_memory(namespace: impl Into<String>, database: impl Into<String>) -> Self {
        Self::new("mem://", namespace, database)
    }

    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
        auth: SurrealAuth,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self.auth = auth;
        self
    }

    /// Whether the endpoint stays on this machine (in-memory, file-backed or loopback).
    pub fn is_local(&self) -> bool {
        let endpoint = self.endpoint.to_ascii_lowercase();
        endpoint.starts_with("mem://")
            || endpoint.starts_with("memory")
            || endpoint.starts_with("surrealkv://")
            || endpoint.contains("localhost")
            || endpoint.contains("127.0.0.1")
    }

    /// Descriptor the connection identity is derived from.
    pub fn descriptor(&self) -> String {
        format!("{}|{}|{}", self.endpoint, self.namespace, self.database)
    }
}

/// SurrealDB-backed `DocumentStore`
#[derive(Clone)]
pub struct SurrealDocumentStore {
    db: Surreal<Any>,
    config: SurrealConfig,
    identity: ConnectionIdentity,
}

#[derive(Debug, Deserialize)]
struct DbInfo {
    #[serde(default)]
    tables: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct TableInfo {
    #[serde(default)]
    indexes: BTreeMap<String, String>,
}

impl SurrealDocumentStore {
    /// Build an unconnected store; call [`SurrealDocumentStore::connect`] before use.
    pub fn new(config: SurrealConfig) -> Self {
        let identity = ConnectionIdentity::from_descriptor(&config.descriptor());
        Self {
            db: Surreal::init(),
            config,
            identity,
        }
    }

    /// Build and connect in one step.
    pub async fn setup(config: SurrealConfig) -> StoreResult<Self> {
        let store = Self::new(config);
        store.connect().await?;
        Ok(store)
    }

    pub fn config(&self) -> &SurrealConfig {
        &self.config
    }

    /// Connect, sign in when credentials are configured, and select ns/db.
    #[instrument(skip(self), fields(endpoint = %self.config.endpoint, namespace = %self.config.namespace, database = %self.config.database))]
    pub async fn connect(&self) -> StoreResult<()> {
        info!("Connecting to SurrealDB");

        self.db
            .connect(self.config.endpoint.as_str())
            .await
            .map_err(|e| {
                StoreError::Connection(format!(
                    "Failed to connect to {}: {}",
                    self.config.endpoint, e
                ))
            })?;

        if let (Some(username), Some(password)) = (&self.config.username, &self.config.password)
        {
            let signed_in = match self.config.auth {
                SurrealAuth::Root => self
                    .db
                    .signin(Root {
                        username: username.as_str(),
                        password: password.as_str(),
                    })
                    .await
                    .map(|_| ()),
                SurrealAuth::Namespace => self
                    .db
                    .signin(Namespace {
                        namespace: self.config.namespace.as_str(),
                        username: username.as_str(),
                        password: password.as_str(),
                    })
                    .await
                    .map(|_| ()),
                SurrealAuth::Database => self
                    .db
                    .signin(Database {
                        namespace: self.config.namespace.as_str(),
                        database: self.config.database.as_str(),
                        username: username.as_str(),
                        password: password.as_str(),
                    })
                    .await
                    .map(|_| ()),
            };
            signed_in
                .map_err(|e| StoreError::Connection(format!("Authentication failed: {}", e)))?;
        }

        self.use_database().await?;
        info!("SurrealDB connected");
        Ok(())
    }

    async fn use_database(&self) -> StoreResult<()> {
        self.db
            .use_ns(self.config.namespace.as_str())
            .use_db(self.config.database.as_str())
            .await
            .map_err(|e| {
                StoreError::Connection(format!("Failed to select namespace/database: {}", e))
            })
    }

    async fn run(&self, statement: String) -> StoreResult<surrealdb::Response> {
        debug!(statement = %statement, "surreal query");
        let response = self.db.query(statement).await?;
        Ok(response.check()?)
    }
}

/// Quote a table or field name as a SurrealQL identifier.
fn ident(name: &str) -> StoreResult<String> {
    if name.is_empty() || name.contains('`') || name.contains('\0') {
        return Err(StoreError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("`{}`", name))
}

/// Parse the definition string SurrealDB reports for an index, e.g.
/// `DEFINE INDEX email_idx ON users FIELDS email UNIQUE`.
fn parse_index_definition(name: &str, definition: &str) -> IndexDescriptor {
    let upper = definition.to_ascii_uppercase();
    let fields_start = [" FIELDS ", " COLUMNS "]
        .iter()
        .find_map(|kw| upper.find(kw).map(|pos| pos + kw.len()));

    let mut key = Vec::new();
    if let Some(start) = fields_start {
        let rest = &definition[start..];
        let end = [" UNIQUE", " SEARCH", " MTREE", " HNSW", " COMMENT", " CONCURRENTLY"]
            .iter()
            .filter_map(|kw| rest.to_ascii_uppercase().find(kw))
            .min()
            .unwrap_or(rest.len());
        key = rest[..end]
            .split(',')
            .map(|f| f.trim().trim_matches('`').trim_matches('⟨').trim_matches('⟩'))
            .filter(|f| !f.is_empty())
            .map(IndexKey::asc)
            .collect();
    }

    let mut index = IndexDescriptor::new(name, key);
    if upper.contains(" UNIQUE") {
        index.unique = Some(true);
    }
    index
}

/// Document projection: the stored `_id`, else the key of the record id.
const DOCUMENT_ID: &str = "(_id ?? record::id(id))";

fn select_documents(collection: &str) -> StoreResult<String> {
    Ok(format!(
        "SELECT *, {} AS _id OMIT id FROM {}",
        DOCUMENT_ID,
        ident(collection)?
    ))
}

fn into_documents(rows: Vec<Value>) -> StoreResult<Vec<Document>> {
    rows.into_iter().map(Document::from_value).collect()
}

#[async_trait]
impl DocumentStore for SurrealDocumentStore {
    fn identity(&self) -> ConnectionIdentity {
        self.identity.clone()
    }

    #[instrument(skip(self))]
    async fn list_collections(&self) -> StoreResult<Vec<String>> {
        let mut response = self.run("INFO FOR DB".to_string()).await?;
        let info: Option<DbInfo> = response.take(0)?;
        Ok(info
            .map(|i| i.tables.into_keys().collect())
            .unwrap_or_default())
    }

    #[instrument(skip(self))]
    async fn find_all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        let mut response = self.run(select_documents(collection)?).await?;
        let rows: Vec<Value> = response.take(0)?;
        into_documents(rows)
    }

    #[instrument(skip(self, sort))]
    async fn find_sorted(
        &self,
        collection: &str,
        sort: &[SortKey],
    ) -> StoreResult<Vec<Document>> {
        let mut statement = select_documents(collection)?;
        if !sort.is_empty() {
            let order = sort
                .iter()
                .map(|k| {
                    ident(&k.field).map(|f| {
                        format!("{} {}", f, if k.descending { "DESC" } else { "ASC" })
                    })
                })
                .collect::<StoreResult<Vec<_>>>()?;
            statement.push_str(" ORDER BY ");
            statement.push_str(&order.join(", "));
        }
        let mut response = self.run(statement).await?;
        let rows: Vec<Value> = response.take(0)?;
        into_documents(rows)
    }

    #[instrument(skip(self, id))]
    async fn find_by_id(&self, collection: &str, id: &Value) -> StoreResult<Option<Document>> {
        let statement = format!(
            "{} WHERE {} = $id LIMIT 1",
            select_documents(collection)?,
            DOCUMENT_ID
        );
        let mut response = self
            .db
            .query(statement)
            .bind(("id", id.clone()))
            .await?
            .check()?;
        let rows: Vec<Value> = response.take(0)?;
        Ok(into_documents(rows)?.into_iter().next())
    }

    #[instrument(skip(self))]
    async fn list_indexes(&self, collection: &str) -> StoreResult<Vec<IndexDescriptor>> {
        let mut response = self
            .run(format!("INFO FOR TABLE {}", ident(collection)?))
            .await?;
        let info: Option<TableInfo> = response.take(0)?;
        Ok(info
            .map(|i| {
                i.indexes
                    .iter()
                    .map(|(name, definition)| parse_index_definition(name, definition))
                    .collect()
            })
            .unwrap_or_default())
    }

    #[instrument(skip(self, documents), fields(count = documents.len()))]
    async fn insert_many(&self, collection: &str, documents: &[Document]) -> StoreResult<()> {
        if documents.is_empty() {
            return Ok(());
        }
        let rows: Vec<Value> = documents
            .iter()
            .map(|d| {
                let mut row = d.as_map().clone();
                row.insert("id".to_string(), d.id().clone());
                Value::Object(row)
            })
            .collect();

        let statement = format!("INSERT INTO {} $rows", ident(collection)?);
        self.db
            .query(statement)
            .bind(("rows", rows))
            .await?
            .check()?;
        Ok(())
    }

    #[instrument(skip(self, document))]
    async fn upsert(&self, collection: &str, document: &Document) -> StoreResult<()> {
        self.db
            .query("UPSERT type::thing($tb, $id) CONTENT $doc")
            .bind(("tb", collection.to_string()))
            .bind(("id", document.id().clone()))
            .bind(("doc", document.clone().into_value()))
            .await?
            .check()?;
        Ok(())
    }

    #[instrument(skip(self, index), fields(index = %index.name))]
    async fn create_index(&self, collection: &str, index: &IndexDescriptor) -> StoreResult<()> {
        if index.sparse == Some(true) {
            return Err(StoreError::unsupported("sparse index"));
        }
        if index.expire_after_seconds.is_some() {
            return Err(StoreError::unsupported("expiring index"));
        }
        if index.partial_filter_expression.is_some() {
            return Err(StoreError::unsupported("partial index"));
        }
        if index.key.is_empty() {
            return Err(StoreError::InvalidIdentifier(format!(
                "index {} has no fields",
                index.name
            )));
        }

        let fields = index
            .key
            .iter()
            .map(|k| ident(&k.field))
            .collect::<StoreResult<Vec<_>>>()?
            .join(", ");
        let mut statement = format!(
            "DEFINE INDEX {} ON TABLE {} FIELDS {}",
            ident(&index.name)?,
            ident(collection)?,
            fields
        );
        if index.unique == Some(true) {
            statement.push_str(" UNIQUE");
        }
        self.run(statement).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn drop_database(&self) -> StoreResult<()> {
        self.run(format!(
            "REMOVE DATABASE IF EXISTS {}",
            ident(&self.config.database)?
        ))
        .await?;
        self.use_database().await
    }

    #[instrument(skip(self))]
    async fn delete_all(&self, collection: &str) -> StoreResult<()> {
        self.run(format!("DELETE {}", ident(collection)?)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn memory_store(database: &str) -> SurrealDocumentStore {
        SurrealDocumentStore::setup(SurrealConfig::in_memory("envswitch", database))
            .await
            .unwrap()
    }

    #[test]
    fn parses_unique_index_definition() {
        let index =
            parse_index_definition("email_idx", "DEFINE INDEX email_idx ON users FIELDS email UNIQUE");
        assert_eq!(index.name, "email_idx");
        assert_eq!(index.key, vec![IndexKey::asc("email")]);
        assert_eq!(index.unique, Some(true));
        assert_eq!(index.sparse, None);
    }

    #[test]
    fn parses_compound_index_definition() {
        let index = parse_index_definition(
            "by_parent",
            "DEFINE INDEX by_parent ON _posts_versions FIELDS parent, updatedAt",
        );
        assert_eq!(
            index.key,
            vec![IndexKey::asc("parent"), IndexKey::asc("updatedAt")]
        );
        assert_eq!(index.unique, None);
    }

    #[test]
    fn rejects_backticks_in_identifiers() {
        assert!(ident("users").is_ok());
        assert!(ident("bad`name").is_err());
        assert!(ident("").is_err());
    }

    #[test]
    fn local_endpoints_are_detected() {
        assert!(SurrealConfig::in_memory("a", "b").is_local());
        assert!(SurrealConfig::new("ws://127.0.0.1:8000", "a", "b").is_local());
        assert!(!SurrealConfig::new("wss://prod.example.com", "a", "b").is_local());
    }

    #[tokio::test]
    async fn insert_and_read_back_documents() {
        let store = memory_store("roundtrip").await;
        let docs = vec![
            Document::from_value(json!({"_id": "u1", "name": "Ada"})).unwrap(),
            Document::from_value(json!({"_id": "u2", "name": "Linus"})).unwrap(),
        ];
        store.insert_many("users", &docs).await.unwrap();

        let collections = store.list_collections().await.unwrap();
        assert!(collections.contains(&"users".to_string()));

        let mut loaded = store.find_all("users").await.unwrap();
        loaded.sort_by_key(|d| d.id_key());
        assert_eq!(loaded, docs);
    }

    #[tokio::test]
    async fn records_without_id_field_use_record_key() {
        let store = memory_store("native").await;
        store
            .run("CREATE users:1 SET name = 'Ada'; CREATE users:linus SET name = 'Linus'".to_string())
            .await
            .unwrap();

        let mut loaded = store.find_all("users").await.unwrap();
        loaded.sort_by_key(|d| d.id_key());
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id(), &json!(1));
        assert_eq!(loaded[1].id(), &json!("linus"));
        assert!(loaded.iter().all(|d| d.get("id").is_none()));

        let ada = store.find_by_id("users", &json!(1)).await.unwrap().unwrap();
        assert_eq!(ada.get("name"), Some(&json!("Ada")));

        let sorted = store
            .find_sorted("users", &[SortKey::desc("name")])
            .await
            .unwrap();
        assert_eq!(sorted[0].id(), &json!("linus"));
    }

    #[tokio::test]
    async fn upsert_then_find_by_id() {
        let store = memory_store("upsert").await;
        let doc = Document::from_value(json!({"_id": "switch-env", "env": "production"})).unwrap();
        store.upsert("settings", &doc).await.unwrap();

        let loaded = store
            .find_by_id("settings", &json!("switch-env"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.get("env"), Some(&json!("production")));
    }
}
