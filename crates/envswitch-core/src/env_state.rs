//! Current-environment flag with an atomic cache over a durable backend
//!
//! [`EnvironmentState`] is constructed once per process and shared by `Arc`.
//! Reads are served from a single `AtomicU8`; writes go to the
//! [`EnvironmentStore`] first and only then update the cache, so a reader that
//! starts after `set` returns never sees the previous value.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use envswitch_store::{Document, DocumentStore};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::environment::Environment;
use crate::error::Result;
use crate::fsutil::write_atomic_async;

const UNSET: u8 = 0;
const PRODUCTION: u8 = 1;
const DEVELOPMENT: u8 = 2;

fn encode(env: Environment) -> u8 {
    match env {
        Environment::Production => PRODUCTION,
        Environment::Development => DEVELOPMENT,
    }
}

fn decode(raw: u8) -> Option<Environment> {
    match raw {
        PRODUCTION => Some(Environment::Production),
        DEVELOPMENT => Some(Environment::Development),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Persistence backends
// ---------------------------------------------------------------------------

/// Durable storage for the current environment.
#[async_trait]
pub trait EnvironmentStore: Send + Sync {
    /// Load the persisted environment, `None` when nothing was saved yet.
    async fn load(&self) -> Result<Option<Environment>>;

    /// Persist the environment. Must be durable when it returns.
    async fn save(&self, env: Environment) -> Result<()>;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;
}

/// Process-memory backend; forgets the value on restart.
#[derive(Debug, Default)]
pub struct MemoryEnvironmentStore {
    value: Mutex<Option<Environment>>,
}

impl MemoryEnvironmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(env: Environment) -> Self {
        Self {
            value: Mutex::new(Some(env)),
        }
    }
}

#[async_trait]
impl EnvironmentStore for MemoryEnvironmentStore {
    async fn load(&self) -> Result<Option<Environment>> {
        Ok(*self.value.lock().unwrap_or_else(PoisonError::into_inner))
    }

    async fn save(&self, env: Environment) -> Result<()> {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(env);
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EnvFile {
    env: Environment,
}

/// Small JSON file (`{"env": "production"}`), replaced atomically on save.
#[derive(Debug, Clone)]
pub struct FileEnvironmentStore {
    path: PathBuf,
}

impl FileEnvironmentStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EnvironmentStore for FileEnvironmentStore {
    async fn load(&self) -> Result<Option<Environment>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => {
                let file: EnvFile = serde_json::from_slice(&bytes)?;
                Ok(Some(file.env))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, env: Environment) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&EnvFile { env })?;
        write_atomic_async(self.path.clone(), bytes).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}

/// Settings record in a control document store.
pub struct RecordEnvironmentStore {
    store: Arc<dyn DocumentStore>,
}

impl RecordEnvironmentStore {
    /// Collection holding the settings record.
    pub const COLLECTION: &'static str = "switch-env";
    /// `_id` of the settings record.
    pub const RECORD_ID: &'static str = "switch-env";

    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl EnvironmentStore for RecordEnvironmentStore {
    async fn load(&self) -> Result<Option<Environment>> {
        let record = self
            .store
            .find_by_id(Self::COLLECTION, &json!(Self::RECORD_ID))
            .await?;
        match record.and_then(|doc| doc.get("env").cloned()) {
            Some(value) if !value.is_null() => Ok(Some(serde_json::from_value(value)?)),
            _ => Ok(None),
        }
    }

    async fn save(&self, env: Environment) -> Result<()> {
        let record = Document::from_value(json!({
            "_id": Self::RECORD_ID,
            "env": env,
            "updatedAt": chrono::Utc::now().to_rfc3339(),
        }))?;
        self.store.upsert(Self::COLLECTION, &record).await?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "record"
    }
}

// ---------------------------------------------------------------------------
// EnvironmentState
// ---------------------------------------------------------------------------

/// The process-wide current environment.
pub struct EnvironmentState {
    cache: AtomicU8,
    store: Arc<dyn EnvironmentStore>,
}

impl EnvironmentState {
    pub fn new(store: Arc<dyn EnvironmentStore>) -> Self {
        Self {
            cache: AtomicU8::new(UNSET),
            store,
        }
    }

    /// State over a fresh in-memory backend.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryEnvironmentStore::new()))
    }

    /// Cached value without touching the backend.
    pub fn current(&self) -> Option<Environment> {
        decode(self.cache.load(Ordering::SeqCst))
    }

    /// Current environment; loads the persisted value on a cold cache and
    /// falls back to development when nothing can be read.
    pub async fn get(&self) -> Environment {
        if let Some(env) = self.current() {
            return env;
        }

        let loaded = match self.store.load().await {
            Ok(Some(env)) => env,
            Ok(None) => {
                debug!(backend = self.store.backend(), "no persisted environment, using development");
                Environment::Development
            }
            Err(e) => {
                warn!(backend = self.store.backend(), error = %e, "failed to load persisted environment, using development");
                return self.current().unwrap_or(Environment::Development);
            }
        };

        // A concurrent set wins over the value loaded here.
        match self
            .cache
            .compare_exchange(UNSET, encode(loaded), Ordering::SeqCst, Ordering::SeqCst)
        {
            Ok(_) => loaded,
            Err(current) => decode(current).unwrap_or(loaded),
        }
    }

    /// Persist `env`, then publish it to the cache.
    ///
    /// If persistence fails the previous value stays visible and the error is returned.
    #[instrument(skip(self), fields(backend = self.store.backend()))]
    pub async fn set(&self, env: Environment) -> Result<()> {
        self.store.save(env).await?;
        self.cache.store(encode(env), Ordering::SeqCst);
        debug!(env = %env, "environment updated");
        Ok(())
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }
}

impl std::fmt::Debug for EnvironmentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvironmentState")
            .field("current", &self.current())
            .field("backend", &self.store.backend())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SwitchError;
    use envswitch_store::fakes::MemoryDocumentStore;

    struct FailingStore;

    #[async_trait]
    impl EnvironmentStore for FailingStore {
        async fn load(&self) -> Result<Option<Environment>> {
            Err(SwitchError::Config("unreadable".into()))
        }

        async fn save(&self, _env: Environment) -> Result<()> {
            Err(SwitchError::Config("read-only".into()))
        }

        fn backend(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn defaults_to_development() {
        let state = EnvironmentState::in_memory();
        assert_eq!(state.current(), None);
        assert_eq!(state.get().await, Environment::Development);
        assert_eq!(state.current(), Some(Environment::Development));
    }

    #[tokio::test]
    async fn cold_cache_loads_persisted_value() {
        let store = Arc::new(MemoryEnvironmentStore::with_value(Environment::Production));
        let state = EnvironmentState::new(store);
        assert_eq!(state.get().await, Environment::Production);
    }

    #[tokio::test]
    async fn failed_save_keeps_previous_value() {
        let state = EnvironmentState::new(Arc::new(FailingStore));
        assert_eq!(state.get().await, Environment::Development);

        assert!(state.set(Environment::Production).await.is_err());
        assert_eq!(state.get().await, Environment::Development);
    }

    #[tokio::test]
    async fn file_backend_survives_new_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("env.json");

        let state = EnvironmentState::new(Arc::new(FileEnvironmentStore::new(&path)));
        state.set(Environment::Production).await.unwrap();

        let reopened = EnvironmentState::new(Arc::new(FileEnvironmentStore::new(&path)));
        assert_eq!(reopened.current(), None);
        assert_eq!(reopened.get().await, Environment::Production);
    }

    #[tokio::test]
    async fn file_backend_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileEnvironmentStore::new(dir.path().join("missing.json"));
        assert_eq!(store.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn record_backend_upserts_single_record() {
        let docs = Arc::new(MemoryDocumentStore::new("control"));
        let store = RecordEnvironmentStore::new(docs.clone());

        assert_eq!(store.load().await.unwrap(), None);
        store.save(Environment::Production).await.unwrap();
        store.save(Environment::Development).await.unwrap();

        assert_eq!(store.load().await.unwrap(), Some(Environment::Development));
        assert_eq!(docs.documents(RecordEnvironmentStore::COLLECTION).len(), 1);
    }
}
