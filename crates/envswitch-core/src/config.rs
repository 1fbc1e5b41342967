//! `envswitch.toml` loading.
//!
//! The `copy` table is kept as a raw value and normalized later, so a bad
//! copy setting degrades to a warning instead of failing the load.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use envswitch_store::{DocumentStore, SurrealAuth, SurrealConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::copy_policy::{normalize_copy_config, warn_on_invalid_override_targets, ResolvedCopyConfig};
use crate::env_state::{EnvironmentStore, FileEnvironmentStore, MemoryEnvironmentStore, RecordEnvironmentStore};
use crate::environment::Environment;
use crate::error::{Result, SwitchError};
use crate::schema::{EntityConfig, SchemaRegistry};
use crate::snapshot::PendingSnapshot;
use crate::uploads::{FileStorageMode, UploadPolicy};

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "envswitch.toml";

const DEFAULT_STATE_PATH: &str = ".envswitch/env.json";
const DEFAULT_PENDING_SNAPSHOT: &str = ".envswitch/pending-snapshot.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvSwitchConfig {
    /// Log the serialized snapshot size after each backup.
    #[serde(default)]
    pub log_database_size: bool,

    /// Refuse a development connection that leaves this machine.
    #[serde(default = "default_true")]
    pub development_safety_mode: bool,

    #[serde(default)]
    pub state: StateBackend,

    #[serde(default = "default_pending_snapshot")]
    pub pending_snapshot: PathBuf,

    #[serde(default)]
    pub connections: Connections,

    #[serde(default)]
    pub peers: PeersConfig,

    #[serde(default)]
    pub copy: Option<toml::Value>,

    #[serde(default)]
    pub development_file_storage: FileStorageMode,

    #[serde(default)]
    pub schema: SchemaConfig,
}

fn default_true() -> bool {
    true
}

fn default_pending_snapshot() -> PathBuf {
    PathBuf::from(DEFAULT_PENDING_SNAPSHOT)
}

fn default_state_path() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_PATH)
}

/// Where the environment flag lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StateBackend {
    Memory,
    File {
        #[serde(default = "default_state_path")]
        path: PathBuf,
    },
    /// A record in the production database.
    Record,
}

impl Default for StateBackend {
    fn default() -> Self {
        StateBackend::File {
            path: default_state_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthLevel {
    Root,
    Namespace,
    #[default]
    Database,
}

impl From<AuthLevel> for SurrealAuth {
    fn from(level: AuthLevel) -> Self {
        match level {
            AuthLevel::Root => SurrealAuth::Root,
            AuthLevel::Namespace => SurrealAuth::Namespace,
            AuthLevel::Database => SurrealAuth::Database,
        }
    }
}

/// One database connection. Credentials are named by environment variable,
/// never written into the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    #[serde(default)]
    pub username_env: Option<String>,
    #[serde(default)]
    pub password_env: Option<String>,
    #[serde(default)]
    pub auth: AuthLevel,
}

impl ConnectionConfig {
    fn in_memory(database: &str) -> Self {
        Self {
            endpoint: "mem://".to_string(),
            namespace: "envswitch".to_string(),
            database: database.to_string(),
            username_env: None,
            password_env: None,
            auth: AuthLevel::default(),
        }
    }

    /// Resolve into a store config, reading credentials from the environment.
    pub fn surreal_config(&self) -> Result<SurrealConfig> {
        let config = SurrealConfig::new(&self.endpoint, &self.namespace, &self.database);
        match (&self.username_env, &self.password_env) {
            (None, None) => Ok(config),
            (Some(user), Some(pass)) => {
                Ok(config.with_credentials(read_env(user)?, read_env(pass)?, self.auth.into()))
            }
            _ => Err(SwitchError::Config(format!(
                "connection to {} sets only one of username_env/password_env",
                self.endpoint
            ))),
        }
    }
}

fn read_env(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| SwitchError::Config(format!("environment variable {} is not set", name)))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connections {
    pub production: ConnectionConfig,
    pub development: ConnectionConfig,
}

impl Default for Connections {
    fn default() -> Self {
        Self {
            production: ConnectionConfig::in_memory("production"),
            development: ConnectionConfig::in_memory("development"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeersConfig {
    /// Base URLs of other instances, e.g. `http://10.0.0.2:3000`
    #[serde(default)]
    pub urls: Vec<String>,
    /// Environment variable holding the shared peer secret
    #[serde(default)]
    pub secret_env: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaConfig {
    #[serde(default)]
    pub collections: Vec<EntityEntry>,
    #[serde(default)]
    pub globals: Vec<EntityEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityEntry {
    pub slug: String,
    #[serde(default)]
    pub versions: bool,
    #[serde(default)]
    pub db_name: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub upload: bool,
}

impl EntityEntry {
    fn to_entity(&self) -> EntityConfig {
        let mut entity = EntityConfig::new(&self.slug)
            .with_versions(self.versions)
            .with_upload(self.upload);
        if let Some(db_name) = &self.db_name {
            entity = entity.with_db_name(db_name);
        }
        if let Some(name) = &self.name {
            entity = entity.with_name(name);
        }
        entity
    }
}

impl EnvSwitchConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&raw)?;
        debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Reject settings that would be unsafe to run with.
    pub fn validate(&self) -> Result<()> {
        if self.development_safety_mode {
            let development = &self.connections.development;
            let target = SurrealConfig::new(&development.endpoint, &development.namespace, &development.database);
            if !target.is_local() {
                return Err(SwitchError::Config(format!(
                    "development endpoint {} is not local (in-memory, localhost or 127.0.0.1); \
                     disable development_safety_mode to allow it",
                    development.endpoint
                )));
            }
        }
        Ok(())
    }

    pub fn schema(&self) -> SchemaRegistry {
        let collections = self.schema.collections.iter().map(EntityEntry::to_entity);
        let globals = self.schema.globals.iter().map(EntityEntry::to_entity);
        let schema = collections.fold(SchemaRegistry::new(), |schema, c| schema.with_collection(c));
        globals.fold(schema, |schema, g| schema.with_global(g))
    }

    /// Normalized copy settings. Every degraded value and every override
    /// that names an unknown entity is reported through `warn`.
    pub fn copy_config(&self, mut warn: impl FnMut(String)) -> Result<ResolvedCopyConfig> {
        let raw = self.copy.as_ref().map(serde_json::to_value).transpose()?;
        let resolved = normalize_copy_config(raw.as_ref(), &mut warn);
        warn_on_invalid_override_targets(&resolved, &self.schema(), &mut warn);
        Ok(resolved)
    }

    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy::new(self.development_file_storage.clone()).with_schema(&self.schema())
    }

    pub fn pending_snapshot(&self) -> PendingSnapshot {
        PendingSnapshot::new(&self.pending_snapshot)
    }

    /// The shared peer secret, when one is configured and set.
    pub fn peer_secret(&self) -> Result<Option<String>> {
        self.peers.secret_env.as_deref().map(read_env).transpose()
    }

    pub fn connection(&self, env: Environment) -> &ConnectionConfig {
        match env {
            Environment::Production => &self.connections.production,
            Environment::Development => &self.connections.development,
        }
    }

    /// Build the configured flag backend. `control` backs the `record`
    /// backend and is ignored otherwise.
    pub fn environment_store(&self, control: Option<Arc<dyn DocumentStore>>) -> Result<Arc<dyn EnvironmentStore>> {
        Ok(match &self.state {
            StateBackend::Memory => Arc::new(MemoryEnvironmentStore::new()),
            StateBackend::File { path } => Arc::new(FileEnvironmentStore::new(path)),
            StateBackend::Record => {
                let control = control.ok_or_else(|| {
                    SwitchError::Config("the record state backend needs a control connection".to_string())
                })?;
                Arc::new(RecordEnvironmentStore::new(control))
            }
        })
    }
}

impl Default for EnvSwitchConfig {
    fn default() -> Self {
        Self {
            log_database_size: false,
            development_safety_mode: true,
            state: StateBackend::default(),
            pending_snapshot: default_pending_snapshot(),
            connections: Connections::default(),
            peers: PeersConfig::default(),
            copy: None,
            development_file_storage: FileStorageMode::default(),
            schema: SchemaConfig::default(),
        }
    }
}
