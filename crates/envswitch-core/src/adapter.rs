//! Database adapters and the host's live handle
//!
//! An [`Adapter`] owns one store connection for one environment. Lifecycle
//! operations a backend may or may not have (`connect`, `destroy`) are
//! optional hooks, checked once at the call site. The [`HostHandle`] holds the
//! adapter currently serving the application.

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use envswitch_store::fakes::MemoryDocumentStore;
use envswitch_store::{Document, DocumentStore, SurrealConfig, SurrealDocumentStore};
use tracing::debug;

use crate::copy_policy::DEFAULT_GLOBALS_COLLECTION;
use crate::environment::Environment;
use crate::error::{Result, SwitchError};
use crate::schema::SchemaRegistry;
use crate::uploads::{UploadOperation, UploadPolicy};

/// Boxed future returned by a lifecycle hook.
pub type LifecycleFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Optional adapter lifecycle operation.
pub type LifecycleHook = Arc<dyn Fn() -> LifecycleFuture + Send + Sync>;

/// What the host exposes to adapters during initialization.
#[derive(Debug, Clone, Default)]
pub struct HostContext {
    pub schema: SchemaRegistry,
    /// Guards upload collections; file-system storage unless configured.
    pub uploads: UploadPolicy,
}

impl HostContext {
    pub fn new(schema: SchemaRegistry) -> Self {
        let uploads = UploadPolicy::default().with_schema(&schema);
        Self { schema, uploads }
    }

    pub fn with_upload_policy(mut self, uploads: UploadPolicy) -> Self {
        self.uploads = uploads;
        self
    }
}

// ---------------------------------------------------------------------------
// ModelRegistry
// ---------------------------------------------------------------------------

/// Physical collection names an adapter registered for the host schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelRegistry {
    collections: BTreeMap<String, String>,
    versions: BTreeMap<String, String>,
    globals: Option<String>,
}

impl ModelRegistry {
    /// Register every collection, version group and the globals collection
    /// under its default storage name.
    pub fn from_schema(schema: &SchemaRegistry) -> Self {
        let mut models = Self::default();
        for collection in &schema.collections {
            models.register_collection(&collection.slug, collection.storage_name());
            if collection.versions {
                models.register_versions(&collection.slug, collection.default_versions_name());
            }
        }
        for global in schema.globals.iter().filter(|g| g.versions) {
            models.register_versions(&global.slug, global.default_versions_name());
        }
        if !schema.globals.is_empty() {
            models.register_globals(DEFAULT_GLOBALS_COLLECTION);
        }
        models
    }

    pub fn register_collection(&mut self, slug: impl Into<String>, name: impl Into<String>) {
        self.collections.insert(slug.into(), name.into());
    }

    pub fn register_versions(&mut self, slug: impl Into<String>, name: impl Into<String>) {
        self.versions.insert(slug.into(), name.into());
    }

    pub fn register_globals(&mut self, name: impl Into<String>) {
        self.globals = Some(name.into());
    }

    pub fn collection(&self, slug: &str) -> Option<&str> {
        self.collections.get(slug).map(String::as_str)
    }

    pub fn versions(&self, slug: &str) -> Option<&str> {
        self.versions.get(slug).map(String::as_str)
    }

    pub fn globals(&self) -> Option<&str> {
        self.globals.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.is_empty() && self.versions.is_empty() && self.globals.is_none()
    }
}

// ---------------------------------------------------------------------------
// Adapter
// ---------------------------------------------------------------------------

/// One live store connection bound to an environment.
pub struct Adapter {
    environment: Environment,
    store: Arc<dyn DocumentStore>,
    models: ModelRegistry,
    connect: Option<LifecycleHook>,
    destroy: Option<LifecycleHook>,
}

impl Adapter {
    pub fn new(environment: Environment, store: Arc<dyn DocumentStore>) -> Self {
        Self {
            environment,
            store,
            models: ModelRegistry::default(),
            connect: None,
            destroy: None,
        }
    }

    pub fn with_connect(mut self, hook: LifecycleHook) -> Self {
        self.connect = Some(hook);
        self
    }

    pub fn with_destroy(mut self, hook: LifecycleHook) -> Self {
        self.destroy = Some(hook);
        self
    }

    /// Register model names for the host schema.
    pub fn init(&mut self, context: &HostContext) {
        self.models = ModelRegistry::from_schema(&context.schema);
        debug!(
            environment = %self.environment,
            collections = context.schema.collections.len(),
            globals = context.schema.globals.len(),
            "adapter initialized"
        );
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn store(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.store)
    }

    pub fn models(&self) -> &ModelRegistry {
        &self.models
    }

    pub fn connect_hook(&self) -> Option<&LifecycleHook> {
        self.connect.as_ref()
    }

    pub fn destroy_hook(&self) -> Option<&LifecycleHook> {
        self.destroy.as_ref()
    }
}

impl fmt::Debug for Adapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Adapter")
            .field("environment", &self.environment)
            .field("store", &self.store.identity().short())
            .field("connect", &self.connect.is_some())
            .field("destroy", &self.destroy.is_some())
            .finish()
    }
}

/// Builds adapters bound to an environment's connection parameters.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    async fn create(&self, environment: Environment) -> Result<Adapter>;
}

// ---------------------------------------------------------------------------
// HostHandle
// ---------------------------------------------------------------------------

/// The host's reference to the adapter currently serving requests.
///
/// Readers take an `Arc` snapshot of the adapter, valid until they drop it
/// even if a switch rebinds the handle meanwhile.
pub struct HostHandle {
    current: RwLock<Arc<Adapter>>,
    context: HostContext,
}

impl HostHandle {
    /// Initialize `adapter` against `context` and make it current.
    pub fn new(mut adapter: Adapter, context: HostContext) -> Self {
        adapter.init(&context);
        Self {
            current: RwLock::new(Arc::new(adapter)),
            context,
        }
    }

    pub fn current(&self) -> Arc<Adapter> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Store of the current adapter.
    pub fn store(&self) -> Arc<dyn DocumentStore> {
        self.current().store()
    }

    pub fn environment(&self) -> Environment {
        self.current().environment()
    }

    pub fn context(&self) -> &HostContext {
        &self.context
    }

    /// Check an update or delete of upload documents against the environment
    /// the host is serving right now.
    pub fn check_upload_mutation(
        &self,
        collection: &str,
        operation: UploadOperation,
        documents: &[Document],
    ) -> Result<()> {
        self.context
            .uploads
            .check_mutation(self.environment(), collection, operation, documents)
    }

    /// Mark an upload document the host is about to create.
    pub fn stamp_upload(&self, collection: &str, document: &mut Document) {
        self.context
            .uploads
            .stamp_created_during_development(self.environment(), collection, document);
    }

    /// Replace the current adapter, returning the previous one.
    pub(crate) fn rebind(&self, adapter: Arc<Adapter>) -> Arc<Adapter> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, adapter)
    }
}

impl fmt::Debug for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostHandle")
            .field("current", &self.current())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Factories
// ---------------------------------------------------------------------------

/// Adapters over two long-lived in-memory stores, one per environment.
///
/// Counts lifecycle calls so tests can observe the swap protocol.
#[derive(Debug)]
pub struct MemoryAdapterFactory {
    production: Arc<MemoryDocumentStore>,
    development: Arc<MemoryDocumentStore>,
    connects: Arc<AtomicUsize>,
    destroys: Arc<AtomicUsize>,
}

impl MemoryAdapterFactory {
    pub fn new(production: Arc<MemoryDocumentStore>, development: Arc<MemoryDocumentStore>) -> Self {
        Self {
            production,
            development,
            connects: Arc::new(AtomicUsize::new(0)),
            destroys: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn store_for(&self, environment: Environment) -> Arc<MemoryDocumentStore> {
        match environment {
            Environment::Production => Arc::clone(&self.production),
            Environment::Development => Arc::clone(&self.development),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn destroys(&self) -> usize {
        self.destroys.load(Ordering::SeqCst)
    }

    /// Build an adapter synchronously (for the initial host handle).
    pub fn adapter(&self, environment: Environment) -> Adapter {
        Adapter::new(environment, self.store_for(environment))
            .with_connect(counting_hook(Arc::clone(&self.connects)))
            .with_destroy(counting_hook(Arc::clone(&self.destroys)))
    }
}

fn counting_hook(counter: Arc<AtomicUsize>) -> LifecycleHook {
    Arc::new(move || -> LifecycleFuture {
        counter.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok::<(), SwitchError>(()) })
    })
}

#[async_trait]
impl AdapterFactory for MemoryAdapterFactory {
    async fn create(&self, environment: Environment) -> Result<Adapter> {
        Ok(self.adapter(environment))
    }
}

/// SurrealDB adapters; each `create` opens a fresh client.
///
/// The client is released when the last reference to the adapter is
/// dropped, so these adapters carry no `destroy` hook.
#[derive(Debug, Clone)]
pub struct SurrealAdapterFactory {
    production: SurrealConfig,
    development: SurrealConfig,
}

impl SurrealAdapterFactory {
    pub fn new(production: SurrealConfig, development: SurrealConfig) -> Self {
        Self {
            production,
            development,
        }
    }

    pub fn config_for(&self, environment: Environment) -> &SurrealConfig {
        match environment {
            Environment::Production => &self.production,
            Environment::Development => &self.development,
        }
    }

    /// Build an unconnected adapter; the connect hook opens the connection.
    pub fn adapter(&self, environment: Environment) -> Adapter {
        let store = Arc::new(SurrealDocumentStore::new(self.config_for(environment).clone()));
        let connecting = Arc::clone(&store);
        Adapter::new(environment, store).with_connect(Arc::new(move || -> LifecycleFuture {
            let store = Arc::clone(&connecting);
            Box::pin(async move {
                store.connect().await?;
                Ok::<(), SwitchError>(())
            })
        }))
    }
}

#[async_trait]
impl AdapterFactory for SurrealAdapterFactory {
    async fn create(&self, environment: Environment) -> Result<Adapter> {
        Ok(self.adapter(environment))
    }
}
