//! envswitch Core Library
//!
//! Runtime switching of an application between a production and a
//! development database, with optional production → development data copy.
//!
//! ## Key Components
//!
//! - [`EnvironmentState`]: the persisted `production` / `development` flag
//! - [`copy_policy`]: normalizes the user's copy settings into per-collection modes
//! - [`SnapshotEngine`] / [`RestoreEngine`]: capture and replay a database
//! - [`AdapterSwitcher`]: swaps the live adapter behind a [`HostHandle`]
//! - [`UploadPolicy`]: upload-collection guard the [`HostHandle`] applies
//!   against the live environment
//! - [`SwitchOrchestrator`]: drives a switch or copy end to end
//! - [`endpoints`]: the trigger and peer-sync handlers, transport-independent

pub mod adapter;
pub mod config;
pub mod copy_policy;
pub mod endpoints;
pub mod env_state;
pub mod environment;
pub mod error;
mod fsutil;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod peers;
pub mod restore;
pub mod runtime;
pub mod schema;
pub mod snapshot;
pub mod switcher;
pub mod telemetry;
pub mod uploads;

pub use adapter::{
    Adapter, AdapterFactory, HostContext, HostHandle, LifecycleFuture, LifecycleHook,
    MemoryAdapterFactory, ModelRegistry, SurrealAdapterFactory,
};
pub use config::{EnvSwitchConfig, StateBackend, DEFAULT_CONFIG_FILE};
pub use copy_policy::{CopyMode, CopyTarget, ResolvedCopyConfig, MAX_LATEST_X};
pub use endpoints::{EndpointResponse, PeerSyncOutcome, PeerSyncQuery, SwitchRequest};
pub use env_state::{
    EnvironmentState, EnvironmentStore, FileEnvironmentStore, MemoryEnvironmentStore,
    RecordEnvironmentStore,
};
pub use environment::Environment;
pub use error::{Result, SwitchError};
pub use orchestrator::{CopyOutcome, SwitchOrchestrator, SwitchOutcome, SwitchPhase};
pub use peers::{HttpPeerNotifier, PeerNotifier, PEER_SYNC_PATH};
pub use restore::{RestoreEngine, RestoreReport};
pub use schema::{DbName, EntityConfig, SchemaRegistry};
pub use snapshot::{format_file_size, BackupPlan, PendingSnapshot, Snapshot, SnapshotEngine};
pub use switcher::AdapterSwitcher;
pub use uploads::{FileStorageMode, UploadOperation, UploadPolicy, CREATED_DURING_DEVELOPMENT};

pub use metrics::METRICS;
pub use obs::{
    emit_copy_finished, emit_peer_notify_failed, emit_switch_finished, emit_switch_phase,
    emit_switch_started, switch_span,
};
pub use telemetry::init_tracing;

/// envswitch version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
