//! envswitch-store: document store abstraction for envswitch
//!
//! This crate owns every byte of I/O against a live data store. The switching
//! engine in `envswitch-core` only ever talks to a [`DocumentStore`], so a
//! backend can be swapped at runtime without the engine noticing.
//!
//! ## Key Components
//!
//! - [`DocumentStore`]: async, backend-agnostic collection/index operations
//! - [`Document`] / [`IndexDescriptor`]: the portable record and index shapes
//! - [`ConnectionIdentity`]: stable key for per-connection capability caches
//! - [`fakes::MemoryDocumentStore`]: in-memory backend with configurable
//!   capabilities and failure injection
//! - [`SurrealDocumentStore`]: SurrealDB backend (`mem://`, `ws://`, `wss://`, ...)

mod document;
mod error;
pub mod fakes;
pub mod storage_traits;
mod surreal_store;

pub use document::{
    compare_field_values, ConnectionIdentity, Document, GroupedTopN, IndexDescriptor,
    IndexDirection, IndexKey, SortKey, group_key, value_key, ID_FIELD, IMPLICIT_ID_INDEX,
};
pub use error::StoreError;
pub use storage_traits::{DocumentStore, StoreResult};
pub use surreal_store::{SurrealAuth, SurrealConfig, SurrealDocumentStore};
