//! Error types for envswitch-store

use thiserror::Error;

/// Errors that can occur while talking to a document store
#[derive(Error, Debug)]
pub enum StoreError {
    /// Connection could not be established or was lost
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// A query or command was rejected by the backend
    #[error("Database query failed: {0}")]
    Query(String),

    /// The backend does not implement an optional capability
    #[error("Operation not supported by this store: {operation}")]
    Unsupported { operation: &'static str },

    /// A document without a usable `_id`, or a non-object document
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Inserting a document whose `_id` already exists
    #[error("Duplicate key {id} in collection {collection}")]
    DuplicateKey { collection: String, id: String },

    /// Collection or field name that cannot be used as an identifier
    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Serialization error
    #[error("Serialization failed: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Shorthand for an unsupported optional capability.
    pub fn unsupported(operation: &'static str) -> Self {
        StoreError::Unsupported { operation }
    }

    /// Whether this error reports a missing capability rather than a failure.
    pub fn is_unsupported(&self) -> bool {
        matches!(self, StoreError::Unsupported { .. })
    }
}

impl From<surrealdb::Error> for StoreError {
    fn from(err: surrealdb::Error) -> Self {
        StoreError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
