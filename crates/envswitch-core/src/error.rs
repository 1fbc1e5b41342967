//! Error taxonomy for environment switching.

use envswitch_store::StoreError;

use crate::environment::Environment;

/// envswitch engine errors.
#[derive(Debug, thiserror::Error)]
pub enum SwitchError {
    #[error("a switch is already in progress")]
    SwitchInProgress,

    #[error("This endpoint can only be used from development environment")]
    CopyRequiresDevelopment { current: Environment },

    #[error("invalid environment: {0}")]
    InvalidEnvironment(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    UploadRejected(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("peer request failed: {0}")]
    Peer(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for envswitch operations.
pub type Result<T> = std::result::Result<T, SwitchError>;
