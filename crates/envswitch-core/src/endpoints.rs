//! Transport-independent handlers behind the HTTP trigger endpoints.
//!
//! Handlers never return errors: failures are rendered into
//! [`EndpointResponse::message`] with `success: false`.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::environment::Environment;
use crate::error::SwitchError;
use crate::orchestrator::SwitchOrchestrator;

/// Body of `POST /api/switch-env`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SwitchRequest {
    pub copy_database: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointResponse {
    pub success: bool,
    pub message: String,
}

impl EndpointResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

pub async fn handle_switch(orchestrator: &SwitchOrchestrator, request: SwitchRequest) -> EndpointResponse {
    match orchestrator.switch(request.copy_database).await {
        Ok(outcome) => EndpointResponse::ok(format!("Switched to {}", outcome.to)),
        Err(e) => EndpointResponse::failed(format!("Failed to switch environment: {}", e)),
    }
}

pub async fn handle_copy(orchestrator: &SwitchOrchestrator) -> EndpointResponse {
    match orchestrator.copy_from_production().await {
        Ok(_) => EndpointResponse::ok("Successfully copied production database to development"),
        Err(e @ SwitchError::CopyRequiresDevelopment { .. }) => EndpointResponse::failed(e.to_string()),
        Err(e) => EndpointResponse::failed(format!("Failed to copy database: {}", e)),
    }
}

/// Query of `GET /api/switch-env/sync`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PeerSyncQuery {
    pub env: Option<String>,
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerSyncOutcome {
    /// The announced environment was adopted.
    Applied(Environment),
    /// Already on the announced environment.
    Unchanged(Environment),
    /// Bad secret, bad environment, or the switch failed.
    Rejected,
}

/// Adopt the environment a peer announced. A missing expected secret
/// rejects every request.
pub async fn handle_peer_sync(
    orchestrator: &SwitchOrchestrator,
    expected_secret: Option<&str>,
    query: PeerSyncQuery,
) -> PeerSyncOutcome {
    let authorized = matches!(
        (expected_secret, query.secret.as_deref()),
        (Some(expected), Some(given)) if expected == given
    );
    if !authorized {
        warn!("peer sync rejected: secret mismatch");
        return PeerSyncOutcome::Rejected;
    }

    let env = match query.env.as_deref().map(str::parse::<Environment>) {
        Some(Ok(env)) => env,
        Some(Err(e)) => {
            warn!(error = %e, "peer sync rejected");
            return PeerSyncOutcome::Rejected;
        }
        None => {
            warn!("peer sync rejected: no environment given");
            return PeerSyncOutcome::Rejected;
        }
    };

    match orchestrator.apply_peer_environment(env).await {
        Ok(true) => {
            info!(env = %env, "peer sync applied");
            PeerSyncOutcome::Applied(env)
        }
        Ok(false) => PeerSyncOutcome::Unchanged(env),
        Err(e) => {
            warn!(error = %e, "peer sync failed");
            PeerSyncOutcome::Rejected
        }
    }
}
