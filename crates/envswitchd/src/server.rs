//! HTTP surface: the switch trigger, copy-db and peer-sync endpoints.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Query, State},
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Router,
};
use envswitch_core::endpoints::{handle_copy, handle_peer_sync, handle_switch};
use envswitch_core::{
    EndpointResponse, Environment, PeerSyncOutcome, PeerSyncQuery, SwitchOrchestrator, SwitchPhase,
    SwitchRequest, PEER_SYNC_PATH,
};
use serde::Serialize;
use tracing::{info, warn};

/// Shared API state
#[derive(Clone)]
pub struct ApiState {
    orchestrator: Arc<SwitchOrchestrator>,
    peer_secret: Option<Arc<str>>,
}

impl ApiState {
    pub fn new(orchestrator: Arc<SwitchOrchestrator>, peer_secret: Option<String>) -> Self {
        Self {
            orchestrator,
            peer_secret: peer_secret.map(Arc::from),
        }
    }
}

pub fn build_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/switch-env", get(status).post(switch_env))
        .route("/api/copy-db", post(copy_db))
        .route(PEER_SYNC_PATH, get(peer_sync))
        .with_state(state)
}

pub async fn serve(listener: tokio::net::TcpListener, state: ApiState) -> Result<()> {
    info!("envswitchd listening on {}", listener.local_addr()?);
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    env: Environment,
    phase: SwitchPhase,
    busy: bool,
}

async fn status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let orchestrator = &state.orchestrator;
    Json(StatusResponse {
        env: orchestrator.state().get().await,
        phase: orchestrator.phase(),
        busy: orchestrator.is_busy(),
    })
}

/// An empty body means `{}`.
async fn switch_env(State(state): State<ApiState>, body: Bytes) -> Json<EndpointResponse> {
    let request = if body.iter().all(u8::is_ascii_whitespace) {
        SwitchRequest::default()
    } else {
        match serde_json::from_slice::<SwitchRequest>(&body) {
            Ok(request) => request,
            Err(e) => return Json(EndpointResponse::failed(format!("Invalid request body: {}", e))),
        }
    };

    // Detached so a dropped connection cannot cancel a switch halfway.
    let orchestrator = Arc::clone(&state.orchestrator);
    let task = tokio::spawn(async move { handle_switch(&orchestrator, request).await });
    Json(task.await.unwrap_or_else(|e| {
        warn!(error = %e, "switch task failed");
        EndpointResponse::failed(format!("Failed to switch environment: {}", e))
    }))
}

async fn copy_db(State(state): State<ApiState>) -> Json<EndpointResponse> {
    let orchestrator = Arc::clone(&state.orchestrator);
    let task = tokio::spawn(async move { handle_copy(&orchestrator).await });
    Json(task.await.unwrap_or_else(|e| {
        warn!(error = %e, "copy task failed");
        EndpointResponse::failed(format!("Failed to copy database: {}", e))
    }))
}

async fn peer_sync(State(state): State<ApiState>, Query(query): Query<PeerSyncQuery>) -> Response {
    let orchestrator = Arc::clone(&state.orchestrator);
    let secret = state.peer_secret.clone();
    let task = tokio::spawn(async move { handle_peer_sync(&orchestrator, secret.as_deref(), query).await });

    match task.await.unwrap_or(PeerSyncOutcome::Rejected) {
        PeerSyncOutcome::Applied(env) => Json(EndpointResponse::ok(format!("Switched to {}", env))).into_response(),
        PeerSyncOutcome::Unchanged(env) => Json(EndpointResponse::ok(format!("Already on {}", env))).into_response(),
        PeerSyncOutcome::Rejected => Redirect::to("/").into_response(),
    }
}
