//! Structured lifecycle events for environment switches.
//!
//! Provides a switch-scoped span ([`switch_span`]) and one `emit_*`
//! function per lifecycle event. Every event carries an `event` field so log
//! pipelines can filter on it.

use tracing::{info, warn};

use crate::environment::Environment;
use crate::orchestrator::SwitchPhase;

/// Span covering one switch or copy operation.
///
/// Attach it with `tracing::Instrument` so it follows the future across
/// `.await` points.
pub fn switch_span(operation: &str, from: Environment) -> tracing::Span {
    tracing::info_span!("envswitch.switch", operation = %operation, from = %from)
}

/// Emit event: a switch started.
pub fn emit_switch_started(from: Environment, to: Environment, copy_database: bool) {
    info!(event = "switch.started", from = %from, to = %to, copy_database);
}

/// Emit event: the orchestrator entered a new phase.
pub fn emit_switch_phase(phase: SwitchPhase) {
    info!(event = "switch.phase", phase = %phase);
}

/// Emit event: a switch finished.
pub fn emit_switch_finished(to: Environment, duration_ms: u64, success: bool) {
    info!(
        event = "switch.finished",
        to = %to,
        duration_ms,
        success,
    );
}

/// Emit event: copy-db finished.
pub fn emit_copy_finished(documents: usize, duration_ms: u64, success: bool) {
    info!(
        event = "copy.finished",
        documents,
        duration_ms,
        success,
    );
}

/// Emit event: a peer could not be notified (warning level).
pub fn emit_peer_notify_failed(peer: &str, error: &dyn std::fmt::Display) {
    warn!(event = "peer.notify_failed", peer = %peer, error = %error);
}
