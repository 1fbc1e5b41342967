//! Switch orchestration
//!
//! [`SwitchOrchestrator`] drives one switch or copy at a time through the
//! phases `Idle → Snapshotting → Flipping → Swapping → Restoring → Done`
//! (`Failed` on error). A failure after `Flipping` leaves the environment flag
//! changed; the orchestrator does not roll it back.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tracing::{info, warn, Instrument};

use crate::adapter::{AdapterFactory, HostHandle};
use crate::copy_policy::ResolvedCopyConfig;
use crate::env_state::EnvironmentState;
use crate::environment::Environment;
use crate::error::{Result, SwitchError};
use crate::metrics::METRICS;
use crate::obs;
use crate::peers::PeerNotifier;
use crate::restore::{RestoreEngine, RestoreReport};
use crate::snapshot::{format_file_size, BackupPlan, Snapshot, SnapshotEngine};
use crate::switcher::AdapterSwitcher;

/// Orchestrator lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchPhase {
    Idle,
    Snapshotting,
    Flipping,
    Swapping,
    Restoring,
    Done,
    Failed,
}

impl fmt::Display for SwitchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwitchPhase::Idle => "idle",
            SwitchPhase::Snapshotting => "snapshotting",
            SwitchPhase::Flipping => "flipping",
            SwitchPhase::Swapping => "swapping",
            SwitchPhase::Restoring => "restoring",
            SwitchPhase::Done => "done",
            SwitchPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of a completed switch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SwitchOutcome {
    pub from: Environment,
    pub to: Environment,
    /// Present when production data was copied into the new environment
    pub restore: Option<RestoreReport>,
}

/// Result of a completed copy-db.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CopyOutcome {
    pub snapshot_bytes: usize,
    pub restore: RestoreReport,
}

pub struct SwitchOrchestrator {
    state: Arc<EnvironmentState>,
    host: Arc<HostHandle>,
    factory: Arc<dyn AdapterFactory>,
    switcher: AdapterSwitcher,
    snapshots: SnapshotEngine,
    restorer: RestoreEngine,
    copy: ResolvedCopyConfig,
    log_database_size: bool,
    notifier: Option<Arc<dyn PeerNotifier>>,
    in_flight: AsyncMutex<()>,
    phase: Mutex<SwitchPhase>,
    notifications: Mutex<Option<JoinHandle<()>>>,
}

impl SwitchOrchestrator {
    pub fn new(
        state: Arc<EnvironmentState>,
        host: Arc<HostHandle>,
        factory: Arc<dyn AdapterFactory>,
    ) -> Self {
        Self {
            state,
            host,
            factory,
            switcher: AdapterSwitcher::new(),
            snapshots: SnapshotEngine::new(),
            restorer: RestoreEngine::new(),
            copy: ResolvedCopyConfig::default(),
            log_database_size: false,
            notifier: None,
            in_flight: AsyncMutex::new(()),
            phase: Mutex::new(SwitchPhase::Idle),
            notifications: Mutex::new(None),
        }
    }

    pub fn with_copy_config(mut self, copy: ResolvedCopyConfig) -> Self {
        self.copy = copy;
        self
    }

    pub fn with_log_database_size(mut self, enabled: bool) -> Self {
        self.log_database_size = enabled;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn PeerNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_switcher(mut self, switcher: AdapterSwitcher) -> Self {
        self.switcher = switcher;
        self
    }

    pub fn state(&self) -> &Arc<EnvironmentState> {
        &self.state
    }

    pub fn host(&self) -> &Arc<HostHandle> {
        &self.host
    }

    pub fn phase(&self) -> SwitchPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a switch or copy is running right now.
    pub fn is_busy(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    /// Backup plan for the current adapter's registered models.
    pub fn backup_plan(&self) -> BackupPlan {
        let adapter = self.host.current();
        BackupPlan::resolve(&self.host.context().schema, adapter.models(), &self.copy)
    }

    /// Run the connect lifecycle of the adapter the host started with.
    pub async fn connect_initial(&self) -> Result<()> {
        self.switcher.connect_current(&self.host).await
    }

    /// Toggle the environment, optionally copying production data into
    /// development when leaving production.
    pub async fn switch(&self, copy_database: bool) -> Result<SwitchOutcome> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| SwitchError::SwitchInProgress)?;

        let from = self.state.get().await;
        let to = from.toggled();
        let started = Instant::now();
        obs::emit_switch_started(from, to, copy_database);

        let result = self
            .run_switch(from, to, copy_database)
            .instrument(obs::switch_span("switch", from))
            .await;

        let elapsed = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => {
                self.enter(SwitchPhase::Done);
                METRICS.inc_switches();
                obs::emit_switch_finished(to, elapsed, true);
                info!("Switched to {} environment", to);
                self.notify_peers(to);
            }
            Err(e) => {
                self.enter(SwitchPhase::Failed);
                obs::emit_switch_finished(to, elapsed, false);
                warn!(error = %e, "switch failed");
            }
        }
        METRICS.flush();
        result
    }

    async fn run_switch(&self, from: Environment, to: Environment, copy_database: bool) -> Result<SwitchOutcome> {
        let snapshot = if from == Environment::Production && copy_database {
            self.enter(SwitchPhase::Snapshotting);
            let snapshot = self.capture_current().await?;
            info!(
                "Created backup of production database{}",
                self.size_suffix(&snapshot)
            );
            Some(snapshot)
        } else {
            None
        };

        self.enter(SwitchPhase::Flipping);
        self.state.set(to).await?;

        self.enter(SwitchPhase::Swapping);
        self.switcher
            .switch(&self.host, to, self.factory.as_ref())
            .await?;

        let restore = match snapshot {
            Some(snapshot) => {
                self.enter(SwitchPhase::Restoring);
                info!("Restoring production database backup to {}", to);
                Some(self.restorer.restore(self.host.store().as_ref(), &snapshot).await?)
            }
            None => None,
        };

        Ok(SwitchOutcome { from, to, restore })
    }

    /// Copy production into development without changing the environment flag.
    pub async fn copy_from_production(&self) -> Result<CopyOutcome> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| SwitchError::SwitchInProgress)?;

        let current = self.state.get().await;
        if current != Environment::Development {
            return Err(SwitchError::CopyRequiresDevelopment { current });
        }

        let started = Instant::now();
        let result = self
            .run_copy()
            .instrument(obs::switch_span("copy-db", current))
            .await;

        let elapsed = started.elapsed().as_millis() as u64;
        match &result {
            Ok(outcome) => {
                self.enter(SwitchPhase::Done);
                obs::emit_copy_finished(outcome.restore.documents, elapsed, true);
                info!("Successfully copied production database to development environment");
            }
            Err(e) => {
                self.enter(SwitchPhase::Failed);
                obs::emit_copy_finished(0, elapsed, false);
                warn!(error = %e, "copy from production failed");
                if self.host.environment() != Environment::Development {
                    if let Err(e) = self
                        .switcher
                        .switch(&self.host, Environment::Development, self.factory.as_ref())
                        .await
                    {
                        warn!(error = %e, "failed to reconnect development after copy failure");
                    }
                }
            }
        }
        METRICS.flush();
        result
    }

    async fn run_copy(&self) -> Result<CopyOutcome> {
        self.enter(SwitchPhase::Swapping);
        self.switcher
            .switch(&self.host, Environment::Production, self.factory.as_ref())
            .await?;

        self.enter(SwitchPhase::Snapshotting);
        let snapshot = self.capture_current().await?;
        let snapshot_bytes = snapshot.size_bytes()?;
        info!(
            "Created backup from production database{}",
            self.size_suffix(&snapshot)
        );

        self.enter(SwitchPhase::Swapping);
        self.switcher
            .switch(&self.host, Environment::Development, self.factory.as_ref())
            .await?;

        self.enter(SwitchPhase::Restoring);
        let restore = self.restorer.restore(self.host.store().as_ref(), &snapshot).await?;
        Ok(CopyOutcome {
            snapshot_bytes,
            restore,
        })
    }

    /// Adopt an environment announced by a peer: flip and swap when it
    /// differs, without copying data or notifying further.
    ///
    /// Returns whether anything changed.
    pub async fn apply_peer_environment(&self, env: Environment) -> Result<bool> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| SwitchError::SwitchInProgress)?;

        let current = self.state.get().await;
        if current == env && self.host.environment() == env {
            return Ok(false);
        }

        let result = async {
            self.enter(SwitchPhase::Flipping);
            self.state.set(env).await?;
            self.enter(SwitchPhase::Swapping);
            self.switcher
                .switch(&self.host, env, self.factory.as_ref())
                .await
        }
        .instrument(obs::switch_span("peer-sync", current))
        .await;

        match result {
            Ok(()) => {
                self.enter(SwitchPhase::Done);
                info!(env = %env, "applied environment from peer");
                Ok(true)
            }
            Err(e) => {
                self.enter(SwitchPhase::Failed);
                Err(e)
            }
        }
    }

    /// Snapshot of the store the host is currently bound to.
    pub async fn capture_current(&self) -> Result<Snapshot> {
        let plan = self.backup_plan();
        let store = self.host.store();
        self.snapshots.backup(store.as_ref(), &plan).await
    }

    /// Restore a snapshot into the store the host is currently bound to.
    pub async fn restore_current(&self, snapshot: &Snapshot) -> Result<RestoreReport> {
        let _guard = self
            .in_flight
            .try_lock()
            .map_err(|_| SwitchError::SwitchInProgress)?;
        let store = self.host.store();
        self.restorer.restore(store.as_ref(), snapshot).await
    }

    fn enter(&self, phase: SwitchPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
        obs::emit_switch_phase(phase);
    }

    fn size_suffix(&self, snapshot: &Snapshot) -> String {
        if !self.log_database_size {
            return String::new();
        }
        match snapshot.size_bytes() {
            Ok(bytes) => format!(" ({})", format_file_size(bytes)),
            Err(_) => String::new(),
        }
    }

    fn notify_peers(&self, env: Environment) {
        if let Some(notifier) = &self.notifier {
            let notifier = Arc::clone(notifier);
            let handle = tokio::spawn(async move { notifier.notify(env).await });
            *self.notifications.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }
    }

    /// Wait for the latest peer notification to finish. Short-lived
    /// processes call this before exiting.
    pub async fn wait_for_peers(&self) {
        let pending = self
            .notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = pending {
            if let Err(e) = handle.await {
                warn!(error = %e, "peer notification task failed");
            }
        }
    }
}

impl fmt::Debug for SwitchOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwitchOrchestrator")
            .field("state", &self.state)
            .field("host", &self.host)
            .field("phase", &self.phase())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{HostContext, MemoryAdapterFactory};
    use envswitch_store::fakes::MemoryDocumentStore;
    use envswitch_store::Document;
    use serde_json::json;

    struct Fixture {
        factory: Arc<MemoryAdapterFactory>,
        orchestrator: SwitchOrchestrator,
    }

    fn fixture(start: Environment) -> Fixture {
        let factory = Arc::new(MemoryAdapterFactory::new(
            Arc::new(MemoryDocumentStore::new("prod")),
            Arc::new(MemoryDocumentStore::new("dev")),
        ));
        let host = Arc::new(HostHandle::new(factory.adapter(start), HostContext::default()));
        let state = Arc::new(EnvironmentState::in_memory());
        let orchestrator = SwitchOrchestrator::new(state, host, factory.clone());
        Fixture {
            factory,
            orchestrator,
        }
    }

    #[tokio::test]
    async fn switch_toggles_flag_and_adapter() {
        let f = fixture(Environment::Development);

        let outcome = f.orchestrator.switch(false).await.unwrap();

        assert_eq!(outcome.to, Environment::Production);
        assert_eq!(outcome.restore, None);
        assert_eq!(f.orchestrator.state().current(), Some(Environment::Production));
        assert_eq!(f.orchestrator.host().environment(), Environment::Production);
        assert_eq!(f.orchestrator.phase(), SwitchPhase::Done);
    }

    #[tokio::test]
    async fn copy_is_ignored_when_leaving_development() {
        let f = fixture(Environment::Development);
        f.factory
            .store_for(Environment::Development)
            .seed("users", vec![Document::from_value(json!({"_id": 1})).unwrap()]);

        let outcome = f.orchestrator.switch(true).await.unwrap();

        assert_eq!(outcome.restore, None);
        assert!(f.factory.store_for(Environment::Production).documents("users").is_empty());
    }

    #[tokio::test]
    async fn concurrent_switch_fails_fast() {
        let f = fixture(Environment::Development);
        let _held = f.orchestrator.in_flight.try_lock().unwrap();

        let err = f.orchestrator.switch(false).await.unwrap_err();
        assert!(matches!(err, SwitchError::SwitchInProgress));
        assert!(f.orchestrator.is_busy());
    }

    #[tokio::test]
    async fn peer_environment_is_idempotent() {
        let f = fixture(Environment::Development);
        f.orchestrator.state().set(Environment::Development).await.unwrap();

        assert!(!f.orchestrator.apply_peer_environment(Environment::Development).await.unwrap());
        assert!(f.orchestrator.apply_peer_environment(Environment::Production).await.unwrap());
        assert_eq!(f.orchestrator.host().environment(), Environment::Production);
        assert_eq!(f.factory.connects(), 1);
    }
}
