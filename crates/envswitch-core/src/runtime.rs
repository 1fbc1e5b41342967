//! Wiring a [`SwitchOrchestrator`] from an [`EnvSwitchConfig`].

use std::sync::Arc;

use envswitch_store::{DocumentStore, SurrealDocumentStore};
use tracing::{info, warn};

use crate::adapter::{AdapterFactory, HostContext, HostHandle, SurrealAdapterFactory};
use crate::config::{EnvSwitchConfig, StateBackend};
use crate::copy_policy::log_warning;
use crate::env_state::EnvironmentState;
use crate::error::Result;
use crate::orchestrator::SwitchOrchestrator;
use crate::peers::HttpPeerNotifier;
use crate::switcher::AdapterSwitcher;

/// Build an orchestrator over SurrealDB connections and connect the adapter
/// for the persisted environment.
pub async fn connect(config: &EnvSwitchConfig) -> Result<Arc<SwitchOrchestrator>> {
    config.validate()?;

    let production = config.connections.production.surreal_config()?;
    let development = config.connections.development.surreal_config()?;

    let control: Option<Arc<dyn DocumentStore>> = match config.state {
        StateBackend::Record => Some(Arc::new(SurrealDocumentStore::setup(production.clone()).await?)),
        _ => None,
    };
    let state = Arc::new(EnvironmentState::new(config.environment_store(control)?));
    let env = state.get().await;

    let factory = SurrealAdapterFactory::new(production, development);
    let host = Arc::new(HostHandle::new(
        factory.adapter(env),
        HostContext::new(config.schema()).with_upload_policy(config.upload_policy()),
    ));
    info!(env = %env, state = state.backend(), "starting");

    let orchestrator = assemble(config, state, host, Arc::new(factory))?;
    orchestrator.connect_initial().await?;
    Ok(Arc::new(orchestrator))
}

/// Apply the non-connection settings of `config` to a new orchestrator.
pub fn assemble(
    config: &EnvSwitchConfig,
    state: Arc<EnvironmentState>,
    host: Arc<HostHandle>,
    factory: Arc<dyn AdapterFactory>,
) -> Result<SwitchOrchestrator> {
    let copy = config.copy_config(log_warning)?;
    let switcher = AdapterSwitcher::new().with_pending_snapshot(config.pending_snapshot());

    let mut orchestrator = SwitchOrchestrator::new(state, host, factory)
        .with_copy_config(copy)
        .with_log_database_size(config.log_database_size)
        .with_switcher(switcher);

    if !config.peers.urls.is_empty() {
        match config.peer_secret()? {
            Some(secret) => {
                let notifier = HttpPeerNotifier::new(config.peers.urls.clone(), secret)?;
                orchestrator = orchestrator.with_notifier(Arc::new(notifier));
            }
            None => warn!("peers are configured without a secret; peer notification disabled"),
        }
    }
    Ok(orchestrator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::MemoryAdapterFactory;
    use crate::environment::Environment;
    use envswitch_store::fakes::MemoryDocumentStore;

    #[tokio::test]
    async fn assemble_applies_pending_snapshot_path() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EnvSwitchConfig::default();
        config.pending_snapshot = dir.path().join("pending.json");
        config.peers.urls = vec!["http://10.0.0.2:3000".into()];

        let factory = Arc::new(MemoryAdapterFactory::new(
            Arc::new(MemoryDocumentStore::new("production")),
            Arc::new(MemoryDocumentStore::new("development")),
        ));
        let host = Arc::new(HostHandle::new(
            factory.adapter(Environment::Development),
            HostContext::default(),
        ));
        let orchestrator = assemble(
            &config,
            Arc::new(EnvironmentState::in_memory()),
            host,
            factory.clone(),
        )
        .unwrap();

        crate::snapshot::PendingSnapshot::new(&config.pending_snapshot)
            .write(&crate::snapshot::Snapshot::default())
            .await
            .unwrap();
        orchestrator.connect_initial().await.unwrap();

        assert!(!config.pending_snapshot.exists());
        assert_eq!(factory.connects(), 1);
    }

    #[tokio::test]
    async fn connect_rejects_unsafe_development_endpoint() {
        let mut config = EnvSwitchConfig::default();
        config.connections.development.endpoint = "wss://staging.example.com".into();

        assert!(connect(&config).await.is_err());
    }
}
