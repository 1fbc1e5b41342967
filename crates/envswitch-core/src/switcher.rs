//! Live adapter swap.
//!
//! Only the orchestrator calls [`AdapterSwitcher::switch`]; it serializes
//! switches so a host handle never sees two swaps at once.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::adapter::{Adapter, AdapterFactory, HostHandle};
use crate::environment::Environment;
use crate::error::Result;
use crate::restore::RestoreEngine;
use crate::snapshot::PendingSnapshot;

#[derive(Debug, Default)]
pub struct AdapterSwitcher {
    pending: Option<PendingSnapshot>,
    restorer: RestoreEngine,
}

impl AdapterSwitcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore this pending snapshot after the next development connect.
    pub fn with_pending_snapshot(mut self, pending: PendingSnapshot) -> Self {
        self.pending = Some(pending);
        self
    }

    /// Tear down the current adapter, build one for `target`, bind it to the
    /// host and connect it.
    #[instrument(skip(self, host, factory), fields(target = %target))]
    pub async fn switch(
        &self,
        host: &HostHandle,
        target: Environment,
        factory: &dyn AdapterFactory,
    ) -> Result<()> {
        let previous = host.current();
        if let Some(destroy) = previous.destroy_hook() {
            if let Err(e) = destroy().await {
                warn!(environment = %previous.environment(), error = %e, "adapter teardown failed, continuing");
            }
        }

        let mut adapter = factory.create(target).await?;
        adapter.init(host.context());
        let adapter = Arc::new(adapter);
        host.rebind(Arc::clone(&adapter));
        debug!("host rebound to new adapter");

        self.connect(&adapter).await
    }

    /// Run the connect lifecycle of the host's current adapter (process start).
    pub async fn connect_current(&self, host: &HostHandle) -> Result<()> {
        self.connect(&host.current()).await
    }

    async fn connect(&self, adapter: &Adapter) -> Result<()> {
        if let Some(connect) = adapter.connect_hook() {
            connect().await?;
        }
        self.after_connect(adapter).await
    }

    async fn after_connect(&self, adapter: &Adapter) -> Result<()> {
        if adapter.environment() != Environment::Development {
            return Ok(());
        }
        let Some(pending) = &self.pending else {
            return Ok(());
        };
        if let Some(snapshot) = pending.take().await? {
            info!(path = %pending.path().display(), "restoring pending snapshot");
            self.restorer.restore(adapter.store().as_ref(), &snapshot).await?;
        }
        Ok(())
    }
}
