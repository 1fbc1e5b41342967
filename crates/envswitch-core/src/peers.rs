//! Propagating a completed switch to other running instances.

use async_trait::async_trait;
use tracing::debug;

use crate::environment::Environment;
use crate::error::Result;
use crate::obs;

/// Path peers expose for environment sync.
pub const PEER_SYNC_PATH: &str = "/api/switch-env/sync";

/// Tells other instances about a new environment. Failures are logged by
/// the implementation, never returned.
#[async_trait]
pub trait PeerNotifier: Send + Sync {
    async fn notify(&self, env: Environment);
}

/// Peer notifier over HTTP.
pub struct HttpPeerNotifier {
    peers: Vec<String>,
    secret: String,
    http_client: reqwest::Client,
}

impl HttpPeerNotifier {
    pub fn new(peers: Vec<String>, secret: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("envswitch/", env!("CARGO_PKG_VERSION")))
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            peers,
            secret: secret.into(),
            http_client,
        })
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    fn sync_url(peer: &str) -> String {
        format!("{}{}", peer.trim_end_matches('/'), PEER_SYNC_PATH)
    }
}

#[async_trait]
impl PeerNotifier for HttpPeerNotifier {
    async fn notify(&self, env: Environment) {
        for peer in &self.peers {
            let url = Self::sync_url(peer);
            let response = self
                .http_client
                .get(&url)
                .query(&[("env", env.as_str()), ("secret", self.secret.as_str())])
                .send()
                .await;

            match response.and_then(|r| r.error_for_status()) {
                Ok(_) => debug!(peer = %peer, env = %env, "peer notified"),
                Err(e) => obs::emit_peer_notify_failed(peer, &e),
            }
        }
    }
}
