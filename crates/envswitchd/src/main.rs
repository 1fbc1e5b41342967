//! envswitchd - hosts the envswitch trigger endpoints
//!
//! - `GET  /api/switch-env`: current environment and switch phase
//! - `POST /api/switch-env`: toggle, body `{ "copyDatabase": bool }`
//! - `POST /api/copy-db`: copy production into development
//! - `GET  /api/switch-env/sync`: environment announcements from peers

mod server;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use envswitch_core::{runtime, EnvSwitchConfig};
use tracing::Level;

#[derive(Parser)]
#[command(name = "envswitchd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "envswitch daemon", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, env = "ENVSWITCH_CONFIG", default_value = envswitch_core::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Address to listen on
    #[arg(short, long, env = "ENVSWITCH_LISTEN", default_value = "0.0.0.0:3000")]
    listen: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    envswitch_core::init_tracing(cli.json, level);

    let config = EnvSwitchConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config {:?}", cli.config))?;
    let peer_secret = config.peer_secret().context("Failed to read peer secret")?;
    let orchestrator = runtime::connect(&config)
        .await
        .context("Failed to connect")?;

    let listener = tokio::net::TcpListener::bind(&cli.listen)
        .await
        .with_context(|| format!("Failed to bind {}", cli.listen))?;
    server::serve(listener, server::ApiState::new(orchestrator, peer_secret)).await
}
