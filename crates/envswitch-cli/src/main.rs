//! envswitch - production/development database switching CLI
//!
//! ## Commands
//!
//! - `status`: Show the persisted environment and configured connections
//! - `switch`: Toggle the environment, optionally copying production data
//! - `copy-db`: Copy production into development without switching
//! - `backup`: Snapshot the current database to a file or the pending slot
//! - `restore`: Replace the current database with a snapshot file
//! - `check-config`: Validate `envswitch.toml` and report copy warnings

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use envswitch_core::endpoints::{handle_copy, handle_switch};
use envswitch_core::{runtime, EnvSwitchConfig, Snapshot, SwitchRequest, DEFAULT_CONFIG_FILE};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "envswitch")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Switch an application between production and development databases", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, env = "ENVSWITCH_CONFIG", default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current environment
    Status,

    /// Toggle between production and development
    Switch {
        /// Copy production data into development (only when leaving production)
        #[arg(long)]
        copy: bool,
    },

    /// Copy the production database into development (development only)
    CopyDb,

    /// Snapshot the database the current environment points at
    Backup(BackupArgs),

    /// Replace the current database with a snapshot file
    Restore {
        /// Snapshot file written by `backup --out`
        #[arg(long)]
        from: PathBuf,
    },

    /// Validate the configuration file
    CheckConfig,
}

#[derive(Args)]
struct BackupArgs {
    /// Write the snapshot to this file
    #[arg(short, long)]
    out: Option<PathBuf>,

    /// Stage the snapshot for restore on the next development connect
    #[arg(long)]
    pending: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum BackupTarget {
    File(PathBuf),
    Pending,
}

impl BackupArgs {
    fn target(self) -> Result<BackupTarget> {
        match (self.out, self.pending) {
            (Some(out), false) => Ok(BackupTarget::File(out)),
            (None, true) => Ok(BackupTarget::Pending),
            (Some(_), true) => anyhow::bail!("--out and --pending cannot be combined"),
            (None, false) => anyhow::bail!("backup needs --out <file> or --pending"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    envswitch_core::init_tracing(cli.json, level);

    match cli.command {
        Commands::Status => cmd_status(&cli.config).await,
        Commands::Switch { copy } => cmd_switch(&cli.config, copy).await,
        Commands::CopyDb => cmd_copy_db(&cli.config).await,
        Commands::Backup(args) => cmd_backup(&cli.config, args).await,
        Commands::Restore { from } => cmd_restore(&cli.config, &from).await,
        Commands::CheckConfig => cmd_check_config(&cli.config),
    }
}

/// Load `path`, or fall back to defaults when the default file is absent.
fn load_config(path: &Path) -> Result<EnvSwitchConfig> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG_FILE) {
        info!("no {} found, using defaults", DEFAULT_CONFIG_FILE);
        return Ok(EnvSwitchConfig::default());
    }
    EnvSwitchConfig::load(path).with_context(|| format!("Failed to load config {:?}", path))
}

async fn cmd_status(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let orchestrator = runtime::connect(&config)
        .await
        .context("Failed to connect")?;
    let env = orchestrator.state().get().await;

    println!("Environment: {}", env);
    println!("State backend: {}", orchestrator.state().backend());
    println!("Config: {:?}", path);
    println!("Production: {}", config.connections.production.endpoint);
    println!("Development: {}", config.connections.development.endpoint);
    let uploads = config.upload_policy();
    let storage = if uploads.cloud_storage_active(env) {
        match uploads.storage_prefix(env, "") {
            Some(prefix) => format!("cloud storage under {:?}", prefix),
            None => "cloud storage".to_string(),
        }
    } else {
        "local file system".to_string()
    };
    println!("Uploads: {}", storage);
    if !config.peers.urls.is_empty() {
        println!("Peers: {}", config.peers.urls.join(", "));
    }
    Ok(())
}

async fn cmd_switch(path: &Path, copy: bool) -> Result<()> {
    let config = load_config(path)?;
    let orchestrator = runtime::connect(&config)
        .await
        .context("Failed to connect")?;

    let response = handle_switch(&orchestrator, SwitchRequest { copy_database: copy }).await;
    orchestrator.wait_for_peers().await;

    if !response.success {
        anyhow::bail!("{}", response.message);
    }
    println!("{}", response.message);
    Ok(())
}

async fn cmd_copy_db(path: &Path) -> Result<()> {
    let config = load_config(path)?;
    let orchestrator = runtime::connect(&config)
        .await
        .context("Failed to connect")?;

    let response = handle_copy(&orchestrator).await;
    if !response.success {
        anyhow::bail!("{}", response.message);
    }
    println!("{}", response.message);
    Ok(())
}

async fn cmd_backup(path: &Path, args: BackupArgs) -> Result<()> {
    let target = args.target()?;
    let config = load_config(path)?;
    let orchestrator = runtime::connect(&config)
        .await
        .context("Failed to connect")?;

    let snapshot = orchestrator
        .capture_current()
        .await
        .context("Failed to create backup")?;
    let size = envswitch_core::format_file_size(snapshot.size_bytes()?);

    match target {
        BackupTarget::Pending => {
            let pending = config.pending_snapshot();
            pending
                .write(&snapshot)
                .await
                .with_context(|| format!("Failed to write {:?}", pending.path()))?;
            println!(
                "Staged {} documents ({}) for the next development connect at {:?}",
                snapshot.document_count(),
                size,
                pending.path()
            );
        }
        BackupTarget::File(out) => {
            tokio::fs::write(&out, snapshot.to_json()?)
                .await
                .with_context(|| format!("Failed to write to {:?}", out))?;
            println!(
                "Wrote {} documents in {} collections ({}) to {:?}",
                snapshot.document_count(),
                snapshot.collections.len(),
                size,
                out
            );
        }
    }
    Ok(())
}

async fn cmd_restore(path: &Path, from: &Path) -> Result<()> {
    let raw = tokio::fs::read(from).await.with_context(|| format!("Failed to read {:?}", from))?;
    let snapshot = Snapshot::from_json(&raw).context("Invalid snapshot file")?;

    let config = load_config(path)?;
    let orchestrator = runtime::connect(&config)
        .await
        .context("Failed to connect")?;
    let env = orchestrator.state().get().await;

    let report = orchestrator
        .restore_current(&snapshot)
        .await
        .context("Restore failed")?;
    println!(
        "Restored {} documents into {} ({} indexes created, {} failed)",
        report.documents, env, report.indexes_created, report.indexes_failed
    );
    Ok(())
}

fn cmd_check_config(path: &Path) -> Result<()> {
    let warnings = check_config(path)?;
    if warnings.is_empty() {
        println!("{:?} is valid", path);
    } else {
        for warning in &warnings {
            println!("warning: {}", warning);
        }
        println!("{:?} is valid with {} warning(s)", path, warnings.len());
    }
    Ok(())
}

/// Load and validate the config, returning copy-setting warnings.
fn check_config(path: &Path) -> Result<Vec<String>> {
    let config = EnvSwitchConfig::load(path).with_context(|| format!("Failed to load config {:?}", path))?;
    config.validate().context("Invalid configuration")?;

    let mut warnings = Vec::new();
    config.copy_config(|w| warnings.push(w))?;
    Ok(warnings)
}
