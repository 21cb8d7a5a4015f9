//! bond-sync - BondApp data synchronization tool
//!
//! Pushes the local BondApp collections to a shared remote, pulls them back,
//! watches for other devices' changes, and exports/imports snapshots. This
//! binary is the composition root: it builds every service explicitly and
//! hands them to the orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use bond_common::config::{self, TomlConfig};
use bond_common::db::init_database;
use bond_common::device::resolve_device_id;
use bond_common::remote::{DocumentStore, SqliteDocumentStore};
use bond_common::{EventBus, LocalStore, RemoteSyncClient, SyncEvent, SyncOrchestrator, SyncStatus};

/// Command-line arguments for bond-sync
#[derive(Parser, Debug)]
#[command(name = "bond-sync")]
#[command(about = "Synchronize BondApp data between devices")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "BONDAPP_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding the local database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Shared SQLite database acting as the remote
    #[arg(long, env = "BONDAPP_REMOTE")]
    remote: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload every local collection, replacing the remote copies
    Push,
    /// Download every collection, replacing the local copies
    Pull,
    /// Show local and remote state per collection
    Status,
    /// Check that the remote accepts writes
    Check,
    /// Write a JSON snapshot of all local collections
    Export {
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Overwrite local collections from a JSON snapshot
    Import {
        /// Snapshot file produced by `export`
        file: PathBuf,
    },
    /// Apply other devices' changes as they happen (Ctrl+C to stop)
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = config::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        "Starting bond-sync v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );

    let root_folder = config::resolve_root_folder(args.root_folder.as_deref(), &config);
    let db_path = config::database_path(&root_folder);
    info!("Local database: {}", db_path.display());

    let pool = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open local database {}", db_path.display()))?;
    let local = LocalStore::new(pool, config.collections.clone());

    match args.command {
        Command::Export { output } => export(&local, output).await,
        Command::Import { file } => import(&local, file).await,
        Command::Push => push(&connect(&config, args.remote, local).await?).await,
        Command::Pull => pull(&connect(&config, args.remote, local).await?).await,
        Command::Status => status(&connect(&config, args.remote, local).await?).await,
        Command::Check => check(&connect(&config, args.remote, local).await?).await,
        Command::Watch => watch(&connect(&config, args.remote, local).await?).await,
    }
}

/// Wire device identity, remote store, client and orchestrator together
async fn connect(
    config: &TomlConfig,
    remote_arg: Option<PathBuf>,
    local: LocalStore,
) -> Result<SyncOrchestrator> {
    let Some(remote_path) = remote_arg.or_else(|| config.remote_path.clone()) else {
        bail!("No remote configured: pass --remote or set remote_path in the config file");
    };

    let remote_pool = init_database(&remote_path)
        .await
        .with_context(|| format!("Failed to open remote {}", remote_path.display()))?;
    let remote: Arc<dyn DocumentStore> = Arc::new(SqliteDocumentStore::new(
        remote_pool,
        config.sync.poll_interval(),
    ));
    info!("Remote: {}", remote_path.display());

    let device_id = resolve_device_id(
        &local,
        config.device_id.as_deref(),
        config.generate_device_id,
    )
    .await;
    match &device_id {
        Some(id) => info!("Device id: {}", id),
        None => warn!("Running without a device id; live updates from other anonymous devices are dropped"),
    }

    let client = Arc::new(RemoteSyncClient::new(
        remote,
        config.collections.clone(),
        device_id,
    ));

    Ok(SyncOrchestrator::new(
        client,
        local,
        EventBus::default(),
        config.sync.timing(),
    ))
}

async fn push(orchestrator: &SyncOrchestrator) -> Result<()> {
    let report = orchestrator.push().await?;

    for (collection, records) in &report.pushed {
        println!("  pushed  {:<14} {} records", collection, records);
    }
    for (collection, err) in &report.failed {
        println!("  FAILED  {:<14} {}", collection, err);
    }
    finish(orchestrator)
}

async fn pull(orchestrator: &SyncOrchestrator) -> Result<()> {
    let report = orchestrator.pull().await?;

    let mut fetched: Vec<_> = report.fetched.iter().collect();
    fetched.sort_by(|a, b| a.0.cmp(b.0));
    for (collection, data) in fetched {
        println!("  pulled  {:<14} {} records", collection, data.len());
    }
    for collection in &report.missing {
        println!("  absent  {:<14} (local copy kept)", collection);
    }
    for (collection, err) in &report.failed {
        println!("  FAILED  {:<14} {}", collection, err);
    }
    finish(orchestrator)
}

/// Print the final status line; non-zero exit on error status
fn finish(orchestrator: &SyncOrchestrator) -> Result<()> {
    let message = orchestrator.message().unwrap_or_default();
    match orchestrator.status() {
        SyncStatus::Error => bail!("{}", message),
        status => {
            println!("{}: {}", status, message);
            Ok(())
        }
    }
}

async fn status(orchestrator: &SyncOrchestrator) -> Result<()> {
    let client = orchestrator.client();
    let local = orchestrator.local();

    println!(
        "device:    {}",
        client
            .device_id()
            .map(|d| d.to_string())
            .unwrap_or_else(|| "(none)".to_string())
    );
    println!(
        "last sync: {}",
        orchestrator
            .last_sync()
            .await
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| "never".to_string())
    );
    println!();
    println!("{:<14} {:>7} {:>7}  {:<30} writer", "collection", "local", "remote", "remote modified");

    for name in client.collections().iter() {
        let local_count = local.get(name).await.len();
        let (remote_count, modified, writer) = match client.get_envelope(name).await {
            Ok(Some(env)) => (
                env.data.len().to_string(),
                env.last_modified
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "-".to_string()),
                env.device_id
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "(none)".to_string()),
            ),
            Ok(None) => ("-".to_string(), "-".to_string(), "-".to_string()),
            Err(e) => ("?".to_string(), format!("error: {}", e), "-".to_string()),
        };
        println!(
            "{:<14} {:>7} {:>7}  {:<30} {}",
            name, local_count, remote_count, modified, writer
        );
    }
    Ok(())
}

async fn check(orchestrator: &SyncOrchestrator) -> Result<()> {
    if orchestrator.client().check_connection().await {
        println!("remote reachable");
        Ok(())
    } else {
        bail!("remote unreachable");
    }
}

async fn export(local: &LocalStore, output: Option<PathBuf>) -> Result<()> {
    let snapshot = local.export_data().await;
    match output {
        Some(path) => {
            tokio::fs::write(&path, snapshot)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Exported to {}", path.display());
        }
        None => println!("{}", snapshot),
    }
    Ok(())
}

async fn import(local: &LocalStore, file: PathBuf) -> Result<()> {
    let snapshot = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let imported = local.import_data(&snapshot).await;
    if imported == 0 {
        bail!("Nothing imported from {}", file.display());
    }
    println!("imported {} collections", imported);
    Ok(())
}

async fn watch(orchestrator: &SyncOrchestrator) -> Result<()> {
    let mut rx = orchestrator.events().subscribe();
    let subscribed = orchestrator.start_live_updates().await?;
    if subscribed == 0 {
        bail!("Could not subscribe to any collection");
    }
    println!("watching {} collections, Ctrl+C to stop", subscribed);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Stopping live updates");
                break;
            }
            event = rx.recv() => match event {
                Ok(SyncEvent::CollectionUpdated { collection, records, timestamp, .. }) => {
                    println!("{}  {:<14} {} records", timestamp.to_rfc3339(), collection, records);
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Missed {} events", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    orchestrator.stop_live_updates();
    Ok(())
}
