//! Command-line interface for mysql-table-sync
//!
//! # Usage Examples
//!
//! ```bash
//! # One local sync; meant for cron
//! mysql-table-sync sync
//!
//! # Local sync followed by every remote environment
//! REPLICATION_CONFIG=/etc/replication.json mysql-table-sync sync-multi
//!
//! # API server on the configured bind address, syncing every 10 minutes
//! mysql-table-sync serve --interval 10m
//!
//! # Merged running and stored statistics as JSON
//! mysql-table-sync status
//!
//! # Rows removed from the slave's customers table since a given time
//! mysql-table-sync deleted --table customers --since "2024-01-31 00:00:00"
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use mysql_table_sync::config::parse_interval;
use mysql_table_sync::{connect_orchestrator, load_config, AppConfig, AppState};
use remote_sync::{MultiEnvironmentSync, PeerOutcome, TableTransfer};
use replication_engine::Orchestrator;
use sync_core::{Role, SqlValue};
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "mysql-table-sync")]
#[command(about = "Periodic full-table replication between MySQL databases")]
#[command(long_about = None)]
struct Cli {
    /// Configuration file; config.local.json, config.json and config.example.json
    /// in the working directory are tried after it
    #[arg(long, global = true, env = "REPLICATION_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one local replication pass
    Sync,

    /// Run a local pass, then push/pull with every remote environment
    SyncMulti,

    /// Serve the replication HTTP API
    Serve {
        /// Listen address (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,

        /// Also sync periodically ("300", "30s", "5m", "1h")
        #[arg(long)]
        interval: Option<String>,
    },

    /// Purge deletion markers older than the given number of days
    PurgeMetadata {
        #[arg(long, default_value = "30")]
        days: u32,
    },

    /// Print running and stored statistics as JSON
    Status,

    /// Query /api/status of every remote environment
    RemoteStatus,

    /// List rows replication deleted from a table, as JSON
    Deleted {
        #[arg(long)]
        table: String,

        /// Database whose metadata is read (master or slave)
        #[arg(long, default_value = "slave")]
        role: Role,

        /// Only deletions after this time ("2024-01-31 10:00:00")
        #[arg(long)]
        since: Option<String>,
    },
}

fn stamp() -> String {
    chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]").to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("{} Error: {e:#}", stamp());
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("Failed to read the working directory")?;
    let (_, config) = load_config(cli.config.as_deref(), &cwd)?;

    match cli.command {
        Commands::Sync => run_sync(&config).await,
        Commands::SyncMulti => run_sync_multi(&config).await,
        Commands::Serve { bind, interval } => {
            let interval = interval.as_deref().map(parse_interval).transpose()?;
            run_serve(config, bind, interval).await
        }
        Commands::PurgeMetadata { days } => run_purge(&config, days).await,
        Commands::Status => run_status(&config).await,
        Commands::RemoteStatus => run_remote_status(&config).await,
        Commands::Deleted { table, role, since } => {
            run_deleted(&config, &table, role, since.as_deref()).await
        }
    }
}

async fn close(orchestrator: &Orchestrator) {
    if let Err(e) = orchestrator.registry().close_all().await {
        warn!("Failed to close database connections: {}", e);
    }
}

/// A failed pass is reported, not turned into an exit code.
async fn run_sync(config: &AppConfig) -> anyhow::Result<()> {
    println!("{} Starting replication sync...", stamp());
    let mut orchestrator = connect_orchestrator(config).await?;

    let result = orchestrator.sync().await;
    if result.success {
        println!(
            "{} Sync completed successfully in {}s",
            stamp(),
            result.duration
        );
    } else {
        println!(
            "{} Sync failed: {}",
            stamp(),
            result.error.as_deref().unwrap_or("unknown error")
        );
    }

    close(&orchestrator).await;
    Ok(())
}

fn print_transfers(direction: &str, transfers: &std::collections::BTreeMap<String, TableTransfer>) {
    for (table, transfer) in transfers {
        match transfer {
            TableTransfer::Transferred {
                rows,
                inserted,
                updated,
            } => println!("  {direction} {table}: {rows} rows (I:{inserted}, U:{updated})"),
            TableTransfer::NothingNew { message, .. } => {
                println!("  {direction} {table}: {message}")
            }
            TableTransfer::Failed { error } => println!("  {direction} {table}: ERROR - {error}"),
        }
    }
}

async fn run_sync_multi(config: &AppConfig) -> anyhow::Result<()> {
    println!("{} Starting multi-environment sync...", stamp());
    if config.remote_environments.is_empty() {
        println!("{} No remote environments configured. Exiting.", stamp());
        return Ok(());
    }

    let orchestrator = Arc::new(Mutex::new(connect_orchestrator(config).await?));
    let multi = MultiEnvironmentSync::new(Arc::clone(&orchestrator), &config.remote_environments);

    println!("{} Syncing local databases...", stamp());
    let local = orchestrator.lock().await.sync().await;
    if local.success {
        println!("{} Local sync completed in {}s", stamp(), local.duration);
    } else {
        println!(
            "{} Local sync failed: {}",
            stamp(),
            local.error.as_deref().unwrap_or("unknown error")
        );
        println!("{} Continuing with remote sync...", stamp());
    }

    println!("{} Syncing with remote environments...", stamp());
    for (name, outcome) in multi.sync_with_all_remotes().await {
        match outcome {
            PeerOutcome {
                success: true,
                result: Some(report),
                ..
            } => {
                println!("{} Successfully synced with {}", stamp(), name);
                print_transfers("Push", &report.pushed);
                print_transfers("Pull", &report.pulled);
            }
            PeerOutcome { error, .. } => println!(
                "{} Failed to sync with {}: {}",
                stamp(),
                name,
                error.as_deref().unwrap_or("unknown error")
            ),
        }
    }

    close(&*orchestrator.lock().await).await;
    println!("{} Multi-environment sync completed", stamp());
    Ok(())
}

async fn run_serve(
    config: AppConfig,
    bind: Option<String>,
    interval: Option<Duration>,
) -> anyhow::Result<()> {
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let orchestrator = Arc::new(Mutex::new(connect_orchestrator(&config).await?));

    if let Some(period) = interval {
        let orchestrator = Arc::clone(&orchestrator);
        info!("Periodic sync every {}s", period.as_secs());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let result = orchestrator.lock().await.sync().await;
                if let Some(e) = result.error {
                    error!("Periodic sync failed: {}", e);
                }
            }
        });
    }

    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("Failed to bind {bind}"))?;
    mysql_table_sync::serve(listener, AppState::new(orchestrator, config)).await
}

async fn run_purge(config: &AppConfig, days: u32) -> anyhow::Result<()> {
    let orchestrator = connect_orchestrator(config).await?;
    let purged = orchestrator
        .purge_deleted_metadata(days)
        .await
        .context("Failed to purge replication metadata")?;
    if purged.is_empty() {
        println!("{} Tracking is disabled; nothing to purge", stamp());
    }
    for (role, count) in purged {
        println!(
            "{} Purged {} deleted-row record(s) older than {} day(s) on {}",
            stamp(),
            count,
            days,
            role
        );
    }
    close(&orchestrator).await;
    Ok(())
}

async fn run_status(config: &AppConfig) -> anyhow::Result<()> {
    let orchestrator = connect_orchestrator(config).await?;
    let stats = orchestrator.get_stats().await;
    let status = serde_json::json!({
        "mode": orchestrator.mode(),
        "tables": orchestrator.settings().tables.iter().map(|t| &t.name).collect::<Vec<_>>(),
        "stats": stats,
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    close(&orchestrator).await;
    Ok(())
}

async fn run_remote_status(config: &AppConfig) -> anyhow::Result<()> {
    if config.remote_environments.is_empty() {
        println!("{} No remote environments configured", stamp());
        return Ok(());
    }
    let orchestrator = Arc::new(Mutex::new(connect_orchestrator(config).await?));
    let multi = MultiEnvironmentSync::new(Arc::clone(&orchestrator), &config.remote_environments);
    let statuses = multi.remote_statuses().await;
    println!("{}", serde_json::to_string_pretty(&statuses)?);
    close(&*orchestrator.lock().await).await;
    Ok(())
}

async fn run_deleted(
    config: &AppConfig,
    table: &str,
    role: Role,
    since: Option<&str>,
) -> anyhow::Result<()> {
    let since = since
        .map(|raw| {
            SqlValue::from(raw)
                .as_datetime()
                .with_context(|| format!("Invalid --since timestamp: {raw}"))
        })
        .transpose()?;

    let orchestrator = connect_orchestrator(config).await?;
    let deleted = orchestrator
        .get_deleted_rows(role, table, since)
        .await
        .with_context(|| format!("Failed to read deleted rows of {table} on {role}"))?;
    println!("{}", serde_json::to_string_pretty(&deleted)?);
    close(&orchestrator).await;
    Ok(())
}
