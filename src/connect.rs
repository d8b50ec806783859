use std::sync::Arc;

use anyhow::Context;
use replication_engine::{
    sanitize_connection_string, ConnectionRegistry, DatabaseStats, EphemeralStats, Orchestrator,
    StatsSink,
};
use sync_core::Role;
use tracing::{info, warn};

use crate::config::AppConfig;

/// Connect master, slave and (when configured) stats, then build the orchestrator.
///
/// A stats database that cannot be reached degrades to in-process history.
pub async fn connect_orchestrator(config: &AppConfig) -> anyhow::Result<Orchestrator> {
    let mut registry = ConnectionRegistry::new();

    let master = config
        .databases
        .master
        .as_ref()
        .context("Master database configuration is required")?;
    registry
        .connect(Role::Master, master)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to master database {}",
                sanitize_connection_string(&master.url())
            )
        })?;

    let slave = config
        .databases
        .slave
        .as_ref()
        .context("Slave database configuration is required")?;
    registry
        .connect(Role::Slave, slave)
        .await
        .with_context(|| {
            format!(
                "Failed to connect to slave database {}",
                sanitize_connection_string(&slave.url())
            )
        })?;

    if let Some(stats) = &config.databases.stats {
        if let Err(e) = registry.connect(Role::Stats, stats).await {
            warn!(
                "Stats database {} unavailable, keeping history in memory: {}",
                sanitize_connection_string(&stats.url()),
                e
            );
        }
    }

    build_orchestrator(config, registry).await
}

/// Build the orchestrator over an already populated registry.
pub async fn build_orchestrator(
    config: &AppConfig,
    registry: ConnectionRegistry,
) -> anyhow::Result<Orchestrator> {
    let settings = config.settings()?;
    let registry = Arc::new(registry);

    let sink: Arc<dyn StatsSink> = if registry.has_role(Role::Stats) {
        match DatabaseStats::initialize(Arc::clone(&registry)).await {
            Ok(stats) => Arc::new(stats),
            Err(e) => {
                warn!("Failed to initialize stats database, keeping history in memory: {}", e);
                Arc::new(EphemeralStats::new())
            }
        }
    } else {
        Arc::new(EphemeralStats::new())
    };

    info!(
        "Replicating {} table(s) in {} mode ({})",
        settings.tables.len(),
        settings.mode,
        if settings.tracking.is_tracked() {
            "tracking enabled"
        } else {
            "tracking disabled"
        }
    );
    Ok(Orchestrator::new(registry, settings, sink))
}
