//! Replication orchestrator: drives table passes for the configured mode.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sync_core::values::{mysql_datetime, mysql_datetime_option};
use sync_core::{
    ReplicationError, ReplicationMode, Result, Role, Row, SqlValue, TableConfig, TrackingMode,
};
use tracing::{error, info, warn};

use crate::connection::ConnectionRegistry;
use crate::metadata::{DeletedRow, MetadataStore};
use crate::statement::Statement;
use crate::stats::{LogLevel, OverallStats, RunStatus, RunSummary, StatsSink};
use crate::table_sync::{ConflictPolicy, TableSync, TableSyncStats};

/// What to replicate and how.
#[derive(Debug, Clone)]
pub struct ReplicationSettings {
    pub mode: ReplicationMode,
    pub tracking: TrackingMode,
    pub tables: Vec<TableConfig>,
}

/// Per-table entry of the most recent run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRunStats {
    pub rows: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub skipped: u64,
    #[serde(with = "mysql_datetime")]
    pub timestamp: NaiveDateTime,
}

/// Process-lifetime counters, plus the breakdown of the most recent run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningStats {
    #[serde(with = "mysql_datetime_option")]
    pub last_sync: Option<NaiveDateTime>,
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    pub last_error: Option<String>,
    pub tables_processed: BTreeMap<String, TableRunStats>,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
}

/// Outcome of [`Orchestrator::sync`]. Errors are folded in, never raised.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub success: bool,
    /// Seconds, rounded to two decimals.
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub stats: RunningStats,
}

/// Running counters merged with the stats sink's aggregates.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    #[serde(flatten)]
    pub running: RunningStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<OverallStats>,
}

/// Counts returned by [`Orchestrator::push_data_to_local`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushResult {
    pub inserted: u64,
    pub updated: u64,
    pub skipped: u64,
}

/// Cursor exposed to peers for incremental pulls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub table: String,
    #[serde(with = "mysql_datetime_option", default)]
    pub last_sync: Option<NaiveDateTime>,
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

pub struct Orchestrator {
    registry: Arc<ConnectionRegistry>,
    settings: ReplicationSettings,
    stats_sink: Arc<dyn StatsSink>,
    running: RunningStats,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        settings: ReplicationSettings,
        stats_sink: Arc<dyn StatsSink>,
    ) -> Self {
        Self {
            registry,
            settings,
            stats_sink,
            running: RunningStats::default(),
        }
    }

    pub fn mode(&self) -> ReplicationMode {
        self.settings.mode
    }

    pub fn settings(&self) -> &ReplicationSettings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn stats_sink(&self) -> Arc<dyn StatsSink> {
        Arc::clone(&self.stats_sink)
    }

    fn table_sync(&self) -> TableSync<'_> {
        TableSync::new(&self.registry, self.settings.mode, self.settings.tracking)
    }

    fn table_config(&self, table: &str) -> Result<&TableConfig> {
        self.settings
            .tables
            .iter()
            .find(|t| t.name == table)
            .ok_or_else(|| {
                ReplicationError::configuration(format!(
                    "Table '{table}' is not configured for replication"
                ))
            })
    }

    /// Run one replication pass over every configured table.
    pub async fn sync(&mut self) -> SyncResult {
        let started = Instant::now();
        self.running.last_sync = Some(now());
        self.running.total_syncs += 1;
        self.running.tables_processed.clear();
        self.running.inserts = 0;
        self.running.updates = 0;
        self.running.deletes = 0;

        let run_id = match self.stats_sink.start_run(self.settings.mode).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Failed to record sync start: {}", e);
                None
            }
        };

        let outcome = self.sync_tables(run_id).await;
        let duration = (started.elapsed().as_secs_f64() * 100.0).round() / 100.0;
        let summary = RunSummary {
            duration_seconds: duration,
            inserts: self.running.inserts,
            updates: self.running.updates,
            deletes: self.running.deletes,
            tables_processed: self.running.tables_processed.len() as u64,
        };

        match outcome {
            Ok(()) => {
                self.running.successful_syncs += 1;
                self.running.last_error = None;
                info!("Replication sync completed successfully in {}s", duration);
                self.finish_run(run_id, RunStatus::Success, None, &summary)
                    .await;
                SyncResult {
                    success: true,
                    duration,
                    error: None,
                    stats: self.running.clone(),
                }
            }
            Err(e) => {
                let message = e.to_string();
                self.running.failed_syncs += 1;
                self.running.last_error = Some(message.clone());
                error!("Replication sync failed: {}", message);
                if let Err(log_err) = self
                    .stats_sink
                    .log_operation(
                        run_id,
                        LogLevel::Error,
                        &message,
                        Some(serde_json::json!({
                            "mode": self.settings.mode.as_str(),
                            "tables_processed": self.running.tables_processed.len(),
                        })),
                    )
                    .await
                {
                    warn!("Failed to record sync error: {}", log_err);
                }
                self.finish_run(run_id, RunStatus::Failed, Some(&message), &summary)
                    .await;
                SyncResult {
                    success: false,
                    duration,
                    error: Some(message),
                    stats: self.running.clone(),
                }
            }
        }
    }

    async fn finish_run(
        &self,
        run_id: Option<u64>,
        status: RunStatus,
        error_message: Option<&str>,
        summary: &RunSummary,
    ) {
        let Some(run_id) = run_id else {
            return;
        };
        if let Err(e) = self
            .stats_sink
            .finish_run(run_id, status, error_message, summary)
            .await
        {
            warn!("Failed to record sync completion: {}", e);
        }
    }

    async fn sync_tables(&mut self, run_id: Option<u64>) -> Result<()> {
        if self.settings.tracking.is_tracked() {
            let metadata = MetadataStore::new(&self.registry);
            for role in Role::REPLICATED {
                metadata.ensure_schema(role).await?;
            }
        }

        let tables = self.settings.tables.clone();
        for config in &tables {
            let stats = match self.settings.mode {
                ReplicationMode::MasterSlave => self.sync_one_way(config).await?,
                ReplicationMode::MasterMaster => self.sync_bidirectional(config).await?,
            };

            self.running.inserts += stats.inserted;
            self.running.updates += stats.updated;
            self.running.deletes += stats.deleted;
            self.running.tables_processed.insert(
                config.name.clone(),
                TableRunStats {
                    rows: stats.rows,
                    inserts: stats.inserted,
                    updates: stats.updated,
                    deletes: stats.deleted,
                    skipped: stats.skipped,
                    timestamp: now(),
                },
            );

            if let Some(run_id) = run_id {
                if let Err(e) = self
                    .stats_sink
                    .record_table(run_id, &config.name, &stats)
                    .await
                {
                    warn!("Failed to record stats for table {}: {}", config.name, e);
                }
            }
        }
        Ok(())
    }

    async fn rollback_quietly(&self, role: Role) {
        if let Err(e) = self.registry.rollback(role).await {
            warn!("Rollback on {} failed: {}", role, e);
        }
    }

    /// master → slave inside one slave transaction.
    async fn sync_one_way(&self, config: &TableConfig) -> Result<TableSyncStats> {
        self.registry.begin_transaction(Role::Slave).await?;
        let result = self
            .table_sync()
            .run(
                config,
                Role::Master,
                Role::Slave,
                ConflictPolicy::SourceAuthoritative,
            )
            .await;
        match result {
            Ok(stats) => {
                self.registry.commit(Role::Slave).await?;
                Ok(stats)
            }
            Err(e) => {
                self.rollback_quietly(Role::Slave).await;
                Err(e)
            }
        }
    }

    /// master → slave then slave → master, committed together or not at all.
    async fn sync_bidirectional(&self, config: &TableConfig) -> Result<TableSyncStats> {
        self.registry.begin_transaction(Role::Slave).await?;
        if let Err(e) = self.registry.begin_transaction(Role::Master).await {
            self.rollback_quietly(Role::Slave).await;
            return Err(e);
        }

        let table_sync = self.table_sync();
        let result: Result<TableSyncStats> = async {
            let mut stats = table_sync
                .run(
                    config,
                    Role::Master,
                    Role::Slave,
                    ConflictPolicy::SourceAuthoritative,
                )
                .await?;
            stats += table_sync
                .run(
                    config,
                    Role::Slave,
                    Role::Master,
                    ConflictPolicy::TargetAuthoritative,
                )
                .await?;
            Ok(stats)
        }
        .await;

        let stats = match result {
            Ok(stats) => stats,
            Err(e) => {
                self.rollback_quietly(Role::Slave).await;
                self.rollback_quietly(Role::Master).await;
                return Err(e);
            }
        };

        if let Err(e) = self.registry.commit(Role::Slave).await {
            self.rollback_quietly(Role::Master).await;
            return Err(e);
        }
        self.registry.commit(Role::Master).await?;
        Ok(stats)
    }

    /// Apply rows received from a peer to master. Additive: nothing is deleted.
    pub async fn push_data_to_local(&self, table: &str, rows: Vec<Row>) -> Result<PushResult> {
        let config = self.table_config(table)?;
        if self.settings.tracking.is_tracked() {
            MetadataStore::new(&self.registry)
                .ensure_schema(Role::Master)
                .await?;
        }

        let table_sync = self.table_sync();
        let resolved = table_sync.resolve_columns(Role::Master, config).await?;

        self.registry.begin_transaction(Role::Master).await?;
        let result = table_sync
            .apply_rows(
                Role::Master,
                &resolved,
                rows,
                ConflictPolicy::SourceAuthoritative,
            )
            .await;
        match result {
            Ok(stats) => {
                self.registry.commit(Role::Master).await?;
                info!(
                    "Applied pushed rows to {}: {} inserted, {} updated, {} unchanged",
                    table, stats.inserted, stats.updated, stats.skipped
                );
                Ok(PushResult {
                    inserted: stats.inserted,
                    updated: stats.updated,
                    skipped: stats.skipped,
                })
            }
            Err(e) => {
                self.rollback_quietly(Role::Master).await;
                Err(e)
            }
        }
    }

    /// Master rows of `table`, limited to `timestampColumn > since` when both exist.
    pub async fn pull_data_from_local(
        &self,
        table: &str,
        since: Option<&SqlValue>,
    ) -> Result<Vec<Row>> {
        let config = self.table_config(table)?;
        let resolved = self
            .table_sync()
            .resolve_columns(Role::Master, config)
            .await?;

        let newer_than = match (since, &resolved.timestamp) {
            (Some(since), Some(ts)) if !since.is_null() => Some((ts.clone(), since.clone())),
            _ => None,
        };

        self.registry
            .query(
                Role::Master,
                &Statement::SelectRows {
                    table: resolved.table,
                    columns: resolved.columns,
                    newer_than,
                },
            )
            .await
    }

    /// Master's last sync time for `table`.
    pub async fn get_table_metadata(&self, table: &str) -> Result<TableMetadata> {
        let config = self.table_config(table)?;
        let last_sync = if self.settings.tracking.is_tracked() {
            let metadata = MetadataStore::new(&self.registry);
            metadata.ensure_schema(Role::Master).await?;
            metadata
                .last_sync_timestamp(Role::Master, &config.name)
                .await?
        } else {
            None
        };
        Ok(TableMetadata {
            table: config.name.clone(),
            last_sync,
        })
    }

    /// Rows of `table` that replication deleted on `role` after `since`
    /// (all when `None`), oldest first. Empty when tracking is off.
    pub async fn get_deleted_rows(
        &self,
        role: Role,
        table: &str,
        since: Option<NaiveDateTime>,
    ) -> Result<Vec<DeletedRow>> {
        let config = self.table_config(table)?;
        if !Role::REPLICATED.contains(&role) {
            return Err(ReplicationError::configuration(format!(
                "The {role} database holds no replication metadata"
            )));
        }
        if !self.settings.tracking.is_tracked() {
            return Ok(Vec::new());
        }
        let metadata = MetadataStore::new(&self.registry);
        metadata.ensure_schema(role).await?;
        metadata.deleted_since(role, &config.name, since).await
    }

    /// Purge deleted-row metadata older than `days` on every role in play.
    pub async fn purge_deleted_metadata(&self, days: u32) -> Result<BTreeMap<Role, u64>> {
        let mut purged = BTreeMap::new();
        if !self.settings.tracking.is_tracked() {
            return Ok(purged);
        }
        let metadata = MetadataStore::new(&self.registry);
        for role in Role::REPLICATED {
            let count = metadata.purge_deleted_older_than(role, days).await?;
            info!("Purged {} deleted metadata records on {}", count, role);
            purged.insert(role, count);
        }
        Ok(purged)
    }

    /// Running counters, with the sink's aggregates when it is persistent.
    pub async fn get_stats(&self) -> StatsSnapshot {
        let database = if self.stats_sink.is_persistent() {
            match self.stats_sink.overall().await {
                Ok(overall) => overall,
                Err(e) => {
                    warn!("Failed to read stats database aggregates: {}", e);
                    None
                }
            }
        } else {
            None
        };
        StatsSnapshot {
            running: self.running.clone(),
            database,
        }
    }
}
