//! Sync history and statistics sinks.
//!
//! The orchestrator reports every run to a [`StatsSink`]:
//!
//! - [`EphemeralStats`] keeps a bounded history in process memory and is used
//!   when no stats database is configured. It is lost on restart.
//! - [`DatabaseStats`] writes to the `sync_history`, `table_sync_stats` and
//!   `operation_log` tables of the `stats` role and can aggregate across runs.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use serde::Serialize;
use sync_core::values::{mysql_datetime, mysql_datetime_option};
use sync_core::{ReplicationError, ReplicationMode, Result, Role, Row, SqlValue};
use tokio::sync::Mutex;
use tracing::info;

use crate::connection::ConnectionRegistry;
use crate::statement::{Statement, StatsTable};
use crate::table_sync::TableSyncStats;

/// Upper bound for history queries and for the in-memory history.
pub const MAX_HISTORY: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(RunStatus::Running),
            "success" => Some(RunStatus::Success),
            "failed" => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(LogLevel::Info),
            "warning" => Some(LogLevel::Warning),
            "error" => Some(LogLevel::Error),
            _ => None,
        }
    }
}

/// Totals written when a run is finalized.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub duration_seconds: f64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub tables_processed: u64,
}

/// One sync run (`sync_history` row).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRunRecord {
    pub id: u64,
    #[serde(with = "mysql_datetime")]
    pub sync_started_at: NaiveDateTime,
    #[serde(with = "mysql_datetime_option")]
    pub sync_completed_at: Option<NaiveDateTime>,
    pub duration_seconds: Option<f64>,
    pub status: RunStatus,
    pub mode: String,
    pub error_message: Option<String>,
    pub total_inserts: u64,
    pub total_updates: u64,
    pub total_deletes: u64,
    pub tables_processed: u64,
}

/// Per-table stats of one run, joined with the run's start time and status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableStatsRecord {
    pub id: u64,
    pub sync_id: u64,
    pub table_name: String,
    pub rows_processed: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    #[serde(with = "mysql_datetime")]
    pub sync_timestamp: NaiveDateTime,
    #[serde(with = "mysql_datetime_option")]
    pub sync_started_at: Option<NaiveDateTime>,
    pub status: Option<RunStatus>,
}

/// An `operation_log` entry, joined with its run when it has one.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationLogRecord {
    pub id: u64,
    pub sync_id: Option<u64>,
    #[serde(with = "mysql_datetime")]
    pub log_timestamp: NaiveDateTime,
    pub level: LogLevel,
    pub message: String,
    pub context: Option<serde_json::Value>,
    #[serde(with = "mysql_datetime_option")]
    pub sync_started_at: Option<NaiveDateTime>,
    pub mode: Option<String>,
}

/// Aggregates over every recorded run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverallStats {
    pub total_syncs: u64,
    pub successful_syncs: u64,
    pub failed_syncs: u64,
    #[serde(with = "mysql_datetime_option")]
    pub last_sync: Option<NaiveDateTime>,
    pub total_inserts: u64,
    pub total_updates: u64,
    pub total_deletes: u64,
    pub avg_duration: Option<f64>,
}

/// Destination for sync history.
#[async_trait]
pub trait StatsSink: Send + Sync {
    /// Whether history survives a restart and [`StatsSink::overall`] is available.
    fn is_persistent(&self) -> bool;

    /// Record a new `running` run and return its id.
    async fn start_run(&self, mode: ReplicationMode) -> Result<u64>;

    async fn record_table(&self, run_id: u64, table: &str, stats: &TableSyncStats) -> Result<()>;

    /// Finalize a run to `success` or `failed`.
    async fn finish_run(
        &self,
        run_id: u64,
        status: RunStatus,
        error_message: Option<&str>,
        summary: &RunSummary,
    ) -> Result<()>;

    async fn log_operation(
        &self,
        run_id: Option<u64>,
        level: LogLevel,
        message: &str,
        context: Option<serde_json::Value>,
    ) -> Result<()>;

    /// Aggregates across all runs, when the sink keeps them.
    async fn overall(&self) -> Result<Option<OverallStats>>;

    /// Most recent runs first.
    async fn recent_runs(&self, limit: usize) -> Result<Vec<SyncRunRecord>>;

    async fn table_history(&self, table: &str, limit: usize) -> Result<Vec<TableStatsRecord>>;

    async fn recent_errors(&self, limit: usize) -> Result<Vec<OperationLogRecord>>;
}

fn now() -> NaiveDateTime {
    chrono::Local::now().naive_local()
}

#[derive(Default)]
struct EphemeralState {
    next_id: u64,
    runs: VecDeque<SyncRunRecord>,
    tables: VecDeque<TableStatsRecord>,
    logs: VecDeque<OperationLogRecord>,
}

fn push_bounded<T>(queue: &mut VecDeque<T>, item: T) {
    if queue.len() == MAX_HISTORY {
        queue.pop_front();
    }
    queue.push_back(item);
}

/// In-process sink keeping the last [`MAX_HISTORY`] entries of each kind.
#[derive(Default)]
pub struct EphemeralStats {
    state: Mutex<EphemeralState>,
}

impl EphemeralStats {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StatsSink for EphemeralStats {
    fn is_persistent(&self) -> bool {
        false
    }

    async fn start_run(&self, mode: ReplicationMode) -> Result<u64> {
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;
        push_bounded(
            &mut state.runs,
            SyncRunRecord {
                id,
                sync_started_at: now(),
                sync_completed_at: None,
                duration_seconds: None,
                status: RunStatus::Running,
                mode: mode.to_string(),
                error_message: None,
                total_inserts: 0,
                total_updates: 0,
                total_deletes: 0,
                tables_processed: 0,
            },
        );
        Ok(id)
    }

    async fn record_table(&self, run_id: u64, table: &str, stats: &TableSyncStats) -> Result<()> {
        let mut state = self.state.lock().await;
        let (sync_started_at, status) = state
            .runs
            .iter()
            .find(|run| run.id == run_id)
            .map(|run| (Some(run.sync_started_at), Some(run.status)))
            .unwrap_or((None, None));
        let id = state.tables.back().map_or(1, |t| t.id + 1);
        push_bounded(
            &mut state.tables,
            TableStatsRecord {
                id,
                sync_id: run_id,
                table_name: table.to_string(),
                rows_processed: stats.rows,
                inserts: stats.inserted,
                updates: stats.updated,
                deletes: stats.deleted,
                sync_timestamp: now(),
                sync_started_at,
                status,
            },
        );
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: u64,
        status: RunStatus,
        error_message: Option<&str>,
        summary: &RunSummary,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(run) = state.runs.iter_mut().find(|run| run.id == run_id) {
            run.sync_completed_at = Some(now());
            run.duration_seconds = Some(summary.duration_seconds);
            run.status = status;
            run.error_message = error_message.map(str::to_string);
            run.total_inserts = summary.inserts;
            run.total_updates = summary.updates;
            run.total_deletes = summary.deletes;
            run.tables_processed = summary.tables_processed;
        }
        for table in state.tables.iter_mut().filter(|t| t.sync_id == run_id) {
            table.status = Some(status);
        }
        Ok(())
    }

    async fn log_operation(
        &self,
        run_id: Option<u64>,
        level: LogLevel,
        message: &str,
        context: Option<serde_json::Value>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let run = run_id.and_then(|id| state.runs.iter().find(|run| run.id == id));
        let sync_started_at = run.map(|run| run.sync_started_at);
        let mode = run.map(|run| run.mode.clone());
        let id = state.logs.back().map_or(1, |l| l.id + 1);
        push_bounded(
            &mut state.logs,
            OperationLogRecord {
                id,
                sync_id: run_id,
                log_timestamp: now(),
                level,
                message: message.to_string(),
                context,
                sync_started_at,
                mode,
            },
        );
        Ok(())
    }

    async fn overall(&self) -> Result<Option<OverallStats>> {
        Ok(None)
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<SyncRunRecord>> {
        let state = self.state.lock().await;
        Ok(state.runs.iter().rev().take(limit).cloned().collect())
    }

    async fn table_history(&self, table: &str, limit: usize) -> Result<Vec<TableStatsRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .tables
            .iter()
            .rev()
            .filter(|t| t.table_name == table)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn recent_errors(&self, limit: usize) -> Result<Vec<OperationLogRecord>> {
        let state = self.state.lock().await;
        Ok(state
            .logs
            .iter()
            .rev()
            .filter(|l| l.level == LogLevel::Error)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Sink backed by the stats database (`Role::Stats`).
pub struct DatabaseStats {
    registry: Arc<ConnectionRegistry>,
}

impl DatabaseStats {
    /// Create the stats tables if needed.
    pub async fn initialize(registry: Arc<ConnectionRegistry>) -> Result<Self> {
        for table in StatsTable::ALL {
            registry
                .execute(Role::Stats, &Statement::CreateStatsTable(table))
                .await?;
        }
        info!("Replication stats database schema initialized");
        Ok(Self { registry })
    }

    async fn query(&self, statement: Statement) -> Result<Vec<Row>> {
        self.registry.query(Role::Stats, &statement).await
    }

    async fn execute(&self, statement: Statement) -> Result<u64> {
        let outcome = self.registry.execute(Role::Stats, &statement).await?;
        Ok(outcome.affected_rows)
    }
}

fn limit(limit: usize) -> u32 {
    limit.clamp(1, MAX_HISTORY) as u32
}

fn value<'a>(row: &'a Row, column: &str) -> &'a SqlValue {
    row.get(column).unwrap_or(&SqlValue::Null)
}

fn count(row: &Row, column: &str) -> u64 {
    value(row, column).as_u64().unwrap_or(0)
}

fn text(row: &Row, column: &str) -> Option<String> {
    match value(row, column) {
        SqlValue::Null => None,
        other => Some(other.to_key_string()),
    }
}

fn required_datetime(row: &Row, column: &str) -> Result<NaiveDateTime> {
    value(row, column)
        .as_datetime()
        .ok_or_else(|| ReplicationError::database(format!("Missing {column} in stats row")))
}

fn run_from_row(row: &Row) -> Result<SyncRunRecord> {
    Ok(SyncRunRecord {
        id: count(row, "id"),
        sync_started_at: required_datetime(row, "sync_started_at")?,
        sync_completed_at: value(row, "sync_completed_at").as_datetime(),
        duration_seconds: value(row, "duration_seconds").as_f64(),
        status: text(row, "status")
            .and_then(|s| RunStatus::parse(&s))
            .unwrap_or(RunStatus::Running),
        mode: text(row, "mode").unwrap_or_default(),
        error_message: text(row, "error_message"),
        total_inserts: count(row, "total_inserts"),
        total_updates: count(row, "total_updates"),
        total_deletes: count(row, "total_deletes"),
        tables_processed: count(row, "tables_processed"),
    })
}

fn table_stats_from_row(row: &Row) -> Result<TableStatsRecord> {
    Ok(TableStatsRecord {
        id: count(row, "id"),
        sync_id: count(row, "sync_id"),
        table_name: text(row, "table_name").unwrap_or_default(),
        rows_processed: count(row, "rows_processed"),
        inserts: count(row, "inserts"),
        updates: count(row, "updates"),
        deletes: count(row, "deletes"),
        sync_timestamp: required_datetime(row, "sync_timestamp")?,
        sync_started_at: value(row, "sync_started_at").as_datetime(),
        status: text(row, "status").and_then(|s| RunStatus::parse(&s)),
    })
}

fn log_from_row(row: &Row) -> Result<OperationLogRecord> {
    let context = text(row, "context").map(|raw| {
        serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw))
    });
    Ok(OperationLogRecord {
        id: count(row, "id"),
        sync_id: value(row, "sync_id").as_u64(),
        log_timestamp: required_datetime(row, "log_timestamp")?,
        level: text(row, "level")
            .and_then(|s| LogLevel::parse(&s))
            .unwrap_or(LogLevel::Info),
        message: text(row, "message").unwrap_or_default(),
        context,
        sync_started_at: value(row, "sync_started_at").as_datetime(),
        mode: text(row, "mode"),
    })
}

#[async_trait]
impl StatsSink for DatabaseStats {
    fn is_persistent(&self) -> bool {
        true
    }

    async fn start_run(&self, mode: ReplicationMode) -> Result<u64> {
        let outcome = self
            .registry
            .execute(
                Role::Stats,
                &Statement::StartRun {
                    mode: mode.to_string(),
                },
            )
            .await?;
        outcome
            .last_insert_id
            .ok_or_else(|| ReplicationError::database("sync_history insert returned no id"))
    }

    async fn record_table(&self, run_id: u64, table: &str, stats: &TableSyncStats) -> Result<()> {
        self.execute(Statement::RecordTableStats {
            run_id,
            table_name: table.to_string(),
            stats: *stats,
        })
        .await?;
        Ok(())
    }

    async fn finish_run(
        &self,
        run_id: u64,
        status: RunStatus,
        error_message: Option<&str>,
        summary: &RunSummary,
    ) -> Result<()> {
        self.execute(Statement::FinishRun {
            run_id,
            status,
            error_message: error_message.map(str::to_string),
            summary: *summary,
        })
        .await?;
        Ok(())
    }

    async fn log_operation(
        &self,
        run_id: Option<u64>,
        level: LogLevel,
        message: &str,
        context: Option<serde_json::Value>,
    ) -> Result<()> {
        self.execute(Statement::LogOperation {
            run_id,
            level,
            message: message.to_string(),
            context: context.map(|c| c.to_string()),
        })
        .await?;
        Ok(())
    }

    async fn overall(&self) -> Result<Option<OverallStats>> {
        let rows = self.query(Statement::OverallStats).await?;
        Ok(rows.first().map(|row| OverallStats {
            total_syncs: count(row, "total_syncs"),
            successful_syncs: count(row, "successful_syncs"),
            failed_syncs: count(row, "failed_syncs"),
            last_sync: value(row, "last_sync").as_datetime(),
            total_inserts: count(row, "total_inserts"),
            total_updates: count(row, "total_updates"),
            total_deletes: count(row, "total_deletes"),
            avg_duration: value(row, "avg_duration").as_f64(),
        }))
    }

    async fn recent_runs(&self, n: usize) -> Result<Vec<SyncRunRecord>> {
        self.query(Statement::RecentRuns { limit: limit(n) })
            .await?
            .iter()
            .map(run_from_row)
            .collect()
    }

    async fn table_history(&self, table: &str, n: usize) -> Result<Vec<TableStatsRecord>> {
        self.query(Statement::TableHistory {
            table_name: table.to_string(),
            limit: limit(n),
        })
        .await?
        .iter()
        .map(table_stats_from_row)
        .collect()
    }

    async fn recent_errors(&self, n: usize) -> Result<Vec<OperationLogRecord>> {
        self.query(Statement::RecentErrors { limit: limit(n) })
            .await?
            .iter()
            .map(log_from_row)
            .collect()
    }
}
