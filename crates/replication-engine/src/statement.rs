//! Statements issued against a database role.
//!
//! Every statement the engine runs is a variant of [`Statement`]. Identifiers
//! are carried as validated [`Identifier`]s and rendered back-quoted; every
//! value is returned as a positional parameter by [`Statement::to_sql`].

use chrono::NaiveDateTime;
use sync_core::{Identifier, SqlValue};

use crate::stats::{LogLevel, RunStatus, RunSummary};
use crate::table_sync::TableSyncStats;

/// Side table holding per-row replication bookkeeping in every database.
pub const METADATA_TABLE: &str = "_replication_metadata";

/// Tables of the stats database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsTable {
    SyncHistory,
    TableSyncStats,
    OperationLog,
}

impl StatsTable {
    pub const ALL: [StatsTable; 3] = [
        StatsTable::SyncHistory,
        StatsTable::TableSyncStats,
        StatsTable::OperationLog,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StatsTable::SyncHistory => "sync_history",
            StatsTable::TableSyncStats => "table_sync_stats",
            StatsTable::OperationLog => "operation_log",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    // Replicated tables.
    ShowColumns {
        table: Identifier,
    },
    SelectRows {
        table: Identifier,
        columns: Vec<Identifier>,
        /// Restrict to rows whose column is strictly greater than the value.
        newer_than: Option<(Identifier, SqlValue)>,
    },
    SelectByKeys {
        table: Identifier,
        key_column: Identifier,
        columns: Vec<Identifier>,
        keys: Vec<SqlValue>,
    },
    SelectKeys {
        table: Identifier,
        key_column: Identifier,
    },
    InsertRow {
        table: Identifier,
        columns: Vec<Identifier>,
        values: Vec<SqlValue>,
    },
    UpdateRow {
        table: Identifier,
        columns: Vec<Identifier>,
        values: Vec<SqlValue>,
        key_column: Identifier,
        key: SqlValue,
    },
    DeleteRow {
        table: Identifier,
        key_column: Identifier,
        key: SqlValue,
    },

    // Replication metadata.
    CreateMetadataTable,
    RecordSynced {
        table_name: String,
        key: String,
    },
    MarkDeleted {
        table_name: String,
        key: String,
    },
    LastSyncTimestamp {
        table_name: String,
    },
    DeletedSince {
        table_name: String,
        since: Option<NaiveDateTime>,
    },
    SyncedKeys {
        table_name: String,
    },
    PurgeDeleted {
        days: u32,
    },

    // Stats database.
    CreateStatsTable(StatsTable),
    StartRun {
        mode: String,
    },
    FinishRun {
        run_id: u64,
        status: RunStatus,
        error_message: Option<String>,
        summary: RunSummary,
    },
    RecordTableStats {
        run_id: u64,
        table_name: String,
        stats: TableSyncStats,
    },
    LogOperation {
        run_id: Option<u64>,
        level: LogLevel,
        message: String,
        context: Option<String>,
    },
    OverallStats,
    RecentRuns {
        limit: u32,
    },
    TableHistory {
        table_name: String,
        limit: u32,
    },
    RecentErrors {
        limit: u32,
    },
}

fn column_list(columns: &[Identifier]) -> String {
    columns
        .iter()
        .map(Identifier::quoted)
        .collect::<Vec<_>>()
        .join(", ")
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

impl Statement {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Statement::ShowColumns { .. } => "show_columns",
            Statement::SelectRows { .. } => "select_rows",
            Statement::SelectByKeys { .. } => "select_by_keys",
            Statement::SelectKeys { .. } => "select_keys",
            Statement::InsertRow { .. } => "insert_row",
            Statement::UpdateRow { .. } => "update_row",
            Statement::DeleteRow { .. } => "delete_row",
            Statement::CreateMetadataTable => "create_metadata_table",
            Statement::RecordSynced { .. } => "record_synced",
            Statement::MarkDeleted { .. } => "mark_deleted",
            Statement::LastSyncTimestamp { .. } => "last_sync_timestamp",
            Statement::DeletedSince { .. } => "deleted_since",
            Statement::SyncedKeys { .. } => "synced_keys",
            Statement::PurgeDeleted { .. } => "purge_deleted",
            Statement::CreateStatsTable(_) => "create_stats_table",
            Statement::StartRun { .. } => "start_run",
            Statement::FinishRun { .. } => "finish_run",
            Statement::RecordTableStats { .. } => "record_table_stats",
            Statement::LogOperation { .. } => "log_operation",
            Statement::OverallStats => "overall_stats",
            Statement::RecentRuns { .. } => "recent_runs",
            Statement::TableHistory { .. } => "table_history",
            Statement::RecentErrors { .. } => "recent_errors",
        }
    }

    /// Render as MySQL text plus positional parameters.
    pub fn to_sql(&self) -> (String, Vec<SqlValue>) {
        match self {
            Statement::ShowColumns { table } => {
                (format!("SHOW COLUMNS FROM {}", table.quoted()), vec![])
            }
            Statement::SelectRows {
                table,
                columns,
                newer_than,
            } => {
                let mut sql = format!("SELECT {} FROM {}", column_list(columns), table.quoted());
                let mut params = vec![];
                if let Some((column, value)) = newer_than {
                    sql.push_str(&format!(" WHERE {} > ?", column.quoted()));
                    params.push(value.clone());
                }
                (sql, params)
            }
            Statement::SelectByKeys {
                table,
                key_column,
                columns,
                keys,
            } => {
                let filter = if keys.is_empty() {
                    "1 = 0".to_string()
                } else {
                    format!("{} IN ({})", key_column.quoted(), placeholders(keys.len()))
                };
                (
                    format!(
                        "SELECT {} FROM {} WHERE {filter}",
                        column_list(columns),
                        table.quoted()
                    ),
                    keys.clone(),
                )
            }
            Statement::SelectKeys { table, key_column } => (
                format!("SELECT {} FROM {}", key_column.quoted(), table.quoted()),
                vec![],
            ),
            Statement::InsertRow {
                table,
                columns,
                values,
            } => (
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    table.quoted(),
                    column_list(columns),
                    placeholders(columns.len())
                ),
                values.clone(),
            ),
            Statement::UpdateRow {
                table,
                columns,
                values,
                key_column,
                key,
            } => {
                let assignments = columns
                    .iter()
                    .map(|c| format!("{} = ?", c.quoted()))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut params = values.clone();
                params.push(key.clone());
                (
                    format!(
                        "UPDATE {} SET {assignments} WHERE {} = ?",
                        table.quoted(),
                        key_column.quoted()
                    ),
                    params,
                )
            }
            Statement::DeleteRow {
                table,
                key_column,
                key,
            } => (
                format!(
                    "DELETE FROM {} WHERE {} = ?",
                    table.quoted(),
                    key_column.quoted()
                ),
                vec![key.clone()],
            ),

            Statement::CreateMetadataTable => (
                format!(
                    "CREATE TABLE IF NOT EXISTS `{METADATA_TABLE}` (
                        id INT PRIMARY KEY AUTO_INCREMENT,
                        table_name VARCHAR(255) NOT NULL,
                        primary_key_value VARCHAR(255) COLLATE utf8mb4_bin NOT NULL,
                        last_sync_timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP,
                        is_deleted BOOLEAN DEFAULT FALSE,
                        deleted_at TIMESTAMP NULL,
                        UNIQUE KEY uk_table_pk (table_name, primary_key_value),
                        INDEX idx_deleted (is_deleted, deleted_at)
                    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"
                ),
                vec![],
            ),
            Statement::RecordSynced { table_name, key } => (
                format!(
                    "INSERT INTO `{METADATA_TABLE}`
                        (table_name, primary_key_value, last_sync_timestamp, is_deleted)
                     VALUES (?, ?, NOW(), FALSE)
                     ON DUPLICATE KEY UPDATE
                        last_sync_timestamp = NOW(),
                        is_deleted = FALSE,
                        deleted_at = NULL"
                ),
                vec![table_name.as_str().into(), key.as_str().into()],
            ),
            Statement::MarkDeleted { table_name, key } => (
                format!(
                    "INSERT INTO `{METADATA_TABLE}`
                        (table_name, primary_key_value, is_deleted, deleted_at)
                     VALUES (?, ?, TRUE, NOW())
                     ON DUPLICATE KEY UPDATE
                        is_deleted = TRUE,
                        deleted_at = NOW()"
                ),
                vec![table_name.as_str().into(), key.as_str().into()],
            ),
            Statement::LastSyncTimestamp { table_name } => (
                format!(
                    "SELECT MAX(last_sync_timestamp) AS last_sync
                     FROM `{METADATA_TABLE}`
                     WHERE table_name = ?"
                ),
                vec![table_name.as_str().into()],
            ),
            Statement::DeletedSince { table_name, since } => {
                let mut sql = format!(
                    "SELECT primary_key_value, deleted_at
                     FROM `{METADATA_TABLE}`
                     WHERE table_name = ? AND is_deleted = TRUE"
                );
                let mut params: Vec<SqlValue> = vec![table_name.as_str().into()];
                if let Some(since) = since {
                    sql.push_str(" AND deleted_at > ?");
                    params.push(SqlValue::DateTime(*since));
                }
                sql.push_str(" ORDER BY deleted_at ASC");
                (sql, params)
            }
            Statement::SyncedKeys { table_name } => (
                format!(
                    "SELECT primary_key_value
                     FROM `{METADATA_TABLE}`
                     WHERE table_name = ? AND is_deleted = FALSE"
                ),
                vec![table_name.as_str().into()],
            ),
            Statement::PurgeDeleted { days } => (
                format!(
                    "DELETE FROM `{METADATA_TABLE}`
                     WHERE is_deleted = TRUE
                     AND deleted_at < DATE_SUB(NOW(), INTERVAL ? DAY)"
                ),
                vec![SqlValue::from(*days)],
            ),

            Statement::CreateStatsTable(table) => (create_stats_table_sql(*table), vec![]),
            Statement::StartRun { mode } => (
                "INSERT INTO sync_history (sync_started_at, mode, status)
                 VALUES (NOW(), ?, 'running')"
                    .to_string(),
                vec![mode.as_str().into()],
            ),
            Statement::FinishRun {
                run_id,
                status,
                error_message,
                summary,
            } => (
                "UPDATE sync_history
                 SET sync_completed_at = NOW(),
                     duration_seconds = ?,
                     status = ?,
                     error_message = ?,
                     total_inserts = ?,
                     total_updates = ?,
                     total_deletes = ?,
                     tables_processed = ?
                 WHERE id = ?"
                    .to_string(),
                vec![
                    SqlValue::Float(summary.duration_seconds),
                    status.as_str().into(),
                    error_message.clone().into(),
                    summary.inserts.into(),
                    summary.updates.into(),
                    summary.deletes.into(),
                    summary.tables_processed.into(),
                    (*run_id).into(),
                ],
            ),
            Statement::RecordTableStats {
                run_id,
                table_name,
                stats,
            } => (
                "INSERT INTO table_sync_stats
                 (sync_id, table_name, rows_processed, inserts, updates, deletes, sync_timestamp)
                 VALUES (?, ?, ?, ?, ?, ?, NOW())"
                    .to_string(),
                vec![
                    (*run_id).into(),
                    table_name.as_str().into(),
                    stats.rows.into(),
                    stats.inserted.into(),
                    stats.updated.into(),
                    stats.deleted.into(),
                ],
            ),
            Statement::LogOperation {
                run_id,
                level,
                message,
                context,
            } => (
                "INSERT INTO operation_log (sync_id, level, message, context)
                 VALUES (?, ?, ?, ?)"
                    .to_string(),
                vec![
                    (*run_id).into(),
                    level.as_str().into(),
                    message.as_str().into(),
                    context.clone().into(),
                ],
            ),
            Statement::OverallStats => (
                "SELECT
                    COUNT(*) AS total_syncs,
                    SUM(CASE WHEN status = 'success' THEN 1 ELSE 0 END) AS successful_syncs,
                    SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END) AS failed_syncs,
                    MAX(sync_started_at) AS last_sync,
                    SUM(total_inserts) AS total_inserts,
                    SUM(total_updates) AS total_updates,
                    SUM(total_deletes) AS total_deletes,
                    AVG(duration_seconds) AS avg_duration
                 FROM sync_history"
                    .to_string(),
                vec![],
            ),
            Statement::RecentRuns { limit } => (
                "SELECT id, sync_started_at, sync_completed_at, duration_seconds, status, mode,
                        error_message, total_inserts, total_updates, total_deletes,
                        tables_processed
                 FROM sync_history
                 ORDER BY sync_started_at DESC, id DESC
                 LIMIT ?"
                    .to_string(),
                vec![(*limit).into()],
            ),
            Statement::TableHistory { table_name, limit } => (
                "SELECT tss.*, sh.sync_started_at, sh.status
                 FROM table_sync_stats tss
                 JOIN sync_history sh ON tss.sync_id = sh.id
                 WHERE tss.table_name = ?
                 ORDER BY tss.sync_timestamp DESC, tss.id DESC
                 LIMIT ?"
                    .to_string(),
                vec![table_name.as_str().into(), (*limit).into()],
            ),
            Statement::RecentErrors { limit } => (
                "SELECT ol.*, sh.sync_started_at, sh.mode
                 FROM operation_log ol
                 LEFT JOIN sync_history sh ON ol.sync_id = sh.id
                 WHERE ol.level = 'error'
                 ORDER BY ol.log_timestamp DESC, ol.id DESC
                 LIMIT ?"
                    .to_string(),
                vec![(*limit).into()],
            ),
        }
    }
}

fn create_stats_table_sql(table: StatsTable) -> String {
    match table {
        StatsTable::SyncHistory => "CREATE TABLE IF NOT EXISTS sync_history (
                id INT PRIMARY KEY AUTO_INCREMENT,
                sync_started_at TIMESTAMP NOT NULL,
                sync_completed_at TIMESTAMP NULL,
                duration_seconds DECIMAL(10, 2) NULL,
                status ENUM('running', 'success', 'failed') NOT NULL DEFAULT 'running',
                mode VARCHAR(50) NOT NULL,
                error_message TEXT NULL,
                total_inserts INT DEFAULT 0,
                total_updates INT DEFAULT 0,
                total_deletes INT DEFAULT 0,
                tables_processed INT DEFAULT 0,
                INDEX idx_status (status),
                INDEX idx_started (sync_started_at),
                INDEX idx_mode (mode)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"
            .to_string(),
        StatsTable::TableSyncStats => "CREATE TABLE IF NOT EXISTS table_sync_stats (
                id INT PRIMARY KEY AUTO_INCREMENT,
                sync_id INT NOT NULL,
                table_name VARCHAR(255) NOT NULL,
                rows_processed INT DEFAULT 0,
                inserts INT DEFAULT 0,
                updates INT DEFAULT 0,
                deletes INT DEFAULT 0,
                sync_timestamp TIMESTAMP NOT NULL,
                FOREIGN KEY (sync_id) REFERENCES sync_history(id) ON DELETE CASCADE,
                INDEX idx_sync_id (sync_id),
                INDEX idx_table_name (table_name)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"
            .to_string(),
        StatsTable::OperationLog => "CREATE TABLE IF NOT EXISTS operation_log (
                id INT PRIMARY KEY AUTO_INCREMENT,
                sync_id INT NULL,
                log_timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                level ENUM('info', 'warning', 'error') NOT NULL DEFAULT 'info',
                message TEXT NOT NULL,
                context JSON NULL,
                FOREIGN KEY (sync_id) REFERENCES sync_history(id) ON DELETE CASCADE,
                INDEX idx_sync_id (sync_id),
                INDEX idx_timestamp (log_timestamp),
                INDEX idx_level (level)
            ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4 COLLATE=utf8mb4_unicode_ci"
            .to_string(),
    }
}
