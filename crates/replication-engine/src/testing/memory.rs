//! In-memory database interpreting [`Statement`]s.
//!
//! Each `MemoryDatabase` stands in for one MySQL database. Clones share the
//! same tables, so a test keeps one handle for setup and assertions while
//! another is registered with a [`crate::connection::ConnectionRegistry`].
//! Transactions are per handle: `begin` snapshots the data and `rollback`
//! restores it.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, NaiveDateTime, Timelike};
use sync_core::{Identifier, ReplicationError, Result, Row, SqlValue};
use tokio::sync::Mutex;

use crate::connection::{Connection, ExecOutcome};
use crate::statement::{Statement, StatsTable, METADATA_TABLE};

/// One `_replication_metadata` record.
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataRecord {
    pub table_name: String,
    pub primary_key_value: String,
    pub last_sync_timestamp: Option<NaiveDateTime>,
    pub is_deleted: bool,
    pub deleted_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
struct Table {
    columns: Vec<String>,
    primary_key: String,
    rows: Vec<Row>,
    /// Compare keys like a `_ci` collation with PAD SPACE.
    case_insensitive_keys: bool,
}

impl Table {
    /// The collated key of `row` in `column`, if not NULL.
    fn key_of(&self, row: &Row, column: &str) -> Option<String> {
        collated_key_of(row, column, self.case_insensitive_keys)
    }

    fn key(&self, value: &SqlValue) -> String {
        collate(value.to_key_string(), self.case_insensitive_keys)
    }

    fn check_columns(&self, name: &str, columns: &[Identifier]) -> Result<()> {
        match columns
            .iter()
            .find(|c| !self.columns.iter().any(|existing| *c == existing.as_str()))
        {
            Some(unknown) => Err(ReplicationError::database(format!(
                "Unknown column '{unknown}' in '{name}'"
            ))),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct AutoIncrementTable {
    next_id: u64,
    rows: Vec<Row>,
}

impl AutoIncrementTable {
    fn insert(&mut self, mut row: Row) -> u64 {
        self.next_id += 1;
        row.insert("id".to_string(), SqlValue::UInt(self.next_id));
        self.rows.push(row);
        self.next_id
    }

    fn find(&self, id: u64) -> Option<&Row> {
        self.rows.iter().find(|row| id_of(row) == Some(id))
    }
}

#[derive(Debug, Clone, Default)]
struct Data {
    tables: BTreeMap<String, Table>,
    metadata: Option<Vec<MetadataRecord>>,
    stats: HashMap<&'static str, AutoIncrementTable>,
}

fn missing_table(name: &str) -> ReplicationError {
    ReplicationError::database(format!("Table '{name}' doesn't exist"))
}

impl Data {
    fn table(&self, name: &Identifier) -> Result<&Table> {
        self.tables
            .get(name.as_str())
            .ok_or_else(|| missing_table(name.as_str()))
    }

    fn table_mut(&mut self, name: &Identifier) -> Result<&mut Table> {
        self.tables
            .get_mut(name.as_str())
            .ok_or_else(|| missing_table(name.as_str()))
    }

    fn metadata(&self) -> Result<&Vec<MetadataRecord>> {
        self.metadata
            .as_ref()
            .ok_or_else(|| missing_table(METADATA_TABLE))
    }

    fn metadata_mut(&mut self) -> Result<&mut Vec<MetadataRecord>> {
        self.metadata
            .as_mut()
            .ok_or_else(|| missing_table(METADATA_TABLE))
    }

    fn stats(&self, table: StatsTable) -> Result<&AutoIncrementTable> {
        self.stats
            .get(table.name())
            .ok_or_else(|| missing_table(table.name()))
    }

    fn stats_mut(&mut self, table: StatsTable) -> Result<&mut AutoIncrementTable> {
        self.stats
            .get_mut(table.name())
            .ok_or_else(|| missing_table(table.name()))
    }
}

#[derive(Debug, Default)]
struct State {
    data: Data,
    clock: Option<NaiveDateTime>,
    statements: HashMap<&'static str, usize>,
    failing_writes: HashSet<String>,
}

impl State {
    /// `NOW()`: the pinned clock, or local time at second precision.
    fn now(&self) -> NaiveDateTime {
        self.clock.unwrap_or_else(|| {
            let now = chrono::Local::now().naive_local();
            now.with_nanosecond(0).unwrap_or(now)
        })
    }

    fn check_writable(&self, table: &Identifier) -> Result<()> {
        if self.failing_writes.contains(table.as_str()) {
            return Err(ReplicationError::database(format!(
                "Lock wait timeout exceeded writing '{table}'"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Outcome {
    rows: Vec<Row>,
    affected_rows: u64,
    last_insert_id: Option<u64>,
}

impl Outcome {
    fn rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Default::default()
        }
    }

    fn affected(affected_rows: u64) -> Self {
        Self {
            affected_rows,
            ..Default::default()
        }
    }
}

fn key_of(row: &Row, column: &str) -> Option<String> {
    row.get(column)
        .filter(|v| !v.is_null())
        .map(SqlValue::to_key_string)
}

fn collate(key: String, case_insensitive: bool) -> String {
    if case_insensitive {
        key.trim_end_matches(' ').to_lowercase()
    } else {
        key
    }
}

fn collated_key_of(row: &Row, column: &str, case_insensitive: bool) -> Option<String> {
    key_of(row, column).map(|k| collate(k, case_insensitive))
}

fn id_of(row: &Row) -> Option<u64> {
    row.get("id").and_then(SqlValue::as_u64)
}

fn project(row: &Row, columns: &[Identifier]) -> Row {
    columns
        .iter()
        .map(|c| {
            (
                c.as_str().to_string(),
                row.get(c.as_str()).cloned().unwrap_or(SqlValue::Null),
            )
        })
        .collect()
}

/// `ORDER BY <time_column> DESC, id DESC`.
fn newest_first(rows: &mut [Row], time_column: &str) {
    let time = |row: &Row| row.get(time_column).and_then(SqlValue::as_datetime);
    rows.sort_by(|a, b| {
        time(b)
            .cmp(&time(a))
            .then_with(|| id_of(b).cmp(&id_of(a)))
    });
}

fn text(value: &str) -> SqlValue {
    SqlValue::Text(value.to_string())
}

fn sum(rows: &[Row], column: &str) -> SqlValue {
    if rows.is_empty() {
        return SqlValue::Null;
    }
    SqlValue::UInt(
        rows.iter()
            .filter_map(|row| row.get(column).and_then(SqlValue::as_u64))
            .sum(),
    )
}

fn apply(state: &mut State, statement: &Statement) -> Result<Outcome> {
    let now = state.now();
    match statement {
        Statement::ShowColumns { table } => {
            let t = state.data.table(table)?;
            Ok(Outcome::rows(
                t.columns
                    .iter()
                    .map(|c| {
                        let key = if *c == t.primary_key { "PRI" } else { "" };
                        Row::from([
                            ("Field".to_string(), text(c)),
                            ("Key".to_string(), text(key)),
                        ])
                    })
                    .collect(),
            ))
        }
        Statement::SelectRows {
            table,
            columns,
            newer_than,
        } => {
            let t = state.data.table(table)?;
            t.check_columns(table.as_str(), columns)?;
            let rows = t
                .rows
                .iter()
                .filter(|row| match newer_than {
                    Some((column, since)) => row
                        .get(column.as_str())
                        .filter(|v| !v.is_null())
                        .is_some_and(|v| v.version_cmp(since) == Ordering::Greater),
                    None => true,
                })
                .map(|row| project(row, columns))
                .collect();
            Ok(Outcome::rows(rows))
        }
        Statement::SelectByKeys {
            table,
            key_column,
            columns,
            keys,
        } => {
            let t = state.data.table(table)?;
            t.check_columns(table.as_str(), columns)?;
            let wanted: HashSet<String> = keys.iter().map(|k| t.key(k)).collect();
            let rows = t
                .rows
                .iter()
                .filter(|row| t.key_of(row, key_column.as_str()).is_some_and(|k| wanted.contains(&k)))
                .map(|row| project(row, columns))
                .collect();
            Ok(Outcome::rows(rows))
        }
        Statement::SelectKeys { table, key_column } => {
            let t = state.data.table(table)?;
            let columns = [key_column.clone()];
            t.check_columns(table.as_str(), &columns)?;
            Ok(Outcome::rows(
                t.rows.iter().map(|row| project(row, &columns)).collect(),
            ))
        }
        Statement::InsertRow {
            table,
            columns,
            values,
        } => {
            state.check_writable(table)?;
            let t = state.data.table_mut(table)?;
            t.check_columns(table.as_str(), columns)?;
            let mut row: Row = t
                .columns
                .iter()
                .map(|c| (c.clone(), SqlValue::Null))
                .collect();
            for (column, value) in columns.iter().zip(values) {
                row.insert(column.as_str().to_string(), value.clone());
            }
            let Some(key) = t.key_of(&row, &t.primary_key) else {
                return Err(ReplicationError::database(format!(
                    "Field '{}' doesn't have a default value",
                    t.primary_key
                )));
            };
            if t
                .rows
                .iter()
                .any(|existing| t.key_of(existing, &t.primary_key).as_deref() == Some(key.as_str()))
            {
                return Err(ReplicationError::database(format!(
                    "Duplicate entry '{key}' for key 'PRIMARY'"
                )));
            }
            t.rows.push(row);
            Ok(Outcome::affected(1))
        }
        Statement::UpdateRow {
            table,
            columns,
            values,
            key_column,
            key,
        } => {
            state.check_writable(table)?;
            let t = state.data.table_mut(table)?;
            t.check_columns(table.as_str(), columns)?;
            let target = t.key(key);
            let fold = t.case_insensitive_keys;
            let mut affected = 0;
            for row in t.rows.iter_mut() {
                if collated_key_of(row, key_column.as_str(), fold).as_deref() == Some(target.as_str()) {
                    for (column, value) in columns.iter().zip(values) {
                        row.insert(column.as_str().to_string(), value.clone());
                    }
                    affected += 1;
                }
            }
            Ok(Outcome::affected(affected))
        }
        Statement::DeleteRow {
            table,
            key_column,
            key,
        } => {
            state.check_writable(table)?;
            let t = state.data.table_mut(table)?;
            let target = t.key(key);
            let fold = t.case_insensitive_keys;
            let before = t.rows.len();
            t.rows.retain(|row| {
                collated_key_of(row, key_column.as_str(), fold).as_deref() != Some(target.as_str())
            });
            Ok(Outcome::affected((before - t.rows.len()) as u64))
        }

        Statement::CreateMetadataTable => {
            state.data.metadata.get_or_insert_with(Vec::new);
            Ok(Outcome::default())
        }
        Statement::RecordSynced { table_name, key } => {
            let records = state.data.metadata_mut()?;
            match records
                .iter_mut()
                .find(|r| r.table_name == *table_name && r.primary_key_value == *key)
            {
                Some(record) => {
                    record.last_sync_timestamp = Some(now);
                    record.is_deleted = false;
                    record.deleted_at = None;
                    Ok(Outcome::affected(2))
                }
                None => {
                    records.push(MetadataRecord {
                        table_name: table_name.clone(),
                        primary_key_value: key.clone(),
                        last_sync_timestamp: Some(now),
                        is_deleted: false,
                        deleted_at: None,
                    });
                    Ok(Outcome::affected(1))
                }
            }
        }
        Statement::MarkDeleted { table_name, key } => {
            let records = state.data.metadata_mut()?;
            match records
                .iter_mut()
                .find(|r| r.table_name == *table_name && r.primary_key_value == *key)
            {
                Some(record) => {
                    // ON UPDATE CURRENT_TIMESTAMP
                    record.last_sync_timestamp = Some(now);
                    record.is_deleted = true;
                    record.deleted_at = Some(now);
                    Ok(Outcome::affected(2))
                }
                None => {
                    records.push(MetadataRecord {
                        table_name: table_name.clone(),
                        primary_key_value: key.clone(),
                        last_sync_timestamp: Some(now),
                        is_deleted: true,
                        deleted_at: Some(now),
                    });
                    Ok(Outcome::affected(1))
                }
            }
        }
        Statement::LastSyncTimestamp { table_name } => {
            let last_sync = state
                .data
                .metadata()?
                .iter()
                .filter(|r| r.table_name == *table_name)
                .filter_map(|r| r.last_sync_timestamp)
                .max();
            Ok(Outcome::rows(vec![Row::from([(
                "last_sync".to_string(),
                SqlValue::from(last_sync),
            )])]))
        }
        Statement::DeletedSince { table_name, since } => {
            let mut deleted: Vec<(String, NaiveDateTime)> = state
                .data
                .metadata()?
                .iter()
                .filter(|r| r.table_name == *table_name && r.is_deleted)
                .filter_map(|r| Some((r.primary_key_value.clone(), r.deleted_at?)))
                .filter(|(_, at)| since.map_or(true, |since| *at > since))
                .collect();
            deleted.sort_by_key(|(_, at)| *at);
            Ok(Outcome::rows(
                deleted
                    .into_iter()
                    .map(|(key, at)| {
                        Row::from([
                            ("primary_key_value".to_string(), SqlValue::Text(key)),
                            ("deleted_at".to_string(), SqlValue::DateTime(at)),
                        ])
                    })
                    .collect(),
            ))
        }
        Statement::SyncedKeys { table_name } => Ok(Outcome::rows(
            state
                .data
                .metadata()?
                .iter()
                .filter(|r| r.table_name == *table_name && !r.is_deleted)
                .map(|r| Row::from([("primary_key_value".to_string(), text(&r.primary_key_value))]))
                .collect(),
        )),
        Statement::PurgeDeleted { days } => {
            let cutoff = now - Duration::days(i64::from(*days));
            let records = state.data.metadata_mut()?;
            let before = records.len();
            records.retain(|r| !(r.is_deleted && r.deleted_at.is_some_and(|at| at < cutoff)));
            Ok(Outcome::affected((before - records.len()) as u64))
        }

        Statement::CreateStatsTable(table) => {
            state.data.stats.entry(table.name()).or_default();
            Ok(Outcome::default())
        }
        Statement::StartRun { mode } => {
            let id = state.data.stats_mut(StatsTable::SyncHistory)?.insert(Row::from([
                ("sync_started_at".to_string(), SqlValue::DateTime(now)),
                ("sync_completed_at".to_string(), SqlValue::Null),
                ("duration_seconds".to_string(), SqlValue::Null),
                ("status".to_string(), text("running")),
                ("mode".to_string(), text(mode)),
                ("error_message".to_string(), SqlValue::Null),
                ("total_inserts".to_string(), SqlValue::UInt(0)),
                ("total_updates".to_string(), SqlValue::UInt(0)),
                ("total_deletes".to_string(), SqlValue::UInt(0)),
                ("tables_processed".to_string(), SqlValue::UInt(0)),
            ]));
            Ok(Outcome {
                rows: vec![],
                affected_rows: 1,
                last_insert_id: Some(id),
            })
        }
        Statement::FinishRun {
            run_id,
            status,
            error_message,
            summary,
        } => {
            let history = state.data.stats_mut(StatsTable::SyncHistory)?;
            let mut affected = 0;
            for row in history.rows.iter_mut().filter(|row| id_of(row) == Some(*run_id)) {
                row.extend([
                    ("sync_completed_at".to_string(), SqlValue::DateTime(now)),
                    (
                        "duration_seconds".to_string(),
                        SqlValue::Float(summary.duration_seconds),
                    ),
                    ("status".to_string(), text(status.as_str())),
                    ("error_message".to_string(), SqlValue::from(error_message.clone())),
                    ("total_inserts".to_string(), SqlValue::UInt(summary.inserts)),
                    ("total_updates".to_string(), SqlValue::UInt(summary.updates)),
                    ("total_deletes".to_string(), SqlValue::UInt(summary.deletes)),
                    (
                        "tables_processed".to_string(),
                        SqlValue::UInt(summary.tables_processed),
                    ),
                ]);
                affected += 1;
            }
            Ok(Outcome::affected(affected))
        }
        Statement::RecordTableStats {
            run_id,
            table_name,
            stats,
        } => {
            state.data.stats_mut(StatsTable::TableSyncStats)?.insert(Row::from([
                ("sync_id".to_string(), SqlValue::UInt(*run_id)),
                ("table_name".to_string(), text(table_name)),
                ("rows_processed".to_string(), SqlValue::UInt(stats.rows)),
                ("inserts".to_string(), SqlValue::UInt(stats.inserted)),
                ("updates".to_string(), SqlValue::UInt(stats.updated)),
                ("deletes".to_string(), SqlValue::UInt(stats.deleted)),
                ("sync_timestamp".to_string(), SqlValue::DateTime(now)),
            ]));
            Ok(Outcome::affected(1))
        }
        Statement::LogOperation {
            run_id,
            level,
            message,
            context,
        } => {
            state.data.stats_mut(StatsTable::OperationLog)?.insert(Row::from([
                ("sync_id".to_string(), SqlValue::from(*run_id)),
                ("log_timestamp".to_string(), SqlValue::DateTime(now)),
                ("level".to_string(), text(level.as_str())),
                ("message".to_string(), text(message)),
                ("context".to_string(), SqlValue::from(context.clone())),
            ]));
            Ok(Outcome::affected(1))
        }
        Statement::OverallStats => {
            let runs = &state.data.stats(StatsTable::SyncHistory)?.rows;
            let with_status = |status: &str| {
                runs.iter()
                    .filter(|row| row.get("status").and_then(SqlValue::as_str) == Some(status))
                    .count() as u64
            };
            let durations: Vec<f64> = runs
                .iter()
                .filter_map(|row| row.get("duration_seconds").and_then(SqlValue::as_f64))
                .collect();
            let avg_duration = if durations.is_empty() {
                SqlValue::Null
            } else {
                SqlValue::Float(durations.iter().sum::<f64>() / durations.len() as f64)
            };
            let last_sync = runs
                .iter()
                .filter_map(|row| row.get("sync_started_at").and_then(SqlValue::as_datetime))
                .max();
            let (successful, failed) = if runs.is_empty() {
                (SqlValue::Null, SqlValue::Null)
            } else {
                (
                    SqlValue::UInt(with_status("success")),
                    SqlValue::UInt(with_status("failed")),
                )
            };
            Ok(Outcome::rows(vec![Row::from([
                ("total_syncs".to_string(), SqlValue::UInt(runs.len() as u64)),
                ("successful_syncs".to_string(), successful),
                ("failed_syncs".to_string(), failed),
                ("last_sync".to_string(), SqlValue::from(last_sync)),
                ("total_inserts".to_string(), sum(runs, "total_inserts")),
                ("total_updates".to_string(), sum(runs, "total_updates")),
                ("total_deletes".to_string(), sum(runs, "total_deletes")),
                ("avg_duration".to_string(), avg_duration),
            ])]))
        }
        Statement::RecentRuns { limit } => {
            let mut runs = state.data.stats(StatsTable::SyncHistory)?.rows.clone();
            newest_first(&mut runs, "sync_started_at");
            runs.truncate(*limit as usize);
            Ok(Outcome::rows(runs))
        }
        Statement::TableHistory { table_name, limit } => {
            let history = state.data.stats(StatsTable::SyncHistory)?;
            let mut rows: Vec<Row> = state
                .data
                .stats(StatsTable::TableSyncStats)?
                .rows
                .iter()
                .filter(|row| {
                    row.get("table_name").and_then(SqlValue::as_str) == Some(table_name.as_str())
                })
                .filter_map(|row| {
                    let run_id = row.get("sync_id").and_then(SqlValue::as_u64)?;
                    let run = history.find(run_id)?;
                    let mut joined = row.clone();
                    for column in ["sync_started_at", "status"] {
                        joined.insert(
                            column.to_string(),
                            run.get(column).cloned().unwrap_or(SqlValue::Null),
                        );
                    }
                    Some(joined)
                })
                .collect();
            newest_first(&mut rows, "sync_timestamp");
            rows.truncate(*limit as usize);
            Ok(Outcome::rows(rows))
        }
        Statement::RecentErrors { limit } => {
            let history = state.data.stats(StatsTable::SyncHistory)?;
            let mut rows: Vec<Row> = state
                .data
                .stats(StatsTable::OperationLog)?
                .rows
                .iter()
                .filter(|row| row.get("level").and_then(SqlValue::as_str) == Some("error"))
                .map(|row| {
                    let run = row
                        .get("sync_id")
                        .and_then(SqlValue::as_u64)
                        .and_then(|id| history.find(id));
                    let mut joined = row.clone();
                    for column in ["sync_started_at", "mode"] {
                        joined.insert(
                            column.to_string(),
                            run.and_then(|r| r.get(column))
                                .cloned()
                                .unwrap_or(SqlValue::Null),
                        );
                    }
                    joined
                })
                .collect();
            newest_first(&mut rows, "log_timestamp");
            rows.truncate(*limit as usize);
            Ok(Outcome::rows(rows))
        }
    }
}

/// One in-memory database; see the module docs.
pub struct MemoryDatabase {
    state: Arc<Mutex<State>>,
    snapshot: Option<Data>,
}

impl Clone for MemoryDatabase {
    /// A new handle on the same data, outside any transaction.
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            snapshot: None,
        }
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            snapshot: None,
        }
    }

    /// Pin `NOW()` to `at`.
    pub async fn set_now(&self, at: NaiveDateTime) {
        self.state.lock().await.clock = Some(at);
    }

    /// Create (or replace) a table with the given column order.
    pub async fn create_table(&self, name: &str, columns: &[&str], primary_key: &str) {
        self.state.lock().await.data.tables.insert(
            name.to_string(),
            Table {
                columns: columns.iter().map(|c| c.to_string()).collect(),
                primary_key: primary_key.to_string(),
                rows: Vec::new(),
                case_insensitive_keys: false,
            },
        );
    }

    /// Match `table`'s keys case-insensitively and ignoring trailing spaces,
    /// as MySQL does for a `utf8mb4_general_ci` column.
    pub async fn use_case_insensitive_keys(&self, table: &str) {
        if let Some(t) = self.state.lock().await.data.tables.get_mut(table) {
            t.case_insensitive_keys = true;
        }
    }

    /// Insert a row directly, bypassing statements. Unlisted columns are NULL.
    ///
    /// # Panics
    ///
    /// If the table does not exist.
    pub async fn insert_row<'c>(
        &self,
        table: &str,
        values: impl IntoIterator<Item = (&'c str, SqlValue)>,
    ) {
        let mut state = self.state.lock().await;
        let Some(t) = state.data.tables.get_mut(table) else {
            panic!("table {table} does not exist");
        };
        let mut row: Row = t
            .columns
            .iter()
            .map(|c| (c.clone(), SqlValue::Null))
            .collect();
        row.extend(values.into_iter().map(|(c, v)| (c.to_string(), v)));
        t.rows.push(row);
    }

    /// Overwrite columns of the row with primary key `key`. Returns whether it existed.
    pub async fn update_row<'c>(
        &self,
        table: &str,
        key: impl Into<SqlValue>,
        values: impl IntoIterator<Item = (&'c str, SqlValue)>,
    ) -> bool {
        let key = key.into().to_key_string();
        let mut state = self.state.lock().await;
        let Some(t) = state.data.tables.get_mut(table) else {
            return false;
        };
        let primary_key = t.primary_key.clone();
        match t
            .rows
            .iter_mut()
            .find(|row| key_of(row, &primary_key).as_deref() == Some(key.as_str()))
        {
            Some(row) => {
                row.extend(values.into_iter().map(|(c, v)| (c.to_string(), v)));
                true
            }
            None => false,
        }
    }

    /// Remove the row with primary key `key`. Returns whether it existed.
    pub async fn delete_row(&self, table: &str, key: impl Into<SqlValue>) -> bool {
        let key = key.into().to_key_string();
        let mut state = self.state.lock().await;
        let Some(t) = state.data.tables.get_mut(table) else {
            return false;
        };
        let primary_key = t.primary_key.clone();
        let before = t.rows.len();
        t.rows
            .retain(|row| key_of(row, &primary_key).as_deref() != Some(key.as_str()));
        t.rows.len() != before
    }

    pub async fn row(&self, table: &str, key: impl Into<SqlValue>) -> Option<Row> {
        let key = key.into().to_key_string();
        let state = self.state.lock().await;
        let t = state.data.tables.get(table)?;
        t.rows
            .iter()
            .find(|row| key_of(row, &t.primary_key).as_deref() == Some(key.as_str()))
            .cloned()
    }

    /// Every row of `table` in insertion order; empty when it does not exist.
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        let state = self.state.lock().await;
        state
            .data
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    pub async fn metadata(&self, table: &str, key: &str) -> Option<MetadataRecord> {
        let state = self.state.lock().await;
        state
            .data
            .metadata
            .as_ref()?
            .iter()
            .find(|r| r.table_name == table && r.primary_key_value == key)
            .cloned()
    }

    /// Raw rows of a stats table.
    pub async fn stats_rows(&self, table: StatsTable) -> Vec<Row> {
        let state = self.state.lock().await;
        state
            .data
            .stats
            .get(table.name())
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// How many statements of [`Statement::kind`] `kind` have run.
    pub async fn statement_count(&self, kind: &str) -> usize {
        self.state
            .lock()
            .await
            .statements
            .get(kind)
            .copied()
            .unwrap_or(0)
    }

    /// Make every insert, update and delete on `table` fail.
    pub async fn fail_writes_to(&self, table: &str) {
        self.state
            .lock()
            .await
            .failing_writes
            .insert(table.to_string());
    }

    async fn run(&self, statement: &Statement) -> Result<Outcome> {
        let mut state = self.state.lock().await;
        *state.statements.entry(statement.kind()).or_insert(0) += 1;
        apply(&mut state, statement)
    }
}

#[async_trait]
impl Connection for MemoryDatabase {
    async fn query(&mut self, statement: &Statement) -> Result<Vec<Row>> {
        Ok(self.run(statement).await?.rows)
    }

    async fn execute(&mut self, statement: &Statement) -> Result<ExecOutcome> {
        let outcome = self.run(statement).await?;
        Ok(ExecOutcome {
            affected_rows: outcome.affected_rows,
            last_insert_id: outcome.last_insert_id,
        })
    }

    async fn begin(&mut self) -> Result<()> {
        let data = self.state.lock().await.data.clone();
        self.snapshot = Some(data);
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        if let Some(data) = self.snapshot.take() {
            self.state.lock().await.data = data;
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }

    async fn close(&mut self) -> Result<()> {
        self.snapshot = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(name: &str) -> Identifier {
        Identifier::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_rollback_restores_shared_data() {
        let db = MemoryDatabase::new();
        db.create_table("items", &["id", "label"], "id").await;
        let mut handle = db.clone();

        handle.begin().await.unwrap();
        handle
            .execute(&Statement::InsertRow {
                table: id("items"),
                columns: vec![id("id"), id("label")],
                values: vec![SqlValue::Int(1), SqlValue::from("a")],
            })
            .await
            .unwrap();
        assert!(db.row("items", 1).await.is_some());

        handle.rollback().await.unwrap();
        assert!(db.row("items", 1).await.is_none());
        assert!(!handle.in_transaction());
    }

    #[tokio::test]
    async fn test_duplicate_primary_key_is_rejected() {
        let mut db = MemoryDatabase::new();
        db.create_table("items", &["id"], "id").await;
        let insert = Statement::InsertRow {
            table: id("items"),
            columns: vec![id("id")],
            values: vec![SqlValue::Int(1)],
        };
        db.execute(&insert).await.unwrap();
        let err = db.execute(&insert).await.unwrap_err();
        assert!(err.to_string().contains("Duplicate entry '1'"));
    }

    #[tokio::test]
    async fn test_case_insensitive_keys_match_like_mysql() {
        let mut db = MemoryDatabase::new();
        db.create_table("tags", &["code"], "code").await;
        db.use_case_insensitive_keys("tags").await;
        db.insert_row("tags", [("code", SqlValue::from("ABC"))]).await;

        let rows = db
            .query(&Statement::SelectByKeys {
                table: id("tags"),
                key_column: id("code"),
                columns: vec![id("code")],
                keys: vec![SqlValue::from("abc "), SqlValue::from("xyz")],
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["code"], SqlValue::from("ABC"));

        let err = db
            .execute(&Statement::InsertRow {
                table: id("tags"),
                columns: vec![id("code")],
                values: vec![SqlValue::from("abc")],
            })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Duplicate entry"));
    }

    #[tokio::test]
    async fn test_newer_than_excludes_equal_and_null() {
        let mut db = MemoryDatabase::new();
        db.create_table("items", &["id", "updated_at"], "id").await;
        for (key, at) in [(1, "2024-01-01 00:00:00"), (2, "2024-01-02 00:00:00")] {
            db.insert_row(
                "items",
                [("id", SqlValue::Int(key)), ("updated_at", SqlValue::from(at))],
            )
            .await;
        }
        db.insert_row("items", [("id", SqlValue::Int(3))]).await;

        let rows = db
            .query(&Statement::SelectRows {
                table: id("items"),
                columns: vec![id("id")],
                newer_than: Some((id("updated_at"), SqlValue::from("2024-01-01 00:00:00"))),
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], SqlValue::Int(2));
    }
}
