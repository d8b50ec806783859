//! Full-table diff and apply for one table in one direction.
//!
//! A pass reads every source row, probes the target for the same keys in
//! batches, then inserts, updates or skips each row:
//!
//! ```text
//! absent in target                      -> INSERT
//! present, timestamp column resolved    -> UPDATE iff target ts is null,
//!                                          source ts is null, or source ts > target ts
//! present, no timestamp column          -> UPDATE (source authoritative)
//!                                          skip   (target authoritative)
//! ```
//!
//! When tracking is enabled every source row is recorded in the target's
//! metadata, and target rows whose key is missing from the source are deleted
//! and marked deleted.
//!
//! Keys are compared as [`SqlValue::to_key_string`] strings, but the database
//! decides equality under the key column's collation. Rows a lookup returns
//! under a different spelling (`ABC` for `abc`) are resolved with one-key
//! lookups, both when probing the target and before deleting.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::ops::AddAssign;

use serde::Serialize;
use sync_core::{
    Identifier, ReplicationError, ReplicationMode, Result, Role, Row, SqlValue, TableConfig,
    TrackingMode,
};
use tracing::{debug, info};

use crate::connection::ConnectionRegistry;
use crate::metadata::MetadataStore;
use crate::statement::Statement;

/// Keys per `WHERE pk IN (...)` probe.
pub const PROBE_BATCH_SIZE: usize = 500;

/// Which side wins when a row exists on both sides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// The source overwrites the target (master → slave, pushes).
    SourceAuthoritative,
    /// Without a timestamp column the target is never overwritten (slave → master).
    TargetAuthoritative,
}

/// Counters for one table pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableSyncStats {
    /// Rows written to the target (`inserted + updated`).
    pub rows: u64,
    pub inserted: u64,
    pub updated: u64,
    pub deleted: u64,
    pub skipped: u64,
}

impl AddAssign for TableSyncStats {
    fn add_assign(&mut self, other: Self) {
        self.rows += other.rows;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.skipped += other.skipped;
    }
}

/// A table's validated layout as seen on one side.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedTable {
    pub table: Identifier,
    pub primary_key: Identifier,
    /// Source columns minus ignored ones, in table order.
    pub columns: Vec<Identifier>,
    /// The timestamp column, when the table has it.
    pub timestamp: Option<Identifier>,
}

impl ResolvedTable {
    fn probe_columns(&self) -> Vec<Identifier> {
        let mut columns = vec![self.primary_key.clone()];
        if let Some(ts) = &self.timestamp {
            columns.push(ts.clone());
        }
        columns
    }
}

/// Runs table passes against the registry's connections.
pub struct TableSync<'a> {
    registry: &'a ConnectionRegistry,
    metadata: MetadataStore<'a>,
    mode: ReplicationMode,
    tracking: TrackingMode,
}

impl<'a> TableSync<'a> {
    pub fn new(
        registry: &'a ConnectionRegistry,
        mode: ReplicationMode,
        tracking: TrackingMode,
    ) -> Self {
        Self {
            registry,
            metadata: MetadataStore::new(registry),
            mode,
            tracking,
        }
    }

    /// Read `role`'s columns for `config`, drop ignored ones and validate the rest.
    pub async fn resolve_columns(&self, role: Role, config: &TableConfig) -> Result<ResolvedTable> {
        let table = config.table()?;
        let primary_key = config.primary_key()?;

        let rows = self
            .registry
            .query(
                role,
                &Statement::ShowColumns {
                    table: table.clone(),
                },
            )
            .await?;

        let names = rows
            .iter()
            .filter_map(|row| row.get("Field"))
            .map(SqlValue::to_key_string)
            .filter(|name| !config.is_ignored(name));
        let columns = Identifier::all(names)?;

        if !columns.iter().any(|c| *c == primary_key) {
            return Err(ReplicationError::configuration(format!(
                "Primary key '{primary_key}' is not a replicated column of table '{table}'"
            )));
        }

        let timestamp = columns
            .iter()
            .find(|c| **c == config.timestamp_column.as_str())
            .cloned();

        Ok(ResolvedTable {
            table,
            primary_key,
            columns,
            timestamp,
        })
    }

    /// Replicate `config`'s table from `source` to `target`.
    ///
    /// Runs inside whatever transaction the caller opened on `target`.
    pub async fn run(
        &self,
        config: &TableConfig,
        source: Role,
        target: Role,
        policy: ConflictPolicy,
    ) -> Result<TableSyncStats> {
        let resolved = self.resolve_columns(source, config).await?;
        info!(
            "Syncing table {} ({} -> {}, {} columns, timestamp: {})",
            resolved.table,
            source,
            target,
            resolved.columns.len(),
            resolved
                .timestamp
                .as_ref()
                .map_or("none", Identifier::as_str)
        );

        let rows = self
            .registry
            .query(
                source,
                &Statement::SelectRows {
                    table: resolved.table.clone(),
                    columns: resolved.columns.clone(),
                    newer_than: None,
                },
            )
            .await?;
        let source_keys: HashSet<String> = rows
            .iter()
            .filter_map(|row| row.get(resolved.primary_key.as_str()))
            .map(SqlValue::to_key_string)
            .collect();

        let mut stats = self.apply_rows(target, &resolved, rows, policy).await?;

        if self.tracking.is_tracked() {
            stats.deleted = self
                .delete_missing(source, target, &resolved, &source_keys)
                .await?;
        }

        info!(
            "Table {} ({} -> {}): {} inserted, {} updated, {} deleted, {} unchanged",
            resolved.table,
            source,
            target,
            stats.inserted,
            stats.updated,
            stats.deleted,
            stats.skipped
        );
        Ok(stats)
    }

    /// Insert or update `rows` into `target` without deletion detection.
    ///
    /// Only columns that are both resolved and present in a row are written,
    /// so partial rows never null out target columns.
    pub async fn apply_rows(
        &self,
        target: Role,
        resolved: &ResolvedTable,
        rows: Vec<Row>,
        policy: ConflictPolicy,
    ) -> Result<TableSyncStats> {
        let mut stats = TableSyncStats::default();
        let mut existing = self.probe_target(target, resolved, &rows).await?;

        for row in rows {
            let key = row
                .get(resolved.primary_key.as_str())
                .cloned()
                .unwrap_or(SqlValue::Null);
            if key.is_null() {
                return Err(ReplicationError::configuration(format!(
                    "Row for table '{}' has no value for primary key '{}'",
                    resolved.table, resolved.primary_key
                )));
            }
            let key_string = key.to_key_string();

            let (columns, values): (Vec<Identifier>, Vec<SqlValue>) = resolved
                .columns
                .iter()
                .filter_map(|c| row.get(c.as_str()).map(|v| (c.clone(), v.clone())))
                .unzip();

            match existing.get(&key_string) {
                None => {
                    self.registry
                        .execute(
                            target,
                            &Statement::InsertRow {
                                table: resolved.table.clone(),
                                columns,
                                values,
                            },
                        )
                        .await?;
                    stats.inserted += 1;
                    let ts = self.row_timestamp(resolved, &row);
                    existing.insert(key_string.clone(), ts);
                }
                Some(target_ts) => {
                    if self.should_update(resolved, &row, target_ts, policy) {
                        self.registry
                            .execute(
                                target,
                                &Statement::UpdateRow {
                                    table: resolved.table.clone(),
                                    columns,
                                    values,
                                    key_column: resolved.primary_key.clone(),
                                    key,
                                },
                            )
                            .await?;
                        stats.updated += 1;
                    } else {
                        stats.skipped += 1;
                    }
                }
            }

            if self.tracking.is_tracked() {
                self.metadata
                    .record_synced(target, resolved.table.as_str(), &key_string)
                    .await?;
            }
        }

        stats.rows = stats.inserted + stats.updated;
        Ok(stats)
    }

    fn row_timestamp(&self, resolved: &ResolvedTable, row: &Row) -> SqlValue {
        resolved
            .timestamp
            .as_ref()
            .and_then(|ts| row.get(ts.as_str()))
            .cloned()
            .unwrap_or(SqlValue::Null)
    }

    fn should_update(
        &self,
        resolved: &ResolvedTable,
        row: &Row,
        target_ts: &SqlValue,
        policy: ConflictPolicy,
    ) -> bool {
        if !self.tracking.is_tracked() || resolved.timestamp.is_none() {
            return policy == ConflictPolicy::SourceAuthoritative;
        }
        let source_ts = self.row_timestamp(resolved, row);
        target_ts.is_null()
            || source_ts.is_null()
            || source_ts.version_cmp(target_ts) == Ordering::Greater
    }

    /// Map each source key present in `target` to the target's timestamp value.
    async fn probe_target(
        &self,
        target: Role,
        resolved: &ResolvedTable,
        rows: &[Row],
    ) -> Result<HashMap<String, SqlValue>> {
        let keys: Vec<SqlValue> = rows
            .iter()
            .filter_map(|row| row.get(resolved.primary_key.as_str()))
            .filter(|key| !key.is_null())
            .cloned()
            .collect();

        let found = self
            .find_keys(target, resolved, &keys, resolved.probe_columns())
            .await?;
        Ok(found
            .into_iter()
            .map(|(key, row)| (key, self.row_timestamp(resolved, &row)))
            .collect())
    }

    /// Look `keys` up on `role` in batches and map each key string to the row
    /// the database matched for it.
    ///
    /// The database compares keys under its own collation, so a returned row
    /// may carry a key that differs from the requested one (`abc` vs `ABC`,
    /// trailing spaces). When a batch returns such a row, the keys of that
    /// batch left unmatched are looked up one at a time.
    async fn find_keys(
        &self,
        role: Role,
        resolved: &ResolvedTable,
        keys: &[SqlValue],
        columns: Vec<Identifier>,
    ) -> Result<HashMap<String, Row>> {
        let key_column = resolved.primary_key.as_str();
        let select = |keys: Vec<SqlValue>| Statement::SelectByKeys {
            table: resolved.table.clone(),
            key_column: resolved.primary_key.clone(),
            columns: columns.clone(),
            keys,
        };

        let mut matched = HashMap::with_capacity(keys.len());
        for chunk in keys.chunks(PROBE_BATCH_SIZE) {
            let requested: HashMap<String, &SqlValue> =
                chunk.iter().map(|k| (k.to_key_string(), k)).collect();
            let found = self.registry.query(role, &select(chunk.to_vec())).await?;
            debug!(
                "Looked up {} keys of {} on {}: {} present",
                chunk.len(),
                resolved.table,
                role,
                found.len()
            );

            let mut collated = 0;
            for row in found {
                let Some(key) = row.get(key_column).map(SqlValue::to_key_string) else {
                    continue;
                };
                if requested.contains_key(&key) {
                    matched.insert(key, row);
                } else {
                    collated += 1;
                }
            }
            if collated == 0 {
                continue;
            }

            debug!(
                "{} rows of {} on {} matched under the column collation",
                collated, resolved.table, role
            );
            for (key_string, key) in requested {
                if matched.contains_key(&key_string) {
                    continue;
                }
                let found = self.registry.query(role, &select(vec![key.clone()])).await?;
                if let Some(row) = found.into_iter().next() {
                    matched.insert(key_string, row);
                }
            }
        }
        Ok(matched)
    }

    /// Delete target rows whose key is absent from the source.
    ///
    /// In master-master mode only rows the target's metadata knows as
    /// replicated are deleted; rows created locally on the target are left
    /// for the opposite direction to copy.
    async fn delete_missing(
        &self,
        source: Role,
        target: Role,
        resolved: &ResolvedTable,
        source_keys: &HashSet<String>,
    ) -> Result<u64> {
        let target_rows = self
            .registry
            .query(
                target,
                &Statement::SelectKeys {
                    table: resolved.table.clone(),
                    key_column: resolved.primary_key.clone(),
                },
            )
            .await?;

        let candidates: Vec<SqlValue> = target_rows
            .iter()
            .filter_map(|row| row.get(resolved.primary_key.as_str()))
            .filter(|key| !key.is_null() && !source_keys.contains(&key.to_key_string()))
            .cloned()
            .collect();
        if candidates.is_empty() {
            return Ok(0);
        }
        let still_in_source = self
            .find_keys(
                source,
                resolved,
                &candidates,
                vec![resolved.primary_key.clone()],
            )
            .await?;

        let replicated = match self.mode {
            ReplicationMode::MasterMaster => Some(
                self.metadata
                    .synced_keys(target, resolved.table.as_str())
                    .await?,
            ),
            ReplicationMode::MasterSlave => None,
        };

        let mut deleted = 0;
        for key in &candidates {
            let key_string = key.to_key_string();
            if still_in_source.contains_key(&key_string) {
                continue;
            }
            if let Some(replicated) = &replicated {
                if !replicated.contains(&key_string) {
                    debug!(
                        "Keeping local row {} of {} on {}",
                        key_string, resolved.table, target
                    );
                    continue;
                }
            }

            self.registry
                .execute(
                    target,
                    &Statement::DeleteRow {
                        table: resolved.table.clone(),
                        key_column: resolved.primary_key.clone(),
                        key: key.clone(),
                    },
                )
                .await?;
            self.metadata
                .mark_deleted(target, resolved.table.as_str(), &key_string)
                .await?;
            deleted += 1;
        }
        Ok(deleted)
    }
}
