//! Per-row replication bookkeeping (`_replication_metadata`).
//!
//! Every database role carries its own metadata table. A record exists per
//! `(table_name, primary_key_value)`; it is refreshed whenever the row is
//! observed by a sync and flipped to deleted when the row disappears from the
//! source. Records are only removed by [`MetadataStore::purge_deleted_older_than`].

use std::collections::HashSet;

use chrono::NaiveDateTime;
use serde::Serialize;
use sync_core::values::mysql_datetime;
use sync_core::{Result, Role, SqlValue};

use crate::connection::ConnectionRegistry;
use crate::statement::Statement;

/// A row flipped to deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeletedRow {
    pub primary_key_value: String,
    #[serde(with = "mysql_datetime")]
    pub deleted_at: NaiveDateTime,
}

/// Metadata operations over the registry's connections.
pub struct MetadataStore<'a> {
    registry: &'a ConnectionRegistry,
}

impl<'a> MetadataStore<'a> {
    pub fn new(registry: &'a ConnectionRegistry) -> Self {
        Self { registry }
    }

    /// Create the metadata table for `role` if it does not exist.
    pub async fn ensure_schema(&self, role: Role) -> Result<()> {
        self.registry
            .execute(role, &Statement::CreateMetadataTable)
            .await?;
        Ok(())
    }

    pub async fn record_synced(&self, role: Role, table: &str, key: &str) -> Result<()> {
        self.registry
            .execute(
                role,
                &Statement::RecordSynced {
                    table_name: table.to_string(),
                    key: key.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    pub async fn mark_deleted(&self, role: Role, table: &str, key: &str) -> Result<()> {
        self.registry
            .execute(
                role,
                &Statement::MarkDeleted {
                    table_name: table.to_string(),
                    key: key.to_string(),
                },
            )
            .await?;
        Ok(())
    }

    /// Latest `last_sync_timestamp` recorded for `table`, if any.
    pub async fn last_sync_timestamp(
        &self,
        role: Role,
        table: &str,
    ) -> Result<Option<NaiveDateTime>> {
        let rows = self
            .registry
            .query(
                role,
                &Statement::LastSyncTimestamp {
                    table_name: table.to_string(),
                },
            )
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get("last_sync"))
            .and_then(SqlValue::as_datetime))
    }

    /// Rows of `table` flipped to deleted after `since`, oldest first.
    pub async fn deleted_since(
        &self,
        role: Role,
        table: &str,
        since: Option<NaiveDateTime>,
    ) -> Result<Vec<DeletedRow>> {
        let rows = self
            .registry
            .query(
                role,
                &Statement::DeletedSince {
                    table_name: table.to_string(),
                    since,
                },
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                let key = row.get("primary_key_value")?.to_key_string();
                let deleted_at = row.get("deleted_at")?.as_datetime()?;
                Some(DeletedRow {
                    primary_key_value: key,
                    deleted_at,
                })
            })
            .collect())
    }

    /// Keys of `table` with a live (not deleted) record.
    pub async fn synced_keys(&self, role: Role, table: &str) -> Result<HashSet<String>> {
        let rows = self
            .registry
            .query(
                role,
                &Statement::SyncedKeys {
                    table_name: table.to_string(),
                },
            )
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.get("primary_key_value"))
            .map(SqlValue::to_key_string)
            .collect())
    }

    /// Hard-delete records flagged deleted more than `days` days ago.
    pub async fn purge_deleted_older_than(&self, role: Role, days: u32) -> Result<u64> {
        let outcome = self
            .registry
            .execute(role, &Statement::PurgeDeleted { days })
            .await?;
        Ok(outcome.affected_rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryDatabase;
    use chrono::Duration;

    fn at(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    async fn setup() -> (MemoryDatabase, ConnectionRegistry) {
        let db = MemoryDatabase::new();
        let mut registry = ConnectionRegistry::new();
        registry.register(Role::Slave, db.clone());
        MetadataStore::new(&registry)
            .ensure_schema(Role::Slave)
            .await
            .unwrap();
        (db, registry)
    }

    #[tokio::test]
    async fn test_ensure_schema_is_idempotent() {
        let (_db, registry) = setup().await;
        let store = MetadataStore::new(&registry);
        store.record_synced(Role::Slave, "orders", "1").await.unwrap();
        store.ensure_schema(Role::Slave).await.unwrap();
        let keys = store.synced_keys(Role::Slave, "orders").await.unwrap();
        assert!(keys.contains("1"));
    }

    #[tokio::test]
    async fn test_metadata_reads_fail_before_schema() {
        let mut registry = ConnectionRegistry::new();
        registry.register(Role::Master, MemoryDatabase::new());
        let store = MetadataStore::new(&registry);
        assert!(store.last_sync_timestamp(Role::Master, "orders").await.is_err());
    }

    #[tokio::test]
    async fn test_record_then_delete_then_record_again() {
        let (db, registry) = setup().await;
        let store = MetadataStore::new(&registry);
        db.set_now(at("2024-01-01 10:00:00")).await;

        store.record_synced(Role::Slave, "orders", "1").await.unwrap();
        store.record_synced(Role::Slave, "orders", "2").await.unwrap();
        assert_eq!(
            store.synced_keys(Role::Slave, "orders").await.unwrap(),
            HashSet::from(["1".to_string(), "2".to_string()])
        );

        db.set_now(at("2024-01-01 11:00:00")).await;
        store.mark_deleted(Role::Slave, "orders", "2").await.unwrap();
        let record = db.metadata("orders", "2").await.unwrap();
        assert!(record.is_deleted);
        assert_eq!(record.deleted_at, Some(at("2024-01-01 11:00:00")));
        assert_eq!(
            store.synced_keys(Role::Slave, "orders").await.unwrap(),
            HashSet::from(["1".to_string()])
        );

        store.record_synced(Role::Slave, "orders", "2").await.unwrap();
        let record = db.metadata("orders", "2").await.unwrap();
        assert!(!record.is_deleted);
        assert_eq!(record.deleted_at, None);
    }

    #[tokio::test]
    async fn test_last_sync_timestamp_is_per_table_max() {
        let (db, registry) = setup().await;
        let store = MetadataStore::new(&registry);
        assert_eq!(store.last_sync_timestamp(Role::Slave, "orders").await.unwrap(), None);

        db.set_now(at("2024-01-01 10:00:00")).await;
        store.record_synced(Role::Slave, "orders", "1").await.unwrap();
        db.set_now(at("2024-01-02 10:00:00")).await;
        store.record_synced(Role::Slave, "orders", "2").await.unwrap();
        store.record_synced(Role::Slave, "customers", "9").await.unwrap();

        assert_eq!(
            store.last_sync_timestamp(Role::Slave, "orders").await.unwrap(),
            Some(at("2024-01-02 10:00:00"))
        );
    }

    #[tokio::test]
    async fn test_deleted_since_is_ascending_and_exclusive() {
        let (db, registry) = setup().await;
        let store = MetadataStore::new(&registry);
        for (key, when) in [
            ("3", "2024-01-03 00:00:00"),
            ("1", "2024-01-01 00:00:00"),
            ("2", "2024-01-02 00:00:00"),
        ] {
            db.set_now(at(when)).await;
            store.mark_deleted(Role::Slave, "orders", key).await.unwrap();
        }

        let all = store.deleted_since(Role::Slave, "orders", None).await.unwrap();
        let keys: Vec<_> = all.iter().map(|d| d.primary_key_value.as_str()).collect();
        assert_eq!(keys, ["1", "2", "3"]);

        let later = store
            .deleted_since(Role::Slave, "orders", Some(at("2024-01-02 00:00:00")))
            .await
            .unwrap();
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].primary_key_value, "3");
    }

    #[tokio::test]
    async fn test_purge_only_removes_old_deleted_records() {
        let (db, registry) = setup().await;
        let store = MetadataStore::new(&registry);
        let now = at("2024-03-01 00:00:00");

        db.set_now(now - Duration::days(40)).await;
        store.mark_deleted(Role::Slave, "orders", "old").await.unwrap();
        store.record_synced(Role::Slave, "orders", "live").await.unwrap();
        db.set_now(now - Duration::days(5)).await;
        store.mark_deleted(Role::Slave, "orders", "recent").await.unwrap();

        db.set_now(now).await;
        let purged = store
            .purge_deleted_older_than(Role::Slave, 30)
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert!(db.metadata("orders", "old").await.is_none());
        assert!(db.metadata("orders", "recent").await.is_some());
        assert!(db.metadata("orders", "live").await.is_some());
    }
}
