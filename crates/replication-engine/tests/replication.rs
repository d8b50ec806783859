//! End-to-end replication scenarios against in-memory databases
//!
//! Each test wires a master and a slave `MemoryDatabase` into an
//! `Orchestrator` and checks the resulting table contents, metadata and
//! run statistics.
#![allow(clippy::uninlined_format_args)]

use std::sync::Arc;

use anyhow::Result;
use replication_engine::testing::MemoryDatabase;
use replication_engine::{
    ConnectionRegistry, DatabaseStats, EphemeralStats, Orchestrator, ReplicationSettings,
    RunStatus, StatsSink,
};
use sync_core::{ReplicationMode, Role, Row, SqlValue, TableConfig, TrackingMode};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const CUSTOMER_COLUMNS: &[&str] = &["id", "name", "email", "updated_at"];
/// No timestamp column: conflicts are settled by master precedence.
const ORDER_COLUMNS: &[&str] = &["id", "customer_id", "total"];

fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

fn customer(id: i64, name: &str, updated_at: &str) -> [(&'static str, SqlValue); 4] {
    [
        ("id", SqlValue::Int(id)),
        ("name", SqlValue::from(name)),
        ("email", SqlValue::from(format!("{}@example.com", name.to_lowercase()))),
        ("updated_at", SqlValue::from(updated_at)),
    ]
}

fn order(id: i64, customer_id: i64, total: f64) -> [(&'static str, SqlValue); 3] {
    [
        ("id", SqlValue::Int(id)),
        ("customer_id", SqlValue::Int(customer_id)),
        ("total", SqlValue::Float(total)),
    ]
}

struct Environment {
    master: MemoryDatabase,
    slave: MemoryDatabase,
    sink: Arc<dyn StatsSink>,
    orchestrator: Orchestrator,
}

async fn environment(mode: ReplicationMode, tracking: TrackingMode) -> Environment {
    environment_with(mode, tracking, Arc::new(EphemeralStats::new()), None).await
}

async fn environment_with(
    mode: ReplicationMode,
    tracking: TrackingMode,
    sink: Arc<dyn StatsSink>,
    tables: Option<Vec<TableConfig>>,
) -> Environment {
    init_logging();
    let master = MemoryDatabase::new();
    let slave = MemoryDatabase::new();
    for db in [&master, &slave] {
        db.create_table("customers", CUSTOMER_COLUMNS, "id").await;
        db.create_table("orders", ORDER_COLUMNS, "id").await;
    }

    let mut registry = ConnectionRegistry::new();
    registry.register(Role::Master, master.clone());
    registry.register(Role::Slave, slave.clone());

    let tables = tables.unwrap_or_else(|| {
        vec![
            TableConfig::new("customers", "id"),
            TableConfig::new("orders", "id"),
        ]
    });
    let orchestrator = Orchestrator::new(
        Arc::new(registry),
        ReplicationSettings {
            mode,
            tracking,
            tables,
        },
        Arc::clone(&sink),
    );
    Environment {
        master,
        slave,
        sink,
        orchestrator,
    }
}

fn name_of(row: &Row) -> &SqlValue {
    &row["name"]
}

#[tokio::test]
async fn test_master_slave_insert_update_delete() -> Result<()> {
    let mut env = environment(ReplicationMode::MasterSlave, TrackingMode::Tracked).await;
    env.master
        .insert_row("customers", customer(1, "Ann", "2024-01-01 10:00:00"))
        .await;
    env.master
        .insert_row("customers", customer(2, "Bob", "2024-01-01 10:00:00"))
        .await;
    env.master
        .insert_row("customers", customer(3, "Cy", "2024-01-01 10:00:00"))
        .await;

    let first = env.orchestrator.sync().await;
    assert!(first.success, "{:?}", first.error);
    assert_eq!(first.stats.inserts, 3);
    assert_eq!(first.stats.tables_processed["customers"].rows, 3);
    assert_eq!(env.slave.rows("customers").await.len(), 3);

    env.master
        .update_row(
            "customers",
            2,
            [
                ("name", SqlValue::from("Robert")),
                ("updated_at", SqlValue::from("2024-01-02 09:00:00")),
            ],
        )
        .await;
    let second = env.orchestrator.sync().await;
    assert!(second.success);
    let customers = &second.stats.tables_processed["customers"];
    assert_eq!(customers.updates, 1);
    assert_eq!(customers.skipped, 2);
    let bob = env.slave.row("customers", 2).await.unwrap();
    assert_eq!(name_of(&bob), &SqlValue::from("Robert"));

    env.master.delete_row("customers", 3).await;
    let third = env.orchestrator.sync().await;
    assert!(third.success);
    assert_eq!(third.stats.deletes, 1);
    assert!(env.slave.row("customers", 3).await.is_none());
    let record = env.slave.metadata("customers", "3").await.unwrap();
    assert!(record.is_deleted);
    assert!(record.deleted_at.is_some());

    assert_eq!(third.stats.total_syncs, 3);
    assert_eq!(third.stats.successful_syncs, 3);
    Ok(())
}

#[tokio::test]
async fn test_repeated_sync_changes_nothing() -> Result<()> {
    let mut env = environment(ReplicationMode::MasterMaster, TrackingMode::Tracked).await;
    env.master
        .insert_row("customers", customer(1, "Ann", "2024-01-01 10:00:00"))
        .await;
    env.slave
        .insert_row("customers", customer(2, "Bob", "2024-01-01 10:00:00"))
        .await;
    env.master.insert_row("orders", order(10, 1, 12.5)).await;

    assert!(env.orchestrator.sync().await.success);
    let again = env.orchestrator.sync().await;
    assert!(again.success);
    let customers = &again.stats.tables_processed["customers"];
    assert_eq!(customers.inserts, 0);
    assert_eq!(customers.updates, 0);
    assert_eq!(customers.deletes, 0);
    assert_eq!(again.stats.inserts, 0);
    assert_eq!(again.stats.deletes, 0);

    // orders has no timestamp column: master re-asserts its rows on slave,
    // slave never overwrites master.
    let orders = &again.stats.tables_processed["orders"];
    assert_eq!(orders.updates, 1);
    assert_eq!(orders.skipped, 1);

    for key in [1, 2] {
        assert_eq!(
            env.master.row("customers", key).await,
            env.slave.row("customers", key).await
        );
    }
    Ok(())
}

#[tokio::test]
async fn test_equal_timestamps_keep_target_row() -> Result<()> {
    let mut env = environment(ReplicationMode::MasterSlave, TrackingMode::Tracked).await;
    env.master
        .insert_row("customers", customer(1, "Ann", "2024-01-01 10:00:00"))
        .await;
    env.slave
        .insert_row("customers", customer(1, "Stale", "2024-01-01 10:00:00"))
        .await;

    let result = env.orchestrator.sync().await;
    assert!(result.success);
    assert_eq!(result.stats.tables_processed["customers"].skipped, 1);
    let row = env.slave.row("customers", 1).await.unwrap();
    assert_eq!(name_of(&row), &SqlValue::from("Stale"));

    env.master
        .update_row(
            "customers",
            1,
            [("updated_at", SqlValue::from("2024-01-01 10:00:01"))],
        )
        .await;
    let result = env.orchestrator.sync().await;
    assert_eq!(result.stats.updates, 1);
    let row = env.slave.row("customers", 1).await.unwrap();
    assert_eq!(name_of(&row), &SqlValue::from("Ann"));
    Ok(())
}

#[tokio::test]
async fn test_master_wins_when_table_has_no_timestamp() -> Result<()> {
    let mut env = environment(ReplicationMode::MasterMaster, TrackingMode::Tracked).await;
    env.master.insert_row("orders", order(1, 1, 10.0)).await;
    env.slave.insert_row("orders", order(1, 1, 99.0)).await;
    env.slave.insert_row("orders", order(2, 1, 5.0)).await;

    let result = env.orchestrator.sync().await;
    assert!(result.success, "{:?}", result.error);

    for db in [&env.master, &env.slave] {
        let row = db.row("orders", 1).await.unwrap();
        assert_eq!(row["total"], SqlValue::Float(10.0));
        assert!(db.row("orders", 2).await.is_some());
    }
    Ok(())
}

#[tokio::test]
async fn test_master_master_newer_slave_row_wins() -> Result<()> {
    let mut env = environment(ReplicationMode::MasterMaster, TrackingMode::Tracked).await;
    env.master
        .insert_row("customers", customer(1, "Ann", "2024-01-01 10:00:00"))
        .await;
    env.slave
        .insert_row("customers", customer(1, "Annie", "2024-01-03 08:00:00"))
        .await;

    let result = env.orchestrator.sync().await;
    assert!(result.success);
    let customers = &result.stats.tables_processed["customers"];
    assert_eq!(customers.updates, 1);

    for db in [&env.master, &env.slave] {
        let row = db.row("customers", 1).await.unwrap();
        assert_eq!(name_of(&row), &SqlValue::from("Annie"));
    }
    Ok(())
}

#[tokio::test]
async fn test_master_master_keeps_rows_created_on_slave() -> Result<()> {
    let mut env = environment(ReplicationMode::MasterMaster, TrackingMode::Tracked).await;
    env.master
        .insert_row("customers", customer(1, "Ann", "2024-01-01 10:00:00"))
        .await;
    env.slave
        .insert_row("customers", customer(9, "Local", "2024-01-01 11:00:00"))
        .await;

    let result = env.orchestrator.sync().await;
    assert!(result.success);
    assert_eq!(result.stats.deletes, 0);
    assert!(env.slave.row("customers", 9).await.is_some());
    assert!(env.master.row("customers", 9).await.is_some());
    assert!(env.slave.row("customers", 1).await.is_some());
    Ok(())
}

#[tokio::test]
async fn test_master_master_propagates_master_deletion() -> Result<()> {
    let mut env = environment(ReplicationMode::MasterMaster, TrackingMode::Tracked).await;
    env.master
        .insert_row("customers", customer(1, "Ann", "2024-01-01 10:00:00"))
        .await;
    env.master
        .insert_row("customers", customer(2, "Bob", "2024-01-01 10:00:00"))
        .await;
    assert!(env.orchestrator.sync().await.success);

    env.master.delete_row("customers", 2).await;
    let result = env.orchestrator.sync().await;
    assert!(result.success);
    assert_eq!(result.stats.deletes, 1);
    assert!(env.master.row("customers", 2).await.is_none());
    assert!(env.slave.row("customers", 2).await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_untracked_mode_overwrites_and_never_deletes() -> Result<()> {
    let mut env = environment(ReplicationMode::MasterSlave, TrackingMode::Untracked).await;
    env.master
        .insert_row("customers", customer(1, "Ann", "2024-01-01 10:00:00"))
        .await;
    env.master
        .insert_row("customers", customer(2, "Bob", "2024-01-01 10:00:00"))
        .await;
    env.slave
        .insert_row("customers", customer(1, "Newer", "2030-01-01 00:00:00"))
        .await;

    let result = env.orchestrator.sync().await;
    assert!(result.success);
    let row = env.slave.row("customers", 1).await.unwrap();
    assert_eq!(name_of(&row), &SqlValue::from("Ann"));
    assert_eq!(env.slave.statement_count("create_metadata_table").await, 0);
    assert!(env.slave.metadata("customers", "1").await.is_none());

    env.master.delete_row("customers", 2).await;
    let result = env.orchestrator.sync().await;
    assert_eq!(result.stats.deletes, 0);
    assert!(env.slave.row("customers", 2).await.is_some());

    let metadata = env.orchestrator.get_table_metadata("customers").await?;
    assert_eq!(metadata.last_sync, None);
    Ok(())
}

#[tokio::test]
async fn test_failed_table_is_rolled_back_and_recorded() -> Result<()> {
    let mut env = environment(ReplicationMode::MasterSlave, TrackingMode::Tracked).await;
    env.master
        .insert_row("customers", customer(1, "Ann", "2024-01-01 10:00:00"))
        .await;
    env.master.insert_row("orders", order(1, 1, 10.0)).await;
    env.master.insert_row("orders", order(2, 1, 20.0)).await;
    env.slave.fail_writes_to("orders").await;

    let result = env.orchestrator.sync().await;
    assert!(!result.success);
    let error = result.error.clone().unwrap();
    assert!(error.contains("Lock wait timeout"), "{}", error);
    assert_eq!(result.stats.failed_syncs, 1);
    assert_eq!(result.stats.last_error.as_deref(), Some(error.as_str()));

    // customers committed in its own transaction before orders failed.
    assert!(env.slave.row("customers", 1).await.is_some());
    assert!(env.slave.rows("orders").await.is_empty());

    let runs = env.sink.recent_runs(10).await?;
    assert_eq!(runs[0].status, RunStatus::Failed);
    let errors = env.sink.recent_errors(10).await?;
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].message, error);
    Ok(())
}

#[tokio::test]
async fn test_master_master_failure_rolls_back_both_sides() -> Result<()> {
    let mut env = environment(ReplicationMode::MasterMaster, TrackingMode::Tracked).await;
    env.master
        .insert_row("customers", customer(1, "Ann", "2024-01-01 10:00:00"))
        .await;
    env.slave
        .insert_row("customers", customer(9, "Local", "2024-01-01 11:00:00"))
        .await;
    env.master.fail_writes_to("customers").await;

    let result = env.orchestrator.sync().await;
    assert!(!result.success);
    assert!(env.slave.row("customers", 1).await.is_none());
    assert!(env.master.row("customers", 9).await.is_none());
    assert!(env.slave.metadata("customers", "1").await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_unsafe_table_name_fails_the_run() -> Result<()> {
    let mut env = environment_with(
        ReplicationMode::MasterSlave,
        TrackingMode::Tracked,
        Arc::new(EphemeralStats::new()),
        Some(vec![TableConfig::new("customers; DROP TABLE x", "id")]),
    )
    .await;

    let result = env.orchestrator.sync().await;
    assert!(!result.success);
    assert!(result.error.unwrap().contains("Invalid identifier"));
    assert_eq!(env.slave.statement_count("insert_row").await, 0);
    Ok(())
}

#[tokio::test]
async fn test_push_pull_and_metadata() -> Result<()> {
    let env = environment(ReplicationMode::MasterMaster, TrackingMode::Tracked).await;
    env.master
        .insert_row("customers", customer(1, "Ann", "2024-01-01 10:00:00"))
        .await;

    let pushed: Vec<Row> = serde_json::from_value(serde_json::json!([
        {"id": 1, "name": "Ann B", "email": "ann@example.com", "updated_at": "2024-02-01 00:00:00"},
        {"id": 2, "name": "Dee", "email": "dee@example.com", "updated_at": "2024-02-02 00:00:00"}
    ]))?;
    let result = env
        .orchestrator
        .push_data_to_local("customers", pushed)
        .await?;
    assert_eq!(result.inserted, 1);
    assert_eq!(result.updated, 1);

    let all = env.orchestrator.pull_data_from_local("customers", None).await?;
    assert_eq!(all.len(), 2);
    let since = SqlValue::from("2024-02-01 00:00:00");
    let newer = env
        .orchestrator
        .pull_data_from_local("customers", Some(&since))
        .await?;
    assert_eq!(newer.len(), 1);
    assert_eq!(newer[0]["id"], SqlValue::Int(2));

    let metadata = env.orchestrator.get_table_metadata("customers").await?;
    assert_eq!(metadata.table, "customers");
    assert!(metadata.last_sync.is_some());

    assert!(env
        .orchestrator
        .push_data_to_local("invoices", vec![])
        .await
        .is_err());
    assert!(env.orchestrator.get_table_metadata("invoices").await.is_err());
    Ok(())
}

#[tokio::test]
async fn test_pull_without_timestamp_column_returns_everything() -> Result<()> {
    let env = environment(ReplicationMode::MasterSlave, TrackingMode::Tracked).await;
    env.master.insert_row("orders", order(1, 1, 10.0)).await;
    env.master.insert_row("orders", order(2, 1, 20.0)).await;

    let since = SqlValue::from("2099-01-01 00:00:00");
    let rows = env
        .orchestrator
        .pull_data_from_local("orders", Some(&since))
        .await?;
    assert_eq!(rows.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_database_stats_sink_aggregates_runs() -> Result<()> {
    let stats_db = MemoryDatabase::new();
    let mut stats_registry = ConnectionRegistry::new();
    stats_registry.register(Role::Stats, stats_db.clone());
    let sink = DatabaseStats::initialize(Arc::new(stats_registry)).await?;

    let mut env = environment_with(
        ReplicationMode::MasterSlave,
        TrackingMode::Tracked,
        Arc::new(sink),
        None,
    )
    .await;
    env.master
        .insert_row("customers", customer(1, "Ann", "2024-01-01 10:00:00"))
        .await;

    assert!(env.orchestrator.sync().await.success);
    assert!(env.orchestrator.sync().await.success);

    let snapshot = env.orchestrator.get_stats().await;
    assert_eq!(snapshot.running.total_syncs, 2);
    let database = snapshot.database.unwrap();
    assert_eq!(database.total_syncs, 2);
    assert_eq!(database.successful_syncs, 2);
    assert_eq!(database.total_inserts, 1);

    let history = env.sink.table_history("customers", 10).await?;
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|h| h.status == Some(RunStatus::Success)));
    Ok(())
}

#[tokio::test]
async fn test_purge_deleted_metadata_covers_both_roles() -> Result<()> {
    let mut env = environment(ReplicationMode::MasterSlave, TrackingMode::Tracked).await;
    env.master
        .insert_row("customers", customer(1, "Ann", "2024-01-01 10:00:00"))
        .await;
    assert!(env.orchestrator.sync().await.success);
    env.master.delete_row("customers", 1).await;
    assert!(env.orchestrator.sync().await.success);

    let purged = env.orchestrator.purge_deleted_metadata(0).await?;
    assert_eq!(purged.len(), 2);
    assert_eq!(purged[&Role::Master], 0);
    Ok(())
}

#[tokio::test]
async fn test_binary_primary_keys_stay_distinct() -> Result<()> {
    let mut env = environment_with(
        ReplicationMode::MasterSlave,
        TrackingMode::Tracked,
        Arc::new(EphemeralStats::new()),
        Some(vec![TableConfig::new("blobs", "id")]),
    )
    .await;
    for db in [&env.master, &env.slave] {
        db.create_table("blobs", &["id", "label", "updated_at"], "id")
            .await;
    }
    for (key, label) in [(vec![0xFF, 0x01], "first"), (vec![0xFE, 0x01], "second")] {
        env.master
            .insert_row(
                "blobs",
                [
                    ("id", SqlValue::Bytes(key)),
                    ("label", SqlValue::from(label)),
                    ("updated_at", SqlValue::from("2024-01-01 10:00:00")),
                ],
            )
            .await;
    }

    let result = env.orchestrator.sync().await;
    assert!(result.success, "{:?}", result.error);
    let blobs = &result.stats.tables_processed["blobs"];
    assert_eq!(blobs.inserts, 2);
    assert_eq!(blobs.updates, 0);
    assert_eq!(env.slave.rows("blobs").await.len(), 2);
    let second = env
        .slave
        .row("blobs", SqlValue::Bytes(vec![0xFE, 0x01]))
        .await
        .unwrap();
    assert_eq!(second["label"], SqlValue::from("second"));
    assert!(env.slave.metadata("blobs", "base64:/wE=").await.is_some());
    assert!(env.slave.metadata("blobs", "base64:/gE=").await.is_some());

    let again = env.orchestrator.sync().await;
    assert!(again.success);
    assert_eq!(again.stats.tables_processed["blobs"].skipped, 2);
    assert_eq!(again.stats.deletes, 0);
    Ok(())
}

#[tokio::test]
async fn test_keys_matched_under_case_insensitive_collation() -> Result<()> {
    let mut env = environment_with(
        ReplicationMode::MasterSlave,
        TrackingMode::Tracked,
        Arc::new(EphemeralStats::new()),
        Some(vec![TableConfig::new("tags", "code")]),
    )
    .await;
    for db in [&env.master, &env.slave] {
        db.create_table("tags", &["code", "label", "updated_at"], "code")
            .await;
        db.use_case_insensitive_keys("tags").await;
    }
    let tag = |code: &str, label: &str, at: &str| {
        [
            ("code", SqlValue::from(code)),
            ("label", SqlValue::from(label)),
            ("updated_at", SqlValue::from(at)),
        ]
    };
    env.master
        .insert_row("tags", tag("abc", "same", "2024-01-01 10:00:00"))
        .await;
    env.master
        .insert_row("tags", tag("def", "newer", "2024-01-01 11:00:00"))
        .await;
    env.slave
        .insert_row("tags", tag("ABC", "same", "2024-01-01 10:00:00"))
        .await;
    env.slave
        .insert_row("tags", tag("DEF ", "older", "2024-01-01 09:00:00"))
        .await;
    env.slave
        .insert_row("tags", tag("gone", "orphan", "2024-01-01 09:00:00"))
        .await;

    let result = env.orchestrator.sync().await;
    assert!(result.success, "{:?}", result.error);
    let tags = &result.stats.tables_processed["tags"];
    assert_eq!(tags.inserts, 0);
    assert_eq!(tags.updates, 1);
    assert_eq!(tags.skipped, 1);
    assert_eq!(tags.deletes, 1);

    let rows = env.slave.rows("tags").await;
    assert_eq!(rows.len(), 2);
    // Skipped rows keep the slave's spelling of the key and are not deleted.
    assert!(env.slave.row("tags", "ABC").await.is_some());
    let def = env.slave.row("tags", "def").await.unwrap();
    assert_eq!(def["label"], SqlValue::from("newer"));
    assert!(env.slave.row("tags", "gone").await.is_none());

    let again = env.orchestrator.sync().await;
    assert!(again.success, "{:?}", again.error);
    assert_eq!(again.stats.tables_processed["tags"].skipped, 2);
    assert_eq!(again.stats.deletes, 0);
    Ok(())
}

#[tokio::test]
async fn test_ignored_columns_are_left_alone() -> Result<()> {
    let mut env = environment_with(
        ReplicationMode::MasterSlave,
        TrackingMode::Tracked,
        Arc::new(EphemeralStats::new()),
        Some(vec![
            TableConfig::new("customers", "id").with_ignored_columns(["email"])
        ]),
    )
    .await;
    env.master
        .insert_row("customers", customer(1, "Ann", "2024-01-01 10:00:00"))
        .await;
    env.master
        .insert_row("customers", customer(2, "Bob", "2024-01-01 10:00:00"))
        .await;
    env.slave
        .insert_row("customers", customer(1, "Ann", "2024-01-01 10:00:00"))
        .await;
    env.slave
        .update_row("customers", 1, [("email", SqlValue::from("ann@slave.local"))])
        .await;

    // A differing ignored column alone never triggers an update.
    let result = env.orchestrator.sync().await;
    assert!(result.success, "{:?}", result.error);
    let customers = &result.stats.tables_processed["customers"];
    assert_eq!(customers.inserts, 1);
    assert_eq!(customers.updates, 0);
    assert_eq!(customers.skipped, 1);
    let ann = env.slave.row("customers", 1).await.unwrap();
    assert_eq!(ann["email"], SqlValue::from("ann@slave.local"));
    let bob = env.slave.row("customers", 2).await.unwrap();
    assert_eq!(bob["email"], SqlValue::Null);

    env.master
        .update_row(
            "customers",
            1,
            [
                ("name", SqlValue::from("Anna")),
                ("email", SqlValue::from("anna@master.local")),
                ("updated_at", SqlValue::from("2024-01-02 10:00:00")),
            ],
        )
        .await;
    let result = env.orchestrator.sync().await;
    assert!(result.success);
    assert_eq!(result.stats.tables_processed["customers"].updates, 1);
    let ann = env.slave.row("customers", 1).await.unwrap();
    assert_eq!(name_of(&ann), &SqlValue::from("Anna"));
    assert_eq!(ann["email"], SqlValue::from("ann@slave.local"));
    Ok(())
}

#[tokio::test]
async fn test_deleted_rows_listed_per_role_and_since() -> Result<()> {
    let mut env = environment(ReplicationMode::MasterSlave, TrackingMode::Tracked).await;
    for id in 1..=3 {
        env.master
            .insert_row("customers", customer(id, "Ann", "2024-01-01 10:00:00"))
            .await;
    }
    assert!(env.orchestrator.sync().await.success);

    let at = |s: &str| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap();
    env.slave.set_now(at("2024-02-01 00:00:00")).await;
    env.master.delete_row("customers", 1).await;
    assert!(env.orchestrator.sync().await.success);
    env.slave.set_now(at("2024-03-01 00:00:00")).await;
    env.master.delete_row("customers", 2).await;
    assert!(env.orchestrator.sync().await.success);

    let all = env
        .orchestrator
        .get_deleted_rows(Role::Slave, "customers", None)
        .await?;
    let keys: Vec<_> = all.iter().map(|d| d.primary_key_value.as_str()).collect();
    assert_eq!(keys, ["1", "2"]);

    let recent = env
        .orchestrator
        .get_deleted_rows(Role::Slave, "customers", Some(at("2024-02-01 00:00:00")))
        .await?;
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].primary_key_value, "2");

    assert!(env
        .orchestrator
        .get_deleted_rows(Role::Master, "customers", None)
        .await?
        .is_empty());
    assert!(env
        .orchestrator
        .get_deleted_rows(Role::Stats, "customers", None)
        .await
        .is_err());
    assert!(env
        .orchestrator
        .get_deleted_rows(Role::Slave, "unknown", None)
        .await
        .is_err());
    Ok(())
}
