//! Periodic full-table MySQL replication
//!
//! Compares configured tables between a master and a slave database and
//! applies inserts, updates and deletes, either one way (master-slave) or in
//! both directions (master-master). Optional per-row metadata enables
//! last-write-wins conflict resolution and deletion propagation; an optional
//! stats database keeps run history.

pub mod connection;
pub mod metadata;
pub mod mysql;
pub mod orchestrator;
pub mod statement;
pub mod stats;
pub mod table_sync;
pub mod testing;

pub use connection::{Connection, ConnectionRegistry, DatabaseConfig, ExecOutcome};
pub use metadata::{DeletedRow, MetadataStore};
pub use mysql::{sanitize_connection_string, MySqlConnection};
pub use orchestrator::{
    Orchestrator, PushResult, ReplicationSettings, RunningStats, StatsSnapshot, SyncResult,
    TableMetadata, TableRunStats,
};
pub use statement::{Statement, METADATA_TABLE};
pub use stats::{
    DatabaseStats, EphemeralStats, LogLevel, OperationLogRecord, OverallStats, RunStatus,
    StatsSink, SyncRunRecord, TableStatsRecord, MAX_HISTORY,
};
pub use table_sync::{ConflictPolicy, TableSync, TableSyncStats, PROBE_BATCH_SIZE};
