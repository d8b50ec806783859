//! mysql-table-sync
//!
//! Periodic full-table replication between MySQL databases.
//!
//! # Features
//!
//! - master-slave: one-way copy of inserts, updates and deletes
//! - master-master: bidirectional copy with last-write-wins on a timestamp column
//! - Per-row replication metadata so deletions can be told apart from new rows
//! - Sync history and statistics, in a stats database or in memory
//! - An HTTP API for triggering syncs, viewing stats and peer exchange
//! - Cross-environment push/pull between independent deployments
//!
//! # Crates
//!
//! - `sync_core` - identifiers, values, table configuration, errors
//! - `mysql_types` - conversions to and from `mysql_async` values
//! - `replication_engine` - registry, table sync, metadata, orchestrator, stats
//! - `remote_sync` - peer HTTP client and multi-environment sync
//!
//! # CLI Usage
//!
//! ```bash
//! # One local sync (cron friendly)
//! mysql-table-sync sync --config /etc/replication/config.json
//!
//! # Local sync, then push/pull with every remote environment
//! mysql-table-sync sync-multi
//!
//! # HTTP API with a sync every five minutes
//! mysql-table-sync serve --interval 5m
//!
//! # Forget deletion markers older than 30 days
//! mysql-table-sync purge-metadata --days 30
//! ```

pub mod api;
pub mod config;
pub mod connect;

pub use api::{router, serve, AppState};
pub use config::{load_config, AppConfig};
pub use connect::{build_orchestrator, connect_orchestrator};
