//! Core types for the mysql-table-sync framework.
//!
//! This crate provides the foundational types shared by every other crate
//! in the workspace:
//!
//! - [`Identifier`] - A table or column name that is safe to interpolate into SQL
//! - [`SqlValue`] / [`Row`] - Column values as read from or written to a database
//! - [`TableConfig`] - Static per-table replication settings
//! - [`ReplicationMode`], [`TrackingMode`], [`Role`] - Replication topology
//! - [`ReplicationError`] - The error taxonomy used by the replication layers
//!
//! # Architecture
//!
//! ```text
//! sync-core (this crate)
//!    │
//!    ├─── mysql-types         (SqlValue <-> mysql_async::Value)
//!    ├─── replication-engine  (registry, metadata, table sync, orchestrator)
//!    └─── remote-sync         (cross-environment push/pull over HTTP)
//! ```
//!
//! # Example
//!
//! ```rust
//! use sync_core::{validate, Identifier, SqlValue};
//!
//! assert!(validate("wp_posts").is_ok());
//! assert!(validate("users; DROP TABLE x").is_err());
//!
//! let table = Identifier::new("customers").unwrap();
//! assert_eq!(table.quoted(), "`customers`");
//!
//! assert_eq!(SqlValue::Int(42).to_key_string(), "42");
//! ```

pub mod config;
pub mod error;
pub mod identifier;
pub mod values;

// Re-exports for convenience
pub use config::{ReplicationMode, Role, TableConfig, TrackingMode, DEFAULT_TIMESTAMP_COLUMN};
pub use error::{ReplicationError, Result};
pub use identifier::{validate, Identifier};
pub use values::{Row, SqlValue};
