//! MySQL value conversions for sync-core values.
//!
//! This crate converts between sync-core's `SqlValue` and the values
//! `mysql_async` sends and receives over the binary protocol.
//!
//! # Structure
//!
//! - `forward`: Convert `SqlValue` → `MySQLValue` (for bound parameters)
//! - `reverse`: Convert MySQL values and rows → `SqlValue` / `Row`
//!
//! # Example
//!
//! ```rust
//! use mysql_types::MySQLValue;
//! use sync_core::SqlValue;
//!
//! let value: MySQLValue = SqlValue::Text("Alice".to_string()).into();
//! assert_eq!(value.into_inner(), mysql_async::Value::Bytes(b"Alice".to_vec()));
//! ```

pub mod forward;
pub mod reverse;

pub use forward::{to_params, MySQLValue};
pub use reverse::{row_to_sql_row, ConversionError, MySQLValueWithSchema};
