//! Replication topology and per-table configuration.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ReplicationError, Result};
use crate::identifier::Identifier;

/// Column consulted for last-write-wins when a table config omits one.
pub const DEFAULT_TIMESTAMP_COLUMN: &str = "updated_at";

/// A named database role held by the connection registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Master,
    Slave,
    /// Optional database holding sync history and statistics.
    Stats,
}

impl Role {
    /// Roles holding replicated tables and their metadata, in either mode.
    pub const REPLICATED: [Role; 2] = [Role::Master, Role::Slave];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Slave => "slave",
            Role::Stats => "stats",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "master" => Ok(Role::Master),
            "slave" => Ok(Role::Slave),
            "stats" => Ok(Role::Stats),
            other => Err(ReplicationError::configuration(format!(
                "Unknown database role: {other}"
            ))),
        }
    }
}

/// Replication topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationMode {
    /// One-way copy from master to slave.
    #[serde(rename = "master-slave")]
    MasterSlave,
    /// Bidirectional copy; master wins conflicts that carry no timestamp.
    #[serde(rename = "master-master")]
    MasterMaster,
}

impl ReplicationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationMode::MasterSlave => "master-slave",
            ReplicationMode::MasterMaster => "master-master",
        }
    }
}

impl fmt::Display for ReplicationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplicationMode {
    type Err = ReplicationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "master-slave" => Ok(ReplicationMode::MasterSlave),
            "master-master" => Ok(ReplicationMode::MasterMaster),
            other => Err(ReplicationError::configuration(format!(
                "Invalid mode '{other}'. Must be \"master-slave\" or \"master-master\""
            ))),
        }
    }
}

/// Whether row-level metadata drives change detection.
///
/// Resolved once from the `enableTracking` flag when the orchestrator is
/// built, so the algorithm branches on a value rather than re-reading config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingMode {
    /// Timestamps decide updates, metadata is recorded, deletions propagate.
    Tracked,
    /// Every present row is overwritten, nothing is recorded, nothing is deleted.
    Untracked,
}

impl TrackingMode {
    pub fn from_enabled(enabled: bool) -> Self {
        if enabled {
            TrackingMode::Tracked
        } else {
            TrackingMode::Untracked
        }
    }

    pub fn is_tracked(&self) -> bool {
        matches!(self, TrackingMode::Tracked)
    }
}

/// Static replication settings for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableConfig {
    pub name: String,
    /// Single scalar column, unique per row.
    pub primary_key: String,
    #[serde(default = "default_timestamp_column")]
    pub timestamp_column: String,
    /// Columns excluded from comparison and copy.
    #[serde(default)]
    pub ignore_columns: Vec<String>,
}

fn default_timestamp_column() -> String {
    DEFAULT_TIMESTAMP_COLUMN.to_string()
}

impl TableConfig {
    pub fn new(name: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: primary_key.into(),
            timestamp_column: default_timestamp_column(),
            ignore_columns: Vec::new(),
        }
    }

    pub fn with_timestamp_column(mut self, column: impl Into<String>) -> Self {
        self.timestamp_column = column.into();
        self
    }

    pub fn with_ignored_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignore_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Validated table name.
    pub fn table(&self) -> Result<Identifier> {
        Identifier::new(self.name.as_str())
    }

    /// Validated primary key column.
    pub fn primary_key(&self) -> Result<Identifier> {
        Identifier::new(self.primary_key.as_str())
    }

    pub fn is_ignored(&self, column: &str) -> bool {
        self.ignore_columns.iter().any(|c| c == column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_config_defaults() {
        let config: TableConfig =
            serde_json::from_str(r#"{"name": "customers", "primaryKey": "id"}"#).unwrap();
        assert_eq!(config.timestamp_column, "updated_at");
        assert!(config.ignore_columns.is_empty());
    }

    #[test]
    fn test_table_config_camel_case_fields() {
        let config: TableConfig = serde_json::from_str(
            r#"{
                "name": "orders",
                "primaryKey": "order_id",
                "timestampColumn": "modified",
                "ignoreColumns": ["cache_blob"]
            }"#,
        )
        .unwrap();
        assert_eq!(config.primary_key, "order_id");
        assert_eq!(config.timestamp_column, "modified");
        assert!(config.is_ignored("cache_blob"));
        assert!(!config.is_ignored("order_id"));
    }

    #[test]
    fn test_table_config_rejects_unsafe_names_on_use() {
        let config = TableConfig::new("orders; DROP TABLE x", "id");
        assert!(matches!(
            config.table(),
            Err(ReplicationError::InvalidIdentifier(_))
        ));
        assert!(config.primary_key().is_ok());
    }

    #[test]
    fn test_mode_serde_names() {
        let mode: ReplicationMode = serde_json::from_str("\"master-master\"").unwrap();
        assert_eq!(mode, ReplicationMode::MasterMaster);
        assert_eq!(
            serde_json::to_string(&ReplicationMode::MasterSlave).unwrap(),
            "\"master-slave\""
        );
        assert!("master-replica".parse::<ReplicationMode>().is_err());
    }

    #[test]
    fn test_tracking_mode_from_flag() {
        assert!(TrackingMode::from_enabled(true).is_tracked());
        assert_eq!(TrackingMode::from_enabled(false), TrackingMode::Untracked);
    }

    #[test]
    fn test_role_round_trip() {
        for role in [Role::Master, Role::Slave, Role::Stats] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!(!Role::REPLICATED.contains(&Role::Stats));
    }
}
