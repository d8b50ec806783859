//! Error taxonomy for the replication layers.

use crate::config::Role;

/// Errors raised while replicating tables.
///
/// - `InvalidIdentifier` is fatal to the enclosing table's sync.
/// - `NotConnected` means a role was never connected and is fatal to the run.
/// - `Database` wraps a driver failure; the current table's transaction is
///   rolled back and the run is aborted.
/// - `Configuration` is raised before any sync starts (missing table or
///   database configuration) or when a table's layout contradicts its config.
#[derive(Debug, thiserror::Error)]
pub enum ReplicationError {
    #[error("Invalid identifier: {0}. Only alphanumeric characters and underscores are allowed.")]
    InvalidIdentifier(String),

    #[error("No connection found for {0}")]
    NotConnected(Role),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl ReplicationError {
    /// Shorthand for building a [`ReplicationError::Configuration`].
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Shorthand for building a [`ReplicationError::Database`].
    pub fn database(message: impl std::fmt::Display) -> Self {
        Self::Database(message.to_string())
    }
}

/// Result alias used across the replication crates.
pub type Result<T, E = ReplicationError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_identifier_message_names_the_identifier() {
        let err = ReplicationError::InvalidIdentifier("users; DROP TABLE x".to_string());
        assert!(err.to_string().contains("users; DROP TABLE x"));
    }

    #[test]
    fn test_not_connected_message_names_the_role() {
        let err = ReplicationError::NotConnected(Role::Slave);
        assert_eq!(err.to_string(), "No connection found for slave");
    }

    #[test]
    fn test_database_error_keeps_driver_message() {
        let err = ReplicationError::database("Table 'testdb.missing' doesn't exist");
        assert_eq!(
            err.to_string(),
            "Database error: Table 'testdb.missing' doesn't exist"
        );
    }
}
