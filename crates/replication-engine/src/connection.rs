//! Connection registry: one live connection per database role.

use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sync_core::{ReplicationError, Result, Role, Row};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::mysql::MySqlConnection;
use crate::statement::Statement;

/// Connection settings for one database role.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: String,
    pub database: String,
}

fn default_port() -> u16 {
    3306
}

impl DatabaseConfig {
    /// `mysql://` URL form, used for logging after sanitization.
    pub fn url(&self) -> String {
        format!(
            "mysql://{}:{}@{}:{}/{}",
            self.user, self.password, self.host, self.port, self.database
        )
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .field("database", &self.database)
            .finish()
    }
}

/// Result of a write statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub affected_rows: u64,
    pub last_insert_id: Option<u64>,
}

/// A single database connection able to run [`Statement`]s.
#[async_trait]
pub trait Connection: Send {
    /// Run a statement that returns rows.
    async fn query(&mut self, statement: &Statement) -> Result<Vec<Row>>;

    /// Run a statement that modifies data or schema.
    async fn execute(&mut self, statement: &Statement) -> Result<ExecOutcome>;

    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    fn in_transaction(&self) -> bool;

    /// Release the underlying connection.
    async fn close(&mut self) -> Result<()>;
}

/// Holds the connection for every role in play.
///
/// Roles are connected up front, then the registry is shared (usually
/// behind an `Arc`) with the metadata store, the table sync and the stats
/// sink. Each connection is guarded by its own mutex so one statement runs
/// at a time per role.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<Role, Mutex<Box<dyn Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a MySQL connection for `role`.
    pub async fn connect(&mut self, role: Role, config: &DatabaseConfig) -> Result<()> {
        let connection = MySqlConnection::connect(config).await?;
        info!("Connected {} database", role);
        self.register(role, connection);
        Ok(())
    }

    /// Install an already open connection for `role`, replacing any previous one.
    pub fn register(&mut self, role: Role, connection: impl Connection + 'static) {
        self.connections
            .insert(role, Mutex::new(Box::new(connection)));
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.connections.contains_key(&role)
    }

    fn slot(&self, role: Role) -> Result<&Mutex<Box<dyn Connection>>> {
        self.connections
            .get(&role)
            .ok_or(ReplicationError::NotConnected(role))
    }

    pub async fn query(&self, role: Role, statement: &Statement) -> Result<Vec<Row>> {
        debug!("{}: {}", role, statement.kind());
        self.slot(role)?.lock().await.query(statement).await
    }

    pub async fn execute(&self, role: Role, statement: &Statement) -> Result<ExecOutcome> {
        debug!("{}: {}", role, statement.kind());
        self.slot(role)?.lock().await.execute(statement).await
    }

    pub async fn begin_transaction(&self, role: Role) -> Result<()> {
        debug!("{}: begin transaction", role);
        self.slot(role)?.lock().await.begin().await
    }

    pub async fn commit(&self, role: Role) -> Result<()> {
        debug!("{}: commit", role);
        self.slot(role)?.lock().await.commit().await
    }

    pub async fn rollback(&self, role: Role) -> Result<()> {
        debug!("{}: rollback", role);
        self.slot(role)?.lock().await.rollback().await
    }

    /// Whether `role` has an open transaction. Unknown roles have none.
    pub async fn in_transaction(&self, role: Role) -> bool {
        match self.connections.get(&role) {
            Some(slot) => slot.lock().await.in_transaction(),
            None => false,
        }
    }

    /// Close every connection. Failures are logged and the first one is returned
    /// after all roles have been attempted.
    pub async fn close_all(&self) -> Result<()> {
        let mut first_error = None;
        for (role, slot) in &self.connections {
            if let Err(e) = slot.lock().await.close().await {
                warn!("Failed to close {} connection: {}", role, e);
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryDatabase;
    use sync_core::Identifier;

    fn show_columns(table: &str) -> Statement {
        Statement::ShowColumns {
            table: Identifier::new(table).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_unknown_role_is_not_connected() {
        let registry = ConnectionRegistry::new();
        let err = registry
            .query(Role::Slave, &show_columns("customers"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicationError::NotConnected(Role::Slave)));
        assert!(!registry.in_transaction(Role::Slave).await);
        assert!(registry.begin_transaction(Role::Stats).await.is_err());
    }

    #[tokio::test]
    async fn test_transaction_flag_follows_begin_and_commit() {
        let db = MemoryDatabase::new();
        let mut registry = ConnectionRegistry::new();
        registry.register(Role::Master, db.clone());

        assert!(!registry.in_transaction(Role::Master).await);
        registry.begin_transaction(Role::Master).await.unwrap();
        assert!(registry.in_transaction(Role::Master).await);
        registry.commit(Role::Master).await.unwrap();
        assert!(!registry.in_transaction(Role::Master).await);
    }

    #[tokio::test]
    async fn test_driver_errors_surface_as_database_errors() {
        let mut registry = ConnectionRegistry::new();
        registry.register(Role::Master, MemoryDatabase::new());
        let err = registry
            .query(Role::Master, &show_columns("missing"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicationError::Database(_)));
    }

    #[test]
    fn test_database_config_hides_password_in_debug() {
        let config: DatabaseConfig = serde_json::from_str(
            r#"{"host": "db", "user": "repl", "password": "s3cret", "database": "app"}"#,
        )
        .unwrap();
        assert_eq!(config.port, 3306);
        assert!(!format!("{config:?}").contains("s3cret"));
    }
}
