//! Shared fixtures: API state over in-memory master and slave databases.

#![allow(dead_code)]

use std::sync::Arc;

use mysql_table_sync::{build_orchestrator, AppConfig, AppState};
use replication_engine::testing::MemoryDatabase;
use replication_engine::ConnectionRegistry;
use serde_json::{json, Value};
use sync_core::{Role, SqlValue};
use tokio::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const API_KEY: &str = "test-key";

pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "debug".into()))
        .with(fmt::layer())
        .try_init();
}

/// Config document with one `customers` table and the given API keys.
pub fn config_json(keys: &[&str]) -> Value {
    json!({
        "mode": "master-slave",
        "databases": {
            "master": {"host": "master.local", "user": "repl", "password": "master-pw", "database": "shop"},
            "slave": {"host": "slave.local", "user": "repl", "password": "slave-pw", "database": "shop"}
        },
        "replication": {
            "tables": [{"name": "customers", "primaryKey": "id", "timestampColumn": "updated_at"}]
        },
        "api": {"keys": keys}
    })
}

pub struct Environment {
    pub master: MemoryDatabase,
    pub slave: MemoryDatabase,
    pub state: AppState,
}

pub async fn environment(config: Value) -> Environment {
    init_logging();
    let config = AppConfig::from_json(&config.to_string()).unwrap();

    let master = MemoryDatabase::new();
    let slave = MemoryDatabase::new();
    for db in [&master, &slave] {
        db.create_table("customers", &["id", "name", "updated_at"], "id")
            .await;
    }

    let mut registry = ConnectionRegistry::new();
    registry.register(Role::Master, master.clone());
    registry.register(Role::Slave, slave.clone());
    let orchestrator = build_orchestrator(&config, registry).await.unwrap();

    Environment {
        master,
        slave,
        state: AppState::new(Arc::new(Mutex::new(orchestrator)), config),
    }
}

pub async fn insert_customer(db: &MemoryDatabase, id: i64, name: &str, updated_at: &str) {
    db.insert_row(
        "customers",
        [
            ("id", SqlValue::Int(id)),
            ("name", SqlValue::from(name)),
            ("updated_at", SqlValue::from(updated_at)),
        ],
    )
    .await;
}
