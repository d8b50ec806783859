//! Configuration document and loader.
//!
//! The document is JSON:
//!
//! ```json
//! {
//!   "mode": "master-slave",
//!   "databases": {
//!     "master": {"host": "db1", "user": "repl", "password": "...", "database": "shop"},
//!     "slave":  {"host": "db2", "user": "repl", "password": "...", "database": "shop"},
//!     "stats":  {"host": "db3", "user": "repl", "password": "...", "database": "repl_stats"}
//!   },
//!   "replication": {
//!     "tables": [{"name": "customers", "primaryKey": "id", "timestampColumn": "updated_at"}],
//!     "enableTracking": true
//!   },
//!   "api": {"keys": ["..."]},
//!   "remoteEnvironments": {"staging": {"url": "https://staging:8080", "apiKey": "..."}},
//!   "server": {"bind": "0.0.0.0:8080"}
//! }
//! ```

mod duration;

pub use duration::parse_interval;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use remote_sync::PeerConfig;
use replication_engine::{DatabaseConfig, ReplicationSettings};
use serde::{Deserialize, Serialize};
use sync_core::{validate, ReplicationMode, TableConfig, TrackingMode};
use tracing::{info, warn};

/// Files tried, in order, after an explicit path.
pub const SEARCH_ORDER: [&str; 3] = ["config.local.json", "config.json", "config.example.json"];

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Databases {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master: Option<DatabaseConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slave: Option<DatabaseConfig>,
    /// History and statistics; an in-process history is kept when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<DatabaseConfig>,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicationSection {
    #[serde(default)]
    pub tables: Vec<TableConfig>,
    #[serde(default = "enabled")]
    pub enable_tracking: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiSection {
    /// Accepted `X-API-Key` values. Empty disables authentication.
    #[serde(default)]
    pub keys: Vec<String>,
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub mode: String,
    #[serde(default)]
    pub databases: Databases,
    #[serde(default)]
    pub replication: ReplicationSection,
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub remote_environments: BTreeMap<String, PeerConfig>,
    #[serde(default)]
    pub server: ServerSection,
}

impl AppConfig {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        let config: AppConfig =
            serde_json::from_str(text).context("Invalid JSON in configuration file")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject documents the replication engine cannot run.
    pub fn validate(&self) -> anyhow::Result<()> {
        let mode = self.replication_mode()?;
        if self.databases.master.is_none() {
            anyhow::bail!("Master database configuration is required");
        }
        if self.databases.slave.is_none() {
            anyhow::bail!("Slave database configuration is required for {mode} mode");
        }
        if self.replication.tables.is_empty() {
            anyhow::bail!("At least one table must be configured for replication");
        }
        for table in &self.replication.tables {
            validate(&table.name)
                .with_context(|| format!("Invalid table name in configuration: {}", table.name))?;
            validate(&table.primary_key).with_context(|| {
                format!("Invalid primary key for table {}", table.name)
            })?;
        }
        for (name, peer) in &self.remote_environments {
            if peer.url.trim().is_empty() {
                anyhow::bail!("Remote environment '{name}' has no url");
            }
        }
        Ok(())
    }

    pub fn replication_mode(&self) -> anyhow::Result<ReplicationMode> {
        self.mode
            .parse()
            .map_err(|_| anyhow::anyhow!(r#"Invalid mode. Must be "master-slave" or "master-master""#))
    }

    pub fn tracking(&self) -> TrackingMode {
        TrackingMode::from_enabled(self.replication.enable_tracking)
    }

    pub fn settings(&self) -> anyhow::Result<ReplicationSettings> {
        Ok(ReplicationSettings {
            mode: self.replication_mode()?,
            tracking: self.tracking(),
            tables: self.replication.tables.clone(),
        })
    }

    /// The document as served by `GET /api/config`: no database passwords, no API keys.
    pub fn sanitized(&self) -> serde_json::Value {
        let mut value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        if let Some(databases) = value.get_mut("databases").and_then(|v| v.as_object_mut()) {
            for database in databases.values_mut() {
                if let Some(database) = database.as_object_mut() {
                    database.remove("password");
                }
            }
        }
        if let Some(api) = value.get_mut("api").and_then(|v| v.as_object_mut()) {
            api.remove("keys");
        }
        if let Some(peers) = value
            .get_mut("remoteEnvironments")
            .and_then(|v| v.as_object_mut())
        {
            for peer in peers.values_mut() {
                if let Some(peer) = peer.as_object_mut() {
                    peer.remove("apiKey");
                }
            }
        }
        value
    }
}

/// Candidate files: `explicit` first, then [`SEARCH_ORDER`] inside `dir`.
pub fn candidate_paths(explicit: Option<&Path>, dir: &Path) -> Vec<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .into_iter()
        .chain(SEARCH_ORDER.iter().map(|name| dir.join(name)))
        .collect()
}

/// Load and validate the first configuration file that exists.
pub fn load_config(explicit: Option<&Path>, dir: &Path) -> anyhow::Result<(PathBuf, AppConfig)> {
    if let Some(path) = explicit {
        if !path.exists() {
            warn!(
                "Configuration file {} not found, searching defaults",
                path.display()
            );
        }
    }

    let path = candidate_paths(explicit, dir)
        .into_iter()
        .find(|p| p.is_file())
        .ok_or_else(|| {
            anyhow::anyhow!(
                "No configuration file found. Please create config.json or config.local.json"
            )
        })?;

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
    let config = AppConfig::from_json(&text)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    info!("Loaded configuration from {}", path.display());
    Ok((path, config))
}
