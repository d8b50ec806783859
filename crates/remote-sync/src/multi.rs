//! Synchronization with every configured peer environment.
//!
//! For each peer and each replicated table:
//!
//! ```text
//! push: peer /api/metadata -> last_sync
//!       local master rows newer than last_sync -> peer /api/push
//! pull: local last_sync -> peer /api/pull?since=
//!       peer rows -> local master (insert or update)
//! ```
//!
//! Failures are recorded per table and per peer; nothing aborts the loop.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use replication_engine::Orchestrator;
use serde::Serialize;
use sync_core::SqlValue;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::client::ApiClient;
use crate::peer::PeerConfig;

/// Outcome of moving one table in one direction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TableTransfer {
    Transferred {
        rows: u64,
        inserted: u64,
        updated: u64,
    },
    NothingNew {
        rows: u64,
        message: String,
    },
    Failed {
        error: String,
    },
}

impl TableTransfer {
    fn nothing_new(message: &str) -> Self {
        TableTransfer::NothingNew {
            rows: 0,
            message: message.to_string(),
        }
    }
}

/// Per-table results for one peer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PeerSyncReport {
    pub pushed: BTreeMap<String, TableTransfer>,
    pub pulled: BTreeMap<String, TableTransfer>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PeerOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<PeerSyncReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct Peer {
    config: PeerConfig,
    /// Client construction errors are reported when the peer is used.
    client: std::result::Result<ApiClient, String>,
}

pub struct MultiEnvironmentSync {
    orchestrator: Arc<Mutex<Orchestrator>>,
    peers: BTreeMap<String, Peer>,
}

impl MultiEnvironmentSync {
    pub fn new(
        orchestrator: Arc<Mutex<Orchestrator>>,
        peers: &BTreeMap<String, PeerConfig>,
    ) -> Self {
        let peers = peers
            .iter()
            .map(|(name, config)| {
                let client = ApiClient::new(&config.url, config.api_key.clone(), config.timeout())
                    .map_err(|e| format!("{e:#}"));
                (
                    name.clone(),
                    Peer {
                        config: config.clone(),
                        client,
                    },
                )
            })
            .collect();
        Self {
            orchestrator,
            peers,
        }
    }

    pub fn peer_names(&self) -> impl Iterator<Item = &str> {
        self.peers.keys().map(String::as_str)
    }

    /// Push and/or pull every table with every peer, per its sync mode.
    pub async fn sync_with_all_remotes(&self) -> BTreeMap<String, PeerOutcome> {
        let mut results = BTreeMap::new();
        for (name, peer) in &self.peers {
            info!("Syncing with remote environment: {}", name);
            let outcome = match &peer.client {
                Ok(client) => {
                    let report = self.sync_with_remote(name, peer, client).await;
                    info!("Finished syncing with {}", name);
                    PeerOutcome {
                        success: true,
                        result: Some(report),
                        error: None,
                    }
                }
                Err(e) => {
                    error!("Failed to sync with {}: {}", name, e);
                    PeerOutcome {
                        success: false,
                        result: None,
                        error: Some(e.clone()),
                    }
                }
            };
            results.insert(name.clone(), outcome);
        }
        results
    }

    async fn sync_with_remote(&self, name: &str, peer: &Peer, client: &ApiClient) -> PeerSyncReport {
        let tables: Vec<String> = self
            .orchestrator
            .lock()
            .await
            .settings()
            .tables
            .iter()
            .map(|t| t.name.clone())
            .collect();

        let mut report = PeerSyncReport::default();
        for table in tables {
            if peer.config.sync_mode.pushes() {
                let transfer = self
                    .push_table_to_remote(client, &table)
                    .await
                    .unwrap_or_else(|e| {
                        error!("Failed to push {} to {}: {:#}", table, name, e);
                        TableTransfer::Failed {
                            error: format!("{e:#}"),
                        }
                    });
                report.pushed.insert(table.clone(), transfer);
            }
            if peer.config.sync_mode.pulls() {
                let transfer = self
                    .pull_table_from_remote(client, &table)
                    .await
                    .unwrap_or_else(|e| {
                        error!("Failed to pull {} from {}: {:#}", table, name, e);
                        TableTransfer::Failed {
                            error: format!("{e:#}"),
                        }
                    });
                report.pulled.insert(table, transfer);
            }
        }
        report
    }

    async fn push_table_to_remote(&self, client: &ApiClient, table: &str) -> Result<TableTransfer> {
        let last_sync = match client.get_metadata(table).await {
            Ok(response) => response.metadata.last_sync,
            Err(e) => {
                warn!(
                    "Could not read {} metadata from {}, sending all rows: {:#}",
                    table,
                    client.base_url(),
                    e
                );
                None
            }
        };

        let since = last_sync.map(SqlValue::DateTime);
        let rows = self
            .orchestrator
            .lock()
            .await
            .pull_data_from_local(table, since.as_ref())
            .await?;
        if rows.is_empty() {
            return Ok(TableTransfer::nothing_new("No new data to push"));
        }

        let response = client.push_data(table, &rows).await?;
        Ok(TableTransfer::Transferred {
            rows: rows.len() as u64,
            inserted: response.result.inserted,
            updated: response.result.updated,
        })
    }

    async fn pull_table_from_remote(
        &self,
        client: &ApiClient,
        table: &str,
    ) -> Result<TableTransfer> {
        let last_sync = match self
            .orchestrator
            .lock()
            .await
            .get_table_metadata(table)
            .await
        {
            Ok(metadata) => metadata.last_sync,
            Err(e) => {
                warn!("Could not read local {} metadata, pulling all rows: {}", table, e);
                None
            }
        };

        let data = client.pull_data(table, last_sync).await?.data;
        if data.is_empty() {
            return Ok(TableTransfer::nothing_new("No new data to pull"));
        }

        let rows = data.len() as u64;
        let result = self
            .orchestrator
            .lock()
            .await
            .push_data_to_local(table, data)
            .await?;
        Ok(TableTransfer::Transferred {
            rows,
            inserted: result.inserted,
            updated: result.updated,
        })
    }

    /// `GET /api/status` of every peer; unreachable peers are reported as such.
    pub async fn remote_statuses(&self) -> BTreeMap<String, serde_json::Value> {
        let mut statuses = BTreeMap::new();
        for (name, peer) in &self.peers {
            let status = match &peer.client {
                Ok(client) => client.get_status().await.map_err(|e| format!("{e:#}")),
                Err(e) => Err(e.clone()),
            };
            let status = status.unwrap_or_else(|error| {
                serde_json::json!({ "error": error, "reachable": false })
            });
            statuses.insert(name.clone(), status);
        }
        statuses
    }

    /// `POST /api/sync` on every peer.
    pub async fn trigger_remote_syncs(&self) -> BTreeMap<String, serde_json::Value> {
        let mut results = BTreeMap::new();
        for (name, peer) in &self.peers {
            let result = match &peer.client {
                Ok(client) => client.trigger_sync().await.map_err(|e| format!("{e:#}")),
                Err(e) => Err(e.clone()),
            };
            let result = result.unwrap_or_else(|error| {
                serde_json::json!({ "success": false, "error": error })
            });
            results.insert(name.clone(), result);
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_shapes() {
        let transferred = TableTransfer::Transferred {
            rows: 3,
            inserted: 2,
            updated: 1,
        };
        assert_eq!(
            serde_json::to_value(&transferred).unwrap(),
            serde_json::json!({"rows": 3, "inserted": 2, "updated": 1})
        );
        assert_eq!(
            serde_json::to_value(TableTransfer::nothing_new("No new data to pull")).unwrap(),
            serde_json::json!({"rows": 0, "message": "No new data to pull"})
        );
    }

    #[test]
    fn test_failed_peer_outcome_omits_result() {
        let outcome = PeerOutcome {
            success: false,
            result: None,
            error: Some("connection refused".to_string()),
        };
        assert_eq!(
            serde_json::to_value(&outcome).unwrap(),
            serde_json::json!({"success": false, "error": "connection refused"})
        );
    }
}
