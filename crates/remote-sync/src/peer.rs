//! Peer environment configuration (`remoteEnvironments.{name}`).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Direction(s) data flows between this environment and a peer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Local master rows are sent to the peer.
    Push,
    /// Peer master rows are applied to the local master.
    Pull,
    #[default]
    Bidirectional,
}

impl SyncMode {
    pub fn pushes(&self) -> bool {
        matches!(self, SyncMode::Push | SyncMode::Bidirectional)
    }

    pub fn pulls(&self) -> bool {
        matches!(self, SyncMode::Pull | SyncMode::Bidirectional)
    }
}

fn default_timeout() -> u64 {
    30
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub sync_mode: SyncMode,
}

impl PeerConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: None,
            timeout: default_timeout(),
            sync_mode: SyncMode::default(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_sync_mode(mut self, mode: SyncMode) -> Self {
        self.sync_mode = mode;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}
