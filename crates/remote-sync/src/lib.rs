//! Cross-environment synchronization for mysql-table-sync
//!
//! Independent deployments, each with its own master (and optionally slave),
//! exchange rows of their replicated tables through the replication HTTP
//! API. Conflicts are resolved by the receiving side's normal
//! insert-or-update rules; deletions never cross environments.

pub mod client;
pub mod multi;
pub mod peer;

pub use client::{ApiClient, MetadataResponse, PullResponse, PushResponse, API_KEY_HEADER};
pub use multi::{MultiEnvironmentSync, PeerOutcome, PeerSyncReport, TableTransfer};
pub use peer::{PeerConfig, SyncMode};
