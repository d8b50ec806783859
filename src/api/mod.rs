//! Replication HTTP API.
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `GET` | `/api/status` | no | Mode and running stats |
//! | `GET` | `/api/config` | yes | Configuration without secrets |
//! | `POST` | `/api/sync` | no | Run one local sync |
//! | `POST` | `/api/push` | yes | Apply peer rows to master |
//! | `GET` | `/api/pull` | yes | Master rows newer than `since` |
//! | `GET` | `/api/metadata` | yes | Last sync time of a table |
//! | `GET` | `/api/stats/history` | no | Recent sync runs |
//! | `GET` | `/api/stats/table` | no | Recent per-table stats |
//! | `GET` | `/api/stats/errors` | no | Recent error log entries |

mod auth;
mod handlers;

pub use auth::{Authenticated, API_KEY_HEADER};

use std::sync::Arc;

use anyhow::Context;
use axum::routing::{get, post};
use axum::Router;
use replication_engine::Orchestrator;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::info;

use crate::config::AppConfig;

/// Shared by every handler. Syncs, pushes and pulls are serialized by the mutex.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Mutex<Orchestrator>>,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Mutex<Orchestrator>>, config: AppConfig) -> Self {
        Self {
            orchestrator,
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    // Wrong methods on known paths answer like unknown paths.
    Router::new()
        .route(
            "/api/status",
            get(handlers::status).fallback(handlers::not_found),
        )
        .route(
            "/api/config",
            get(handlers::config).fallback(handlers::not_found),
        )
        .route(
            "/api/sync",
            post(handlers::trigger_sync).fallback(handlers::not_found),
        )
        .route(
            "/api/push",
            post(handlers::push).fallback(handlers::not_found),
        )
        .route(
            "/api/pull",
            get(handlers::pull).fallback(handlers::not_found),
        )
        .route(
            "/api/metadata",
            get(handlers::metadata).fallback(handlers::not_found),
        )
        .route(
            "/api/stats/history",
            get(handlers::stats_history).fallback(handlers::not_found),
        )
        .route(
            "/api/stats/table",
            get(handlers::stats_table).fallback(handlers::not_found),
        )
        .route(
            "/api/stats/errors",
            get(handlers::stats_errors).fallback(handlers::not_found),
        )
        .fallback(handlers::not_found)
        .with_state(state)
}

/// Serve the API until the listener fails.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let addr = listener.local_addr().context("Listener has no local address")?;
    info!("Replication API listening on http://{}", addr);
    axum::serve(listener, router(state))
        .await
        .context("HTTP server failed")
}
