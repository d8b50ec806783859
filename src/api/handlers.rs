use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use sync_core::{Row, SqlValue};
use tracing::{error, info};

use super::auth::Authenticated;
use super::AppState;

const DEFAULT_HISTORY_LIMIT: i64 = 10;
const DEFAULT_TABLE_LIMIT: i64 = 10;
const DEFAULT_ERRORS_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

#[derive(Debug, Default, Deserialize)]
pub(super) struct TableParams {
    table: Option<String>,
    since: Option<String>,
    limit: Option<String>,
}

impl TableParams {
    fn table(&self) -> Option<&str> {
        self.table.as_deref().filter(|t| !t.is_empty())
    }

    /// Non-numeric limits count as 0, then everything is clamped to `[1, 100]`.
    fn limit(&self, default: i64) -> usize {
        let limit = match self.limit.as_deref() {
            Some(raw) => raw.trim().parse::<i64>().unwrap_or(0),
            None => default,
        };
        limit.clamp(1, MAX_LIMIT) as usize
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn failure(e: impl std::fmt::Display) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "success": false, "error": e.to_string() })),
    )
        .into_response()
}

pub(super) async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "Route not found")
}

/// `GET /api/status`
pub(super) async fn status(State(state): State<AppState>) -> Json<Value> {
    let orchestrator = state.orchestrator.lock().await;
    let stats = orchestrator.get_stats().await;
    Json(json!({
        "mode": orchestrator.mode(),
        "status": "running",
        "stats": stats,
        "timestamp": timestamp(),
    }))
}

/// `GET /api/config`
pub(super) async fn config(_auth: Authenticated, State(state): State<AppState>) -> Json<Value> {
    Json(state.config.sanitized())
}

/// `POST /api/sync`
pub(super) async fn trigger_sync(State(state): State<AppState>) -> Json<Value> {
    info!("Sync triggered through the API");
    let result = state.orchestrator.lock().await.sync().await;
    Json(serde_json::to_value(result).unwrap_or(Value::Null))
}

fn push_params(body: Option<Json<Value>>) -> Option<(String, Value)> {
    let Json(mut body) = body?;
    let table = body
        .get("table")?
        .as_str()
        .filter(|t| !t.is_empty())?
        .to_string();
    let data = body.get_mut("data")?.take();
    let empty = match &data {
        Value::Null => true,
        Value::Array(rows) => rows.is_empty(),
        Value::Object(fields) => fields.is_empty(),
        _ => false,
    };
    (!empty).then_some((table, data))
}

/// `POST /api/push` with `{table, data: [row, ...]}`
pub(super) async fn push(
    _auth: Authenticated,
    State(state): State<AppState>,
    body: Option<Json<Value>>,
) -> Response {
    let Some((table, data)) = push_params(body) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Missing required parameters: table and data",
        );
    };
    let rows: Vec<Row> = match serde_json::from_value(data) {
        Ok(rows) => rows,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("Invalid data: expected an array of rows ({e})"),
            )
        }
    };

    info!("Received {} row(s) for {}", rows.len(), table);
    let result = state
        .orchestrator
        .lock()
        .await
        .push_data_to_local(&table, rows)
        .await;
    match result {
        Ok(result) => Json(json!({ "success": true, "result": result })).into_response(),
        Err(e) => {
            error!("Push to {} failed: {}", table, e);
            failure(e)
        }
    }
}

/// `GET /api/pull?table=&since=`
pub(super) async fn pull(
    _auth: Authenticated,
    State(state): State<AppState>,
    Query(params): Query<TableParams>,
) -> Response {
    let Some(table) = params.table() else {
        return error_response(StatusCode::BAD_REQUEST, "Missing required parameter: table");
    };
    let since = params
        .since
        .as_deref()
        .filter(|s| !s.is_empty())
        .map(SqlValue::from);

    let result = state
        .orchestrator
        .lock()
        .await
        .pull_data_from_local(table, since.as_ref())
        .await;
    match result {
        Ok(data) => Json(json!({
            "success": true,
            "table": table,
            "data": data,
            "timestamp": timestamp(),
        }))
        .into_response(),
        Err(e) => {
            error!("Pull of {} failed: {}", table, e);
            failure(e)
        }
    }
}

/// `GET /api/metadata?table=`
pub(super) async fn metadata(
    _auth: Authenticated,
    State(state): State<AppState>,
    Query(params): Query<TableParams>,
) -> Response {
    let Some(table) = params.table() else {
        return error_response(StatusCode::BAD_REQUEST, "Missing required parameter: table");
    };
    let result = state
        .orchestrator
        .lock()
        .await
        .get_table_metadata(table)
        .await;
    match result {
        Ok(metadata) => Json(json!({
            "success": true,
            "table": table,
            "metadata": metadata,
        }))
        .into_response(),
        Err(e) => failure(e),
    }
}

/// `GET /api/stats/history?limit=`
pub(super) async fn stats_history(
    State(state): State<AppState>,
    Query(params): Query<TableParams>,
) -> Json<Value> {
    let sink = state.orchestrator.lock().await.stats_sink();
    Json(
        match sink
            .recent_runs(params.limit(DEFAULT_HISTORY_LIMIT))
            .await
        {
            Ok(history) => json!({ "count": history.len(), "history": history }),
            Err(e) => json!({
                "error": format!("Failed to retrieve history: {e}"),
                "history": [],
            }),
        },
    )
}

/// `GET /api/stats/table?table=&limit=`
pub(super) async fn stats_table(
    State(state): State<AppState>,
    Query(params): Query<TableParams>,
) -> Json<Value> {
    let Some(table) = params.table() else {
        return Json(json!({ "error": "Table name parameter required", "tables": [] }));
    };
    let sink = state.orchestrator.lock().await.stats_sink();
    Json(
        match sink
            .table_history(table, params.limit(DEFAULT_TABLE_LIMIT))
            .await
        {
            Ok(stats) => json!({ "table": table, "count": stats.len(), "stats": stats }),
            Err(e) => json!({
                "error": format!("Failed to retrieve table stats: {e}"),
                "stats": [],
            }),
        },
    )
}

/// `GET /api/stats/errors?limit=`
pub(super) async fn stats_errors(
    State(state): State<AppState>,
    Query(params): Query<TableParams>,
) -> Json<Value> {
    let sink = state.orchestrator.lock().await.stats_sink();
    Json(
        match sink
            .recent_errors(params.limit(DEFAULT_ERRORS_LIMIT))
            .await
        {
            Ok(errors) => json!({ "count": errors.len(), "errors": errors }),
            Err(e) => json!({
                "error": format!("Failed to retrieve errors: {e}"),
                "errors": [],
            }),
        },
    )
}
