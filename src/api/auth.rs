use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use super::AppState;

pub use remote_sync::API_KEY_HEADER;

/// Extractor that admits the request only with a configured `X-API-Key`.
///
/// An empty key list disables authentication.
pub struct Authenticated;

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let keys = &state.config.api.keys;
        if keys.is_empty() {
            return Ok(Authenticated);
        }

        let presented = parts
            .headers
            .get(API_KEY_HEADER)
            .map(|value| value.as_bytes())
            .unwrap_or_default();

        // Every key is compared so timing does not reveal which one matched.
        let matched = keys
            .iter()
            .filter(|key| !key.is_empty())
            .fold(false, |found, key| constant_time_eq(key.as_bytes(), presented) | found);
        if matched {
            Ok(Authenticated)
        } else {
            warn!("Rejected {} {}: missing or invalid API key", parts.method, parts.uri.path());
            Err((StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response())
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
