use crate::config::{ConfigStore, WatchedKey};
use crate::ratelimit::LimiterTree;
use crate::snapshot::LimiterSnapshot;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// State for the admin API.
#[derive(Clone)]
pub struct AdminAppState {
    pub tree: Arc<LimiterTree>,
    pub store: ConfigStore,
    /// Required bearer token for mutating routes. None = unrestricted.
    pub admin_token: Option<String>,
}

/// Body of PUT /api/admin/config/{key}.
#[derive(Deserialize)]
pub struct ConfigValueUpdate {
    pub value: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

#[derive(Serialize)]
struct ConfigEntryResponse {
    key: String,
    value: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
        .into_response()
}

pub fn create_admin_router(state: AdminAppState) -> Router {
    Router::new()
        .route("/api/admin/quota/states", get(get_quota_states))
        .route("/api/admin/quota/snapshot", post(post_snapshot))
        .route("/api/admin/config", get(get_config))
        .route("/api/admin/config/:key", put(put_config))
        .with_state(Arc::new(state))
}

/// GET /api/admin/quota/states: unique active quota states across the tree.
async fn get_quota_states(State(state): State<Arc<AdminAppState>>) -> Response {
    Json(state.tree.quota_states()).into_response()
}

/// POST /api/admin/quota/snapshot: replace the tree from a limiter snapshot.
async fn post_snapshot(
    State(state): State<Arc<AdminAppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !validate_admin_token(&headers, &state.admin_token) {
        return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    let snapshot = match LimiterSnapshot::from_json(&body) {
        Ok(snapshot) => snapshot,
        Err(e) => {
            return error_response(StatusCode::BAD_REQUEST, format!("invalid snapshot: {}", e))
        }
    };

    // Applying waits for in-flight checks to drain, so keep it off the async workers
    let tree = Arc::clone(&state.tree);
    match tokio::task::spawn_blocking(move || tree.replace_from_snapshot(&snapshot)).await {
        Ok(Ok(stats)) => Json(stats).into_response(),
        Ok(Err(e)) => error_response(StatusCode::BAD_REQUEST, e.to_string()),
        Err(e) => {
            error!(error = %e, "Snapshot apply task failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "snapshot apply failed")
        }
    }
}

/// GET /api/admin/config: every store entry, sorted by key.
async fn get_config(State(state): State<Arc<AdminAppState>>) -> Response {
    Json(state.store.entries()).into_response()
}

/// PUT /api/admin/config/{key}: publish a value for a recognized key.
///
/// The value is stored as given; the watcher decides whether it is usable.
async fn put_config(
    State(state): State<Arc<AdminAppState>>,
    Path(key): Path<String>,
    headers: HeaderMap,
    Json(update): Json<ConfigValueUpdate>,
) -> Response {
    if !validate_admin_token(&headers, &state.admin_token) {
        return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
    }
    if WatchedKey::parse(&key).is_none() {
        return error_response(StatusCode::BAD_REQUEST, format!("unknown config key '{}'", key));
    }

    state.store.set(&key, &update.value);
    info!(key = %key, value = %update.value, "Config value published");

    Json(ConfigEntryResponse {
        key,
        value: update.value,
    })
    .into_response()
}

/// Returns true if the bearer token in `Authorization` matches the expected admin token.
/// Returns true (no restriction) when `expected` is None.
fn validate_admin_token(headers: &HeaderMap, expected: &Option<String>) -> bool {
    let Some(expected_token) = expected else {
        return true;
    };

    let Some(token) = headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
    else {
        return false;
    };

    token == expected_token
}
