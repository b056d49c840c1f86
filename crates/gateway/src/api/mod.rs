pub mod sessions;
pub mod timeline;
pub mod ws;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        // Health probe
        .route("/v1/health", get(health))
        // Sessions
        .route("/v1/sessions", post(sessions::create_session))
        .route("/v1/sessions", get(sessions::list_sessions))
        .route("/v1/sessions/:id", get(sessions::get_session))
        .route("/v1/sessions/:id/messages", post(sessions::submit_message))
        // Timeline read path
        .route("/v1/sessions/:id/timeline", get(timeline::get_timeline))
        // Session room (WS)
        .route("/v1/sessions/:id/ws", get(ws::session_ws))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// GET /v1/health — liveness probe.
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Standardized JSON error body: `{ "code": …, "message": … }`.
pub fn api_error(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "code": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

/// 404 for sessions this gateway does not host.
pub fn session_not_found(session_id: &str) -> Response {
    api_error(
        StatusCode::NOT_FOUND,
        "not_found",
        format!("session not found: {session_id}"),
    )
}
