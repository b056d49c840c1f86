//! Session management endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use chrono::Utc;
use serde::Deserialize;

use weft_domain::time;
use weft_domain::{MessageRole, StoredMessage, ToolCallRef};

use crate::api::{api_error, session_not_found};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionBody {
    #[serde(default)]
    pub label: Option<String>,
}

/// Register a new session and its broadcast room.
pub async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionBody>>,
) -> impl IntoResponse {
    let label = body.and_then(|Json(b)| b.label);
    let entry = state.sessions.create(label);
    (StatusCode::CREATED, Json(entry))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /v1/sessions, GET /v1/sessions/:id
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn list_sessions(State(state): State<AppState>) -> impl IntoResponse {
    let sessions = state.sessions.list();
    Json(serde_json::json!({
        "sessions": sessions,
        "count": sessions.len(),
    }))
}

/// Session detail, including its pending permission gates.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let Some(entry) = state.sessions.get(&session_id) else {
        return session_not_found(&session_id);
    };
    let pending: Vec<_> = state
        .executions
        .permissions_for_session(&session_id)
        .into_iter()
        .filter(|p| !p.is_resolved())
        .collect();
    Json(serde_json::json!({
        "session": entry,
        "connectedClients": state.rooms.members(&session_id),
        "pendingPermissions": pending,
    }))
    .into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/sessions/:id/messages
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitMessageBody {
    #[serde(default)]
    pub id: Option<String>,
    /// Structured content parts.
    pub content: serde_json::Value,
    /// RFC 3339; unparseable or absent values become the current time.
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub sequence: Option<i64>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRef>,
}

/// Submit an authoritative client-originated user message. Runs through
/// the public timeline entrypoint, which assigns the sequence, persists,
/// and broadcasts `message_received` to the session room.
pub async fn submit_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(body): Json<SubmitMessageBody>,
) -> Response {
    if !state.sessions.exists(&session_id) {
        return session_not_found(&session_id);
    }

    let timestamp = match body.timestamp.as_deref() {
        Some(raw) => time::parse_or_now(raw, "message submit"),
        None => Utc::now(),
    };
    let message = StoredMessage {
        id: body
            .id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        session_id: session_id.clone(),
        role: MessageRole::User,
        timestamp,
        content: body.content,
        sequence: body.sequence,
        tool_calls: body.tool_calls,
        parent_message_id: None,
    };

    match state
        .timeline
        .add_message_to_timeline(&session_id, message)
        .await
    {
        Ok(item) => {
            // Keep the agent-side conversation view current.
            if let Some(m) = item.as_message() {
                state.bridge.record_message(&session_id, m.message.clone());
            }
            (StatusCode::CREATED, Json(item)).into_response()
        }
        Err(e) => {
            tracing::error!(session_id = %session_id, error = %e, "message submit failed");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "storage_failure",
                e.to_string(),
            )
        }
    }
}
