//! Session room WebSocket endpoint.
//!
//! Flow:
//! 1. Client connects to `/v1/sessions/:id/ws`.
//! 2. Gateway joins it to the session room and streams wire events as
//!    JSON text frames until the socket closes.
//!
//! No history is pushed on join; clients replay through the timeline
//! read path and rely on the room only for live updates.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use weft_timeline::ClientEvent;

use crate::api::session_not_found;
use crate::rooms::RoomClient;
use crate::state::AppState;

/// Per-client send buffer; overflow drops frames rather than blocking
/// the broadcaster.
const CLIENT_BUFFER: usize = 64;

/// GET /v1/sessions/:id/ws — upgrade and join the session room.
pub async fn session_ws(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    if !state.sessions.exists(&session_id) {
        return session_not_found(&session_id);
    }
    ws.on_upgrade(move |socket| handle_socket(socket, state, session_id))
        .into_response()
}

async fn handle_socket(socket: WebSocket, state: AppState, session_id: String) {
    let (mut ws_sink, mut ws_stream) = socket.split();
    let client_id = uuid::Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::channel::<ClientEvent>(CLIENT_BUFFER);

    state.rooms.join(
        &session_id,
        RoomClient {
            client_id: client_id.clone(),
            joined_at: Utc::now(),
            sink: tx,
        },
    );
    tracing::info!(
        session_id = %session_id,
        client_id = %client_id,
        "client joined session room"
    );

    // Writer task: drain the room sink into the socket.
    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let json = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping unserializable event");
                    continue;
                }
            };
            if ws_sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // Reader loop: the room is push-only, so inbound traffic is just
    // liveness; drain until the client goes away.
    while let Some(Ok(msg)) = ws_stream.next().await {
        match msg {
            Message::Close(_) => break,
            _ => {}
        }
    }

    state.rooms.leave(&session_id, &client_id);
    writer.abort();
    tracing::info!(
        session_id = %session_id,
        client_id = %client_id,
        "client left session room"
    );
}
