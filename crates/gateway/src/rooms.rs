//! Session rooms: per-session fan-out of wire events to connected clients.
//!
//! Each connected client owns an mpsc sink drained by its WebSocket
//! writer task. Delivery is fire-and-forget: a full buffer drops the
//! frame, a gone client is skipped, and neither blocks the emitter.
//! Clients that missed frames re-sync through the timeline read path.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;

use weft_domain::trace::TraceEvent;
use weft_timeline::{Broadcaster, ClientEvent};

/// Sink feeding one client's WS writer task.
pub type ClientSink = mpsc::Sender<ClientEvent>;

/// A client joined to a session room.
pub struct RoomClient {
    pub client_id: String,
    pub joined_at: DateTime<Utc>,
    pub sink: ClientSink,
}

/// Thread-safe registry of session rooms.
pub struct RoomRegistry {
    rooms: RwLock<HashMap<String, Vec<RoomClient>>>,
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Join a client to a session room. A client id rejoining replaces
    /// its previous registration (reconnect).
    pub fn join(&self, session_id: &str, client: RoomClient) {
        let mut rooms = self.rooms.write();
        let room = rooms.entry(session_id.to_owned()).or_default();
        room.retain(|c| c.client_id != client.client_id);
        let client_id = client.client_id.clone();
        room.push(client);
        let members = room.len();
        drop(rooms);

        TraceEvent::RoomJoined {
            session_id: session_id.to_owned(),
            client_id,
            members,
        }
        .emit();
    }

    /// Remove a client from a room; empty rooms are dropped.
    pub fn leave(&self, session_id: &str, client_id: &str) {
        let mut rooms = self.rooms.write();
        let Some(room) = rooms.get_mut(session_id) else {
            return;
        };
        let before = room.len();
        room.retain(|c| c.client_id != client_id);
        let members = room.len();
        let removed = members < before;
        if room.is_empty() {
            rooms.remove(session_id);
        }
        drop(rooms);

        if removed {
            TraceEvent::RoomLeft {
                session_id: session_id.to_owned(),
                client_id: client_id.to_owned(),
                members,
            }
            .emit();
        }
    }

    /// Number of clients in a room.
    pub fn members(&self, session_id: &str) -> usize {
        self.rooms
            .read()
            .get(session_id)
            .map(|r| r.len())
            .unwrap_or(0)
    }

    /// Number of active rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.read().len()
    }
}

#[async_trait]
impl Broadcaster for RoomRegistry {
    async fn emit(&self, session_id: &str, event: ClientEvent) {
        // Snapshot the sinks so the lock is not held while sending.
        let sinks: Vec<(String, ClientSink)> = {
            let rooms = self.rooms.read();
            match rooms.get(session_id) {
                Some(room) => room
                    .iter()
                    .map(|c| (c.client_id.clone(), c.sink.clone()))
                    .collect(),
                None => return,
            }
        };

        for (client_id, sink) in sinks {
            match sink.try_send(event.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        session_id,
                        client_id = %client_id,
                        event = event.name(),
                        "client send buffer full, dropping frame"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    // Disconnect cleanup happens in the WS handler.
                }
            }
        }
    }
}
