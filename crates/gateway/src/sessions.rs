//! Gateway-owned session registry.
//!
//! Tracks the sessions this gateway hosts and the conversation history
//! the agent layer accumulates for each. The timeline service sees this
//! state only through the agent bridge.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use weft_domain::StoredMessage;

/// A session hosted by this gateway.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEntry {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

struct SessionRecord {
    entry: SessionEntry,
    history: Vec<StoredMessage>,
}

/// Thread-safe registry of live sessions.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Mint a new session.
    pub fn create(&self, label: Option<String>) -> SessionEntry {
        let now = Utc::now();
        let entry = SessionEntry {
            id: uuid::Uuid::new_v4().to_string(),
            label,
            created_at: now,
            updated_at: now,
        };
        self.sessions.write().insert(
            entry.id.clone(),
            SessionRecord {
                entry: entry.clone(),
                history: Vec::new(),
            },
        );
        tracing::info!(session_id = %entry.id, "session created");
        entry
    }

    pub fn get(&self, session_id: &str) -> Option<SessionEntry> {
        self.sessions
            .read()
            .get(session_id)
            .map(|r| r.entry.clone())
    }

    pub fn exists(&self, session_id: &str) -> bool {
        self.sessions.read().contains_key(session_id)
    }

    /// All sessions, newest first.
    pub fn list(&self) -> Vec<SessionEntry> {
        let mut entries: Vec<SessionEntry> = self
            .sessions
            .read()
            .values()
            .map(|r| r.entry.clone())
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries
    }

    /// Append a message to the session's conversation history.
    pub fn record_message(&self, session_id: &str, message: StoredMessage) {
        let mut sessions = self.sessions.write();
        if let Some(record) = sessions.get_mut(session_id) {
            record.history.retain(|m| m.id != message.id);
            record.history.push(message);
            record.entry.updated_at = Utc::now();
        }
    }

    pub fn history(&self, session_id: &str) -> Vec<StoredMessage> {
        self.sessions
            .read()
            .get(session_id)
            .map(|r| r.history.clone())
            .unwrap_or_default()
    }
}
