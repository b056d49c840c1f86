use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Role & sequence parity
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Conversation role of a stored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    /// Sequence parity bucket: user messages carry even sequences
    /// (0, 2, 4, …), assistant messages odd (1, 3, 5, …).
    pub fn sequence_parity(self) -> i64 {
        match self {
            MessageRole::User => 0,
            MessageRole::Assistant => 1,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stored message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Reference from a message to one of its tool executions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRef {
    pub execution_id: String,
    pub tool_name: String,
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_batched: Option<bool>,
}

/// A user or assistant chat message as persisted in the timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredMessage {
    pub id: String,
    pub session_id: String,
    pub role: MessageRole,
    pub timestamp: DateTime<Utc>,
    /// Structured content parts; opaque to the core.
    pub content: serde_json::Value,
    /// Interleaving order within the session; assigned at ingest when
    /// absent. Even for user turns, odd for assistant turns.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
}

impl StoredMessage {
    /// Execution ids referenced by this message's tool calls.
    pub fn execution_ids(&self) -> Vec<String> {
        self.tool_calls
            .iter()
            .map(|tc| tc.execution_id.clone())
            .collect()
    }
}
