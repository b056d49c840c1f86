use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::execution::ToolExecution;
use crate::message::StoredMessage;
use crate::permission::PermissionRequest;
use crate::preview::Preview;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Item kind & key
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Discriminant of a timeline item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    Message,
    ToolExecution,
    PermissionRequest,
}

impl ItemKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ItemKind::Message => "message",
            ItemKind::ToolExecution => "tool_execution",
            ItemKind::PermissionRequest => "permission_request",
        }
    }

    /// Parse the query-string form used by the `types=` filter.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "message" => Some(ItemKind::Message),
            "tool_execution" => Some(ItemKind::ToolExecution),
            "permission_request" => Some(ItemKind::PermissionRequest),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniqueness key of an item within a session timeline. Appending an item
/// whose key already exists is an upsert.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemKey {
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub id: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Items
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A chat message entry in the timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageItem {
    pub id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub message: StoredMessage,
    /// Execution ids copied from the message's tool calls.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_executions: Vec<String>,
}

/// A tool execution entry. Carries its parent message link and the resolved
/// preview by value for wire delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolExecutionItem {
    pub id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub execution: ToolExecution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<Preview>,
}

/// A permission request entry, keyed by permission id across the
/// requested and resolved upserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionItem {
    pub id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub request: PermissionRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<Preview>,
}

/// A persisted entry in a session's chronological log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TimelineItem {
    Message(MessageItem),
    ToolExecution(ToolExecutionItem),
    PermissionRequest(PermissionItem),
}

impl TimelineItem {
    pub fn kind(&self) -> ItemKind {
        match self {
            TimelineItem::Message(_) => ItemKind::Message,
            TimelineItem::ToolExecution(_) => ItemKind::ToolExecution,
            TimelineItem::PermissionRequest(_) => ItemKind::PermissionRequest,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            TimelineItem::Message(m) => &m.id,
            TimelineItem::ToolExecution(t) => &t.id,
            TimelineItem::PermissionRequest(p) => &p.id,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            TimelineItem::Message(m) => &m.session_id,
            TimelineItem::ToolExecution(t) => &t.session_id,
            TimelineItem::PermissionRequest(p) => &p.session_id,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TimelineItem::Message(m) => m.timestamp,
            TimelineItem::ToolExecution(t) => t.timestamp,
            TimelineItem::PermissionRequest(p) => p.timestamp,
        }
    }

    pub fn key(&self) -> ItemKey {
        ItemKey {
            kind: self.kind(),
            id: self.id().to_owned(),
        }
    }

    pub fn as_message(&self) -> Option<&MessageItem> {
        match self {
            TimelineItem::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_tool_execution(&self) -> Option<&ToolExecutionItem> {
        match self {
            TimelineItem::ToolExecution(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_permission(&self) -> Option<&PermissionItem> {
        match self {
            TimelineItem::PermissionRequest(p) => Some(p),
            _ => None,
        }
    }
}
