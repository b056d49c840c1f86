//! Wire events delivered to session rooms.
//!
//! Event names and payload shapes are part of the client contract; the
//! transport is abstracted behind [`Broadcaster`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use weft_domain::{
    ExecutionError, ExecutionStatus, PermissionRequest, Preview, PreviewContentType,
    StoredMessage, TimelineItem, ToolExecution,
};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Broadcaster seam
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Room-based fan-out to connected clients. Delivery is best-effort and
/// fire-and-forget; a slow or gone client never blocks the caller.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn emit(&self, session_id: &str, event: ClientEvent);
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events pushed to session rooms, serialized as
/// `{"event": "<name>", "payload": {…}}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum ClientEvent {
    #[serde(rename_all = "camelCase")]
    MessageReceived {
        session_id: String,
        message: StoredMessage,
    },
    #[serde(rename_all = "camelCase")]
    MessageUpdated {
        session_id: String,
        message_id: String,
        content: serde_json::Value,
        is_complete: bool,
    },
    /// Pending/running executions.
    #[serde(rename_all = "camelCase")]
    ToolExecutionReceived {
        session_id: String,
        tool_execution: ExecutionPayload,
    },
    /// Terminal executions, with the preview embedded by value.
    #[serde(rename_all = "camelCase")]
    ToolExecutionUpdated {
        session_id: String,
        tool_execution: ExecutionUpdatePayload,
    },
    #[serde(rename_all = "camelCase")]
    PermissionRequestReceived {
        session_id: String,
        permission_request: PermissionRequest,
        #[serde(skip_serializing_if = "Option::is_none")]
        preview: Option<WirePreview>,
    },
    /// Reserved for replay on join; clients normally re-sync through the
    /// read path instead.
    #[serde(rename_all = "camelCase")]
    TimelineHistory {
        session_id: String,
        items: Vec<TimelineItem>,
        total_count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        next_page_token: Option<String>,
    },
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::MessageReceived { .. } => "message_received",
            ClientEvent::MessageUpdated { .. } => "message_updated",
            ClientEvent::ToolExecutionReceived { .. } => "tool_execution_received",
            ClientEvent::ToolExecutionUpdated { .. } => "tool_execution_updated",
            ClientEvent::PermissionRequestReceived { .. } => "permission_request_received",
            ClientEvent::TimelineHistory { .. } => "timeline_history",
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Preview as delivered to clients: always a copy, flagged so clients
/// can distinguish real content from a bare reference.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePreview {
    pub content_type: PreviewContentType,
    pub brief_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub has_actual_content: bool,
}

impl From<&Preview> for WirePreview {
    fn from(preview: &Preview) -> Self {
        Self {
            content_type: preview.content_type,
            brief_content: preview.brief_content.clone(),
            full_content: preview.full_content.clone(),
            metadata: preview.metadata.clone(),
            has_actual_content: true,
        }
    }
}

/// Full execution record for `tool_execution_received`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionPayload {
    #[serde(flatten)]
    pub execution: ToolExecution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<WirePreview>,
}

/// Trimmed terminal-state payload for `tool_execution_updated`, with the
/// redundant preview flags clients key off.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionUpdatePayload {
    pub id: String,
    pub tool_id: String,
    pub tool_name: String,
    pub status: ExecutionStatus,
    pub args: serde_json::Value,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<WirePreview>,
    pub has_preview: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview_content_type: Option<PreviewContentType>,
}

impl ExecutionUpdatePayload {
    pub fn new(execution: &ToolExecution, preview: Option<&Preview>) -> Self {
        Self {
            id: execution.id.clone(),
            tool_id: execution.tool_id.clone(),
            tool_name: execution.tool_name.clone(),
            status: execution.status,
            args: execution.args.clone(),
            start_time: execution.start_time,
            end_time: execution.end_time,
            execution_time: execution.execution_time_ms,
            error: execution.error.clone(),
            preview: preview.map(WirePreview::from),
            has_preview: preview.is_some(),
            preview_content_type: preview.map(|p| p.content_type),
        }
    }
}
