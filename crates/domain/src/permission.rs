use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A pending authorization gate attached to a tool execution.
///
/// Exactly one active (unresolved) permission exists per execution; once
/// `resolved_time` is set, `granted` is set and immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRequest {
    pub id: String,
    pub session_id: String,
    /// 1:1 with the execution it gates.
    pub execution_id: String,
    pub tool_id: String,
    pub tool_name: String,
    pub args: serde_json::Value,
    pub request_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub granted: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_id: Option<String>,
}

impl PermissionRequest {
    pub fn is_resolved(&self) -> bool {
        self.resolved_time.is_some()
    }
}
