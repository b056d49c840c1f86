use serde::{Deserialize, Serialize};

/// Renderable kind of a preview's content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewContentType {
    Text,
    Code,
    Diff,
    Directory,
    Image,
}

/// A compact, renderable summary of a tool execution's result (or of a
/// permission's subject). Generation is owned by the execution layer; the
/// timeline only stores, attaches, and forwards these records.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preview {
    pub id: String,
    pub session_id: String,
    pub execution_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_id: Option<String>,
    pub content_type: PreviewContentType,
    /// Short form, always present.
    pub brief_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}
