use serde::Serialize;

/// Structured trace events emitted across all weft crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    ExecutionCreated {
        session_id: String,
        execution_id: String,
        tool_id: String,
    },
    ExecutionFinished {
        session_id: String,
        execution_id: String,
        status: String,
        execution_time_ms: Option<i64>,
    },
    PermissionRequested {
        session_id: String,
        permission_id: String,
        execution_id: String,
    },
    PermissionResolved {
        session_id: String,
        permission_id: String,
        granted: bool,
    },
    PreviewAttached {
        session_id: String,
        execution_id: String,
        preview_id: String,
    },
    TimelineAppend {
        session_id: String,
        kind: String,
        item_id: String,
    },
    TimelineLoaded {
        session_id: String,
        items: usize,
    },
    UpdateDebounced {
        session_id: String,
        key: String,
    },
    RoomJoined {
        session_id: String,
        client_id: String,
        members: usize,
    },
    RoomLeft {
        session_id: String,
        client_id: String,
        members: usize,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "weft_event");
    }
}
