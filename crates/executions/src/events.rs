use weft_domain::{PermissionRequest, Preview, ToolExecution};

/// Lifecycle events emitted by the execution manager. Every variant carries
/// the post-mutation record.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    Created {
        execution: ToolExecution,
    },
    Updated {
        execution: ToolExecution,
    },
    /// Carries the attached preview if one exists at emission time; a
    /// later `PreviewGenerated` follows when attachment loses the race.
    Completed {
        execution: ToolExecution,
        preview: Option<Preview>,
    },
    Failed {
        execution: ToolExecution,
    },
    Aborted {
        execution: ToolExecution,
    },
    PermissionRequested {
        request: PermissionRequest,
    },
    PermissionResolved {
        request: PermissionRequest,
    },
    PreviewGenerated {
        execution: ToolExecution,
        preview: Preview,
    },
}

impl ExecutionEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ExecutionEvent::Created { .. } => "created",
            ExecutionEvent::Updated { .. } => "updated",
            ExecutionEvent::Completed { .. } => "completed",
            ExecutionEvent::Failed { .. } => "error",
            ExecutionEvent::Aborted { .. } => "aborted",
            ExecutionEvent::PermissionRequested { .. } => "permission_requested",
            ExecutionEvent::PermissionResolved { .. } => "permission_resolved",
            ExecutionEvent::PreviewGenerated { .. } => "preview_generated",
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            ExecutionEvent::Created { execution }
            | ExecutionEvent::Updated { execution }
            | ExecutionEvent::Completed { execution, .. }
            | ExecutionEvent::Failed { execution }
            | ExecutionEvent::Aborted { execution }
            | ExecutionEvent::PreviewGenerated { execution, .. } => &execution.session_id,
            ExecutionEvent::PermissionRequested { request }
            | ExecutionEvent::PermissionResolved { request } => &request.session_id,
        }
    }
}
