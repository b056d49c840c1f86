//! In-memory registry of tool executions and permission requests.
//!
//! All mutations go through the manager, which enforces the lifecycle
//! state machine and emits an [`ExecutionEvent`] per completed operation.
//! Events are delivered over a broadcast channel: sending only enqueues,
//! so no subscriber ever runs inside the registry lock and none can
//! re-enter the manager synchronously.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;

use weft_domain::trace::TraceEvent;
use weft_domain::{
    Error, ExecutionError, ExecutionStatus, PermissionRequest, Result, ToolExecution,
};

use crate::events::ExecutionEvent;
use crate::preview::PreviewRegistry;

const EVENT_CHANNEL_CAPACITY: usize = 256;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
struct Registry {
    executions: HashMap<String, ToolExecution>,
    /// Creation-ordered execution ids per session.
    session_executions: HashMap<String, Vec<String>>,
    permission_requests: HashMap<String, PermissionRequest>,
    session_permissions: HashMap<String, Vec<String>>,
    /// Latest permission id per execution (resolved or not).
    execution_permissions: HashMap<String, String>,
}

impl Registry {
    fn execution_mut(&mut self, id: &str) -> Result<&mut ToolExecution> {
        self.executions
            .get_mut(id)
            .ok_or_else(|| Error::not_found("execution", id))
    }

    /// Check and apply a status transition.
    fn transition(&mut self, id: &str, next: ExecutionStatus) -> Result<&mut ToolExecution> {
        let exec = self.execution_mut(id)?;
        if !exec.status.can_transition_to(next) {
            return Err(Error::IllegalTransition(format!(
                "execution {id}: {} -> {next}",
                exec.status
            )));
        }
        exec.status = next;
        Ok(exec)
    }
}

/// Stamp the terminal timing fields. When the caller supplies a duration,
/// `end_time` is derived from it so the two fields always agree.
fn finish(exec: &mut ToolExecution, execution_time_ms: Option<i64>) {
    match execution_time_ms {
        Some(ms) => {
            exec.execution_time_ms = Some(ms);
            exec.end_time = Some(exec.start_time + Duration::milliseconds(ms));
        }
        None => {
            let end = Utc::now();
            exec.execution_time_ms = Some((end - exec.start_time).num_milliseconds());
            exec.end_time = Some(end);
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Manager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tracks the lifecycle of each tool invocation and its permission
/// handshake. Owns the mutable execution/permission records; consumers
/// only ever receive clones.
pub struct ToolExecutionManager {
    inner: Mutex<Registry>,
    previews: Arc<PreviewRegistry>,
    events: broadcast::Sender<ExecutionEvent>,
}

impl ToolExecutionManager {
    pub fn new(previews: Arc<PreviewRegistry>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Registry::default()),
            previews,
            events,
        }
    }

    /// Subscribe to lifecycle events. Dropping the receiver unsubscribes.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    pub fn previews(&self) -> &Arc<PreviewRegistry> {
        &self.previews
    }

    fn emit(&self, event: ExecutionEvent) {
        // Ignore "no subscribers": the manager runs fine stand-alone.
        let _ = self.events.send(event);
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    pub fn create_execution(
        &self,
        session_id: &str,
        tool_id: &str,
        tool_name: &str,
        tool_use_id: &str,
        args: serde_json::Value,
    ) -> ToolExecution {
        let execution = ToolExecution {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: session_id.to_owned(),
            tool_id: tool_id.to_owned(),
            tool_name: tool_name.to_owned(),
            tool_use_id: tool_use_id.to_owned(),
            args,
            status: ExecutionStatus::Pending,
            start_time: Utc::now(),
            end_time: None,
            execution_time_ms: None,
            result: None,
            error: None,
            permission_id: None,
            preview_id: None,
            summary: None,
        };

        let mut reg = self.inner.lock();
        reg.session_executions
            .entry(session_id.to_owned())
            .or_default()
            .push(execution.id.clone());
        reg.executions
            .insert(execution.id.clone(), execution.clone());
        self.emit(ExecutionEvent::Created {
            execution: execution.clone(),
        });
        drop(reg);

        TraceEvent::ExecutionCreated {
            session_id: session_id.to_owned(),
            execution_id: execution.id.clone(),
            tool_id: tool_id.to_owned(),
        }
        .emit();

        execution
    }

    pub fn start_execution(&self, id: &str) -> Result<ToolExecution> {
        let mut reg = self.inner.lock();
        let execution = reg.transition(id, ExecutionStatus::Running)?.clone();
        self.emit(ExecutionEvent::Updated {
            execution: execution.clone(),
        });
        Ok(execution)
    }

    pub fn complete_execution(
        &self,
        id: &str,
        result: serde_json::Value,
        execution_time_ms: Option<i64>,
    ) -> Result<ToolExecution> {
        let mut reg = self.inner.lock();
        let exec = reg.transition(id, ExecutionStatus::Completed)?;
        exec.result = Some(result);
        finish(exec, execution_time_ms);
        let execution = exec.clone();
        self.emit(ExecutionEvent::Completed {
            execution: execution.clone(),
            preview: self.previews.for_execution(id),
        });
        drop(reg);

        self.trace_finished(&execution);
        Ok(execution)
    }

    pub fn fail_execution(&self, id: &str, error: ExecutionError) -> Result<ToolExecution> {
        let mut reg = self.inner.lock();
        let exec = reg.transition(id, ExecutionStatus::Error)?;
        exec.error = Some(error);
        finish(exec, None);
        let execution = exec.clone();

        // Failing while the gate is open settles the permission as denied;
        // no unresolved permission may outlive its execution.
        let mut settled = None;
        if let Some(pid) = execution.permission_id.as_deref() {
            if let Some(request) = reg.permission_requests.get_mut(pid) {
                if !request.is_resolved() {
                    request.resolved_time = Some(Utc::now());
                    request.granted = Some(false);
                    settled = Some(request.clone());
                }
            }
        }

        self.emit(ExecutionEvent::Failed {
            execution: execution.clone(),
        });
        if let Some(request) = settled {
            self.emit(ExecutionEvent::PermissionResolved { request });
        }
        drop(reg);

        self.trace_finished(&execution);
        Ok(execution)
    }

    pub fn abort_execution(&self, id: &str) -> Result<ToolExecution> {
        let mut reg = self.inner.lock();
        let exec = reg.transition(id, ExecutionStatus::Aborted)?;
        finish(exec, None);
        let execution = exec.clone();
        self.emit(ExecutionEvent::Aborted {
            execution: execution.clone(),
        });
        drop(reg);

        self.trace_finished(&execution);
        Ok(execution)
    }

    /// Attach a one-line display summary. Permitted in any state,
    /// including terminal ones.
    pub fn set_summary(&self, id: &str, summary: &str) -> Result<ToolExecution> {
        let mut reg = self.inner.lock();
        let exec = reg.execution_mut(id)?;
        exec.summary = Some(summary.to_owned());
        let execution = exec.clone();
        self.emit(ExecutionEvent::Updated {
            execution: execution.clone(),
        });
        Ok(execution)
    }

    // ── Permissions ───────────────────────────────────────────────────

    /// Open a permission gate for an execution. At most one unresolved
    /// permission may exist per execution.
    pub fn request_permission(
        &self,
        execution_id: &str,
        args: serde_json::Value,
    ) -> Result<PermissionRequest> {
        let mut reg = self.inner.lock();

        if let Some(prev_id) = reg.execution_permissions.get(execution_id) {
            if let Some(prev) = reg.permission_requests.get(prev_id) {
                if !prev.is_resolved() {
                    return Err(Error::IllegalTransition(format!(
                        "execution {execution_id} already has an active permission request"
                    )));
                }
            }
        }

        let exec = reg.transition(execution_id, ExecutionStatus::AwaitingPermission)?;
        let request = PermissionRequest {
            id: uuid::Uuid::new_v4().to_string(),
            session_id: exec.session_id.clone(),
            execution_id: execution_id.to_owned(),
            tool_id: exec.tool_id.clone(),
            tool_name: exec.tool_name.clone(),
            args,
            request_time: Utc::now(),
            resolved_time: None,
            granted: None,
            preview_id: None,
        };
        exec.permission_id = Some(request.id.clone());

        reg.session_permissions
            .entry(request.session_id.clone())
            .or_default()
            .push(request.id.clone());
        reg.execution_permissions
            .insert(execution_id.to_owned(), request.id.clone());
        reg.permission_requests
            .insert(request.id.clone(), request.clone());
        self.emit(ExecutionEvent::PermissionRequested {
            request: request.clone(),
        });
        drop(reg);

        TraceEvent::PermissionRequested {
            session_id: request.session_id.clone(),
            permission_id: request.id.clone(),
            execution_id: execution_id.to_owned(),
        }
        .emit();

        Ok(request)
    }

    /// Resolve a pending permission. Grant moves the execution back to
    /// Running; denial fails it with "Permission denied".
    pub fn resolve_permission(&self, permission_id: &str, granted: bool) -> Result<PermissionRequest> {
        let mut reg = self.inner.lock();

        let request = reg
            .permission_requests
            .get(permission_id)
            .ok_or_else(|| Error::not_found("permission", permission_id))?;
        if request.is_resolved() {
            return Err(Error::IllegalTransition(format!(
                "permission {permission_id} already resolved"
            )));
        }
        let execution_id = request.execution_id.clone();

        // Validate the execution side before mutating anything.
        {
            let exec = reg.execution_mut(&execution_id)?;
            if exec.status != ExecutionStatus::AwaitingPermission {
                return Err(Error::IllegalTransition(format!(
                    "execution {execution_id} is {}, not awaiting permission",
                    exec.status
                )));
            }
        }

        let request = reg
            .permission_requests
            .get_mut(permission_id)
            .expect("checked above");
        request.resolved_time = Some(Utc::now());
        request.granted = Some(granted);
        let request = request.clone();

        let exec = reg
            .executions
            .get_mut(&execution_id)
            .expect("checked above");
        if granted {
            exec.status = ExecutionStatus::Running;
        } else {
            exec.status = ExecutionStatus::Error;
            exec.error = Some(ExecutionError::new("Permission denied"));
            finish(exec, None);
        }
        self.emit(ExecutionEvent::PermissionResolved {
            request: request.clone(),
        });
        drop(reg);

        TraceEvent::PermissionResolved {
            session_id: request.session_id.clone(),
            permission_id: permission_id.to_owned(),
            granted,
        }
        .emit();

        Ok(request)
    }

    // ── Previews ──────────────────────────────────────────────────────

    /// Link a registered preview to an execution (and to its permission,
    /// if one exists). Permitted in any state: attachment races
    /// completion in either order.
    pub fn associate_preview(&self, execution_id: &str, preview_id: &str) -> Result<ToolExecution> {
        let preview = self
            .previews
            .get(preview_id)
            .ok_or_else(|| Error::not_found("preview", preview_id))?;

        let mut reg = self.inner.lock();
        let exec = reg.execution_mut(execution_id)?;
        exec.preview_id = Some(preview_id.to_owned());
        let permission_id = exec.permission_id.clone();
        let execution = exec.clone();
        if let Some(pid) = permission_id {
            if let Some(request) = reg.permission_requests.get_mut(&pid) {
                request.preview_id = Some(preview_id.to_owned());
            }
        }
        self.emit(ExecutionEvent::PreviewGenerated {
            execution: execution.clone(),
            preview,
        });
        drop(reg);

        TraceEvent::PreviewAttached {
            session_id: execution.session_id.clone(),
            execution_id: execution_id.to_owned(),
            preview_id: preview_id.to_owned(),
        }
        .emit();

        Ok(execution)
    }

    // ── Reads ─────────────────────────────────────────────────────────

    pub fn get_execution(&self, id: &str) -> Option<ToolExecution> {
        self.inner.lock().executions.get(id).cloned()
    }

    pub fn executions_for_session(&self, session_id: &str) -> Vec<ToolExecution> {
        let reg = self.inner.lock();
        reg.session_executions
            .get(session_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| reg.executions.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_permission_request(&self, id: &str) -> Option<PermissionRequest> {
        self.inner.lock().permission_requests.get(id).cloned()
    }

    pub fn permissions_for_session(&self, session_id: &str) -> Vec<PermissionRequest> {
        let reg = self.inner.lock();
        reg.session_permissions
            .get(session_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| reg.permission_requests.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Latest permission for an execution, resolved or not.
    pub fn permission_for_execution(&self, execution_id: &str) -> Option<PermissionRequest> {
        let reg = self.inner.lock();
        let id = reg.execution_permissions.get(execution_id)?;
        reg.permission_requests.get(id).cloned()
    }

    fn trace_finished(&self, execution: &ToolExecution) {
        TraceEvent::ExecutionFinished {
            session_id: execution.session_id.clone(),
            execution_id: execution.id.clone(),
            status: execution.status.to_string(),
            execution_time_ms: execution.execution_time_ms,
        }
        .emit();
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
