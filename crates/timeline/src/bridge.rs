//! Read-only adapter onto the agent layer.
//!
//! The timeline service never owns agent state; it pulls conversation
//! history, live executions, and pending permissions through this bridge
//! when replay or enrichment needs them, and it subscribes to the agent's
//! message events here. Flow is strictly agent → timeline: nothing the
//! service does publishes back onto the agent bus.

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use weft_domain::{PermissionRequest, StoredMessage, ToolExecution};

/// Message events observed from the agent layer.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    MessageAdded {
        session_id: String,
        message: StoredMessage,
    },
    /// Carries the full replacement message; consumers broadcast the new
    /// content rather than a delta.
    MessageUpdated {
        session_id: String,
        message: StoredMessage,
    },
}

impl AgentEvent {
    pub fn session_id(&self) -> &str {
        match self {
            AgentEvent::MessageAdded { session_id, .. }
            | AgentEvent::MessageUpdated { session_id, .. } => session_id,
        }
    }
}

/// Agent-side view of a session.
#[derive(Debug, Clone)]
pub struct AgentSession {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub conversation_history: Vec<StoredMessage>,
}

/// Injected adapter giving the timeline service read access to
/// agent-owned state.
pub trait AgentBridge: Send + Sync {
    fn get_session(&self, session_id: &str) -> Option<AgentSession>;

    /// Live view of an execution (the manager's current record).
    fn get_tool_execution(&self, execution_id: &str) -> Option<ToolExecution>;

    fn get_permission_requests(&self, session_id: &str) -> Vec<PermissionRequest>;

    /// Subscribe to `MessageAdded` / `MessageUpdated`. Dropping the
    /// receiver unsubscribes.
    fn subscribe_agent_events(&self) -> broadcast::Receiver<AgentEvent>;
}
