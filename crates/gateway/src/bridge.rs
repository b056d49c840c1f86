//! Live agent-bridge implementation.
//!
//! Adapts the gateway's session registry and the execution manager into
//! the read-only view the timeline service consumes, and carries the
//! agent-event channel an embedded agent runner publishes onto.

use std::sync::Arc;

use tokio::sync::broadcast;

use weft_domain::{PermissionRequest, StoredMessage, ToolExecution};
use weft_executions::ToolExecutionManager;
use weft_timeline::bridge::{AgentBridge, AgentEvent, AgentSession};

use crate::sessions::SessionRegistry;

const AGENT_EVENT_CAPACITY: usize = 256;

pub struct GatewayBridge {
    sessions: Arc<SessionRegistry>,
    executions: Arc<ToolExecutionManager>,
    agent_events: broadcast::Sender<AgentEvent>,
}

impl GatewayBridge {
    pub fn new(sessions: Arc<SessionRegistry>, executions: Arc<ToolExecutionManager>) -> Self {
        let (agent_events, _) = broadcast::channel(AGENT_EVENT_CAPACITY);
        Self {
            sessions,
            executions,
            agent_events,
        }
    }

    /// Sender half for an embedded agent runner: publish `MessageAdded` /
    /// `MessageUpdated` here and the timeline service picks them up.
    pub fn agent_events(&self) -> broadcast::Sender<AgentEvent> {
        self.agent_events.clone()
    }

    /// Record agent-visible conversation state for a session.
    pub fn record_message(&self, session_id: &str, message: StoredMessage) {
        self.sessions.record_message(session_id, message);
    }
}

impl AgentBridge for GatewayBridge {
    fn get_session(&self, session_id: &str) -> Option<AgentSession> {
        let entry = self.sessions.get(session_id)?;
        Some(AgentSession {
            id: entry.id,
            created_at: entry.created_at,
            conversation_history: self.sessions.history(session_id),
        })
    }

    fn get_tool_execution(&self, execution_id: &str) -> Option<ToolExecution> {
        self.executions.get_execution(execution_id)
    }

    fn get_permission_requests(&self, session_id: &str) -> Vec<PermissionRequest> {
        self.executions.permissions_for_session(session_id)
    }

    fn subscribe_agent_events(&self) -> broadcast::Receiver<AgentEvent> {
        self.agent_events.subscribe()
    }
}
