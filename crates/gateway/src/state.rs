use std::sync::Arc;

use weft_domain::config::Config;
use weft_executions::ToolExecutionManager;
use weft_timeline::TimelineService;

use crate::bridge::GatewayBridge;
use crate::rooms::RoomRegistry;
use crate::sessions::SessionRegistry;

/// Shared application state passed to all API handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Gateway-owned session registry (the agent side of the bridge).
    pub sessions: Arc<SessionRegistry>,
    /// Tool execution manager.
    pub executions: Arc<ToolExecutionManager>,
    /// The timeline service (ingest + read path).
    pub timeline: Arc<TimelineService>,
    /// Session rooms for WS fan-out.
    pub rooms: Arc<RoomRegistry>,
    /// Live agent bridge (session lookups, agent-event publishing).
    pub bridge: Arc<GatewayBridge>,
}
