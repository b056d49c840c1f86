//! The timeline service.
//!
//! An event transformer with no persistent state of its own: it ingests
//! execution lifecycle events and agent messages, debounces repeated
//! updates, links tool activity to parent messages, persists through the
//! store, and rebroadcasts canonical wire events to the session room. The
//! read path serves paginated, canonically-ordered pages.
//!
//! Flow is one-directional: agent → timeline → clients. Handlers here
//! record and broadcast to rooms but never publish back onto the agent
//! bus, and the per-session guard is always released before a broadcast
//! goes out.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use weft_domain::config::TimelineConfig;
use weft_domain::timeline::{MessageItem, PermissionItem, ToolExecutionItem};
use weft_domain::trace::TraceEvent;
use weft_domain::{
    ItemKind, MessageRole, PermissionRequest, Preview, Result, StoredMessage, TimelineItem,
    ToolExecution,
};
use weft_executions::{ExecutionEvent, ToolExecutionManager};

use crate::bridge::{AgentBridge, AgentEvent};
use crate::debounce::DebounceCoordinator;
use crate::ordering::sort_timeline_items;
use crate::session_guard::SessionGuards;
use crate::store::TimelineStore;
use crate::wire::{Broadcaster, ClientEvent, ExecutionPayload, ExecutionUpdatePayload, WirePreview};

const LOCAL_EVENT_CAPACITY: usize = 256;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Local event stream, queries
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-process notifications for embedded consumers.
#[derive(Debug, Clone)]
pub enum TimelineEvent {
    ItemAdded(TimelineItem),
    ItemUpdated(TimelineItem),
}

/// Parameters of a timeline read.
#[derive(Debug, Clone)]
pub struct TimelineQuery {
    /// Page size; `None` falls back to the configured default.
    pub limit: Option<usize>,
    /// Opaque cursor from a previous page (a numeric offset).
    pub page_token: Option<String>,
    /// Restrict to these item kinds.
    pub types: Option<Vec<ItemKind>>,
    /// Resolve and embed previews (default) or strip them.
    pub include_related: bool,
}

impl Default for TimelineQuery {
    fn default() -> Self {
        Self {
            limit: None,
            page_token: None,
            types: None,
            include_related: true,
        }
    }
}

/// One page of timeline items.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelinePage {
    pub items: Vec<TimelineItem>,
    pub total_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Service
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TimelineService {
    store: Arc<TimelineStore>,
    executions: Arc<ToolExecutionManager>,
    broadcaster: Arc<dyn Broadcaster>,
    bridge: Arc<dyn AgentBridge>,
    execution_debounce: DebounceCoordinator,
    permission_debounce: DebounceCoordinator,
    guards: SessionGuards,
    local_events: broadcast::Sender<TimelineEvent>,
    config: TimelineConfig,
}

impl TimelineService {
    pub fn new(
        store: Arc<TimelineStore>,
        executions: Arc<ToolExecutionManager>,
        broadcaster: Arc<dyn Broadcaster>,
        bridge: Arc<dyn AgentBridge>,
        config: TimelineConfig,
    ) -> Arc<Self> {
        let (local_events, _) = broadcast::channel(LOCAL_EVENT_CAPACITY);
        Arc::new(Self {
            store,
            executions,
            broadcaster,
            bridge,
            execution_debounce: DebounceCoordinator::new(
                Duration::from_millis(config.execution_debounce_ms),
                Duration::from_millis(config.execution_debounce_ttl_ms),
            ),
            permission_debounce: DebounceCoordinator::new(
                Duration::from_millis(config.permission_debounce_ms),
                Duration::from_millis(config.permission_debounce_ttl_ms),
            ),
            guards: SessionGuards::new(),
            local_events,
            config,
        })
    }

    /// Spawn the subscriber loops: execution lifecycle events from the
    /// manager and message events from the agent bridge. The loops exit
    /// when their senders drop.
    pub fn run(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        let svc = Arc::clone(self);
        let mut executions_rx = svc.executions.subscribe();
        handles.push(tokio::spawn(async move {
            loop {
                match executions_rx.recv().await {
                    Ok(event) => svc.handle_execution_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "execution event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        let svc = Arc::clone(self);
        let mut agent_rx = svc.bridge.subscribe_agent_events();
        handles.push(tokio::spawn(async move {
            loop {
                match agent_rx.recv().await {
                    Ok(event) => svc.handle_agent_event(event).await,
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "agent event stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }));

        handles
    }

    /// Subscribe to the local `ItemAdded`/`ItemUpdated` stream.
    pub fn subscribe(&self) -> broadcast::Receiver<TimelineEvent> {
        self.local_events.subscribe()
    }

    // ── Message ingest ────────────────────────────────────────────────

    /// Record and broadcast a client-originated message. This is the
    /// public entrypoint used by request handlers.
    pub async fn add_message_to_timeline(
        &self,
        session_id: &str,
        message: StoredMessage,
    ) -> Result<TimelineItem> {
        self.ingest_message(session_id, message).await
    }

    /// Agent-bus variant: records and broadcasts to the session room like
    /// the public entrypoint, but exists so reactions to agent events
    /// never echo back onto the agent bus.
    async fn add_message_internal(
        &self,
        session_id: &str,
        message: StoredMessage,
    ) -> Result<TimelineItem> {
        self.ingest_message(session_id, message).await
    }

    async fn ingest_message(
        &self,
        session_id: &str,
        mut message: StoredMessage,
    ) -> Result<TimelineItem> {
        message.session_id = session_id.to_owned();

        let guard = self.guards.acquire(session_id).await;
        let items = self.store.load(session_id)?;
        if message.sequence.is_none() {
            message.sequence = Some(next_sequence(&items, message.role));
        }
        let existed = items
            .iter()
            .filter_map(|i| i.as_message())
            .any(|m| m.id == message.id);
        let item = TimelineItem::Message(MessageItem {
            id: message.id.clone(),
            session_id: session_id.to_owned(),
            timestamp: message.timestamp,
            tool_executions: message.execution_ids(),
            message: message.clone(),
        });
        self.store.append_or_replace(session_id, &item)?;
        drop(guard);

        self.emit_local(existed, item.clone());
        self.broadcaster
            .emit(
                session_id,
                ClientEvent::MessageReceived {
                    session_id: session_id.to_owned(),
                    message,
                },
            )
            .await;
        Ok(item)
    }

    /// Replace a message in place and announce the new content.
    async fn update_message(&self, session_id: &str, mut message: StoredMessage) -> Result<()> {
        message.session_id = session_id.to_owned();

        let guard = self.guards.acquire(session_id).await;
        let items = self.store.load(session_id)?;
        if message.sequence.is_none() {
            // Keep the original's placement when the update drops it.
            message.sequence = items
                .iter()
                .filter_map(|i| i.as_message())
                .find(|m| m.id == message.id)
                .and_then(|m| m.message.sequence)
                .or_else(|| Some(next_sequence(&items, message.role)));
        }
        let item = TimelineItem::Message(MessageItem {
            id: message.id.clone(),
            session_id: session_id.to_owned(),
            timestamp: message.timestamp,
            tool_executions: message.execution_ids(),
            message: message.clone(),
        });
        self.store.append_or_replace(session_id, &item)?;
        drop(guard);

        self.emit_local(true, item);
        self.broadcaster
            .emit(
                session_id,
                ClientEvent::MessageUpdated {
                    session_id: session_id.to_owned(),
                    message_id: message.id.clone(),
                    content: message.content.clone(),
                    is_complete: true,
                },
            )
            .await;
        Ok(())
    }

    // ── Event handlers ────────────────────────────────────────────────

    /// Entry for agent message events. Failures are logged and swallowed;
    /// the stream must keep draining.
    pub async fn handle_agent_event(&self, event: AgentEvent) {
        let session_id = event.session_id().to_owned();
        let result = match event {
            AgentEvent::MessageAdded {
                session_id,
                message,
            } => self
                .add_message_internal(&session_id, message)
                .await
                .map(|_| ()),
            AgentEvent::MessageUpdated {
                session_id,
                message,
            } => self.update_message(&session_id, message).await,
        };
        if let Err(e) = result {
            tracing::error!(
                session_id = %session_id,
                error = %e,
                "agent event handling failed"
            );
        }
    }

    /// Entry for execution lifecycle events. Failures are logged with
    /// their correlation ids and swallowed.
    pub async fn handle_execution_event(&self, event: ExecutionEvent) {
        let session_id = event.session_id().to_owned();
        let kind = event.kind();
        let result = match event {
            ExecutionEvent::Created { execution }
            | ExecutionEvent::Updated { execution }
            | ExecutionEvent::Failed { execution }
            | ExecutionEvent::Aborted { execution } => {
                self.ingest_execution(execution, None).await.map(|_| ())
            }
            ExecutionEvent::Completed { execution, preview } => {
                self.ingest_execution(execution, preview).await.map(|_| ())
            }
            ExecutionEvent::PermissionRequested { request }
            | ExecutionEvent::PermissionResolved { request } => {
                self.ingest_permission(request).await
            }
            ExecutionEvent::PreviewGenerated { execution, preview } => {
                self.attach_preview(execution, preview).await
            }
        };
        if let Err(e) = result {
            tracing::error!(
                session_id = %session_id,
                event = kind,
                error = %e,
                "execution event handling failed"
            );
        }
    }

    // ── Tool execution ingest ─────────────────────────────────────────

    /// Persist and broadcast one execution update, behind the per-second
    /// circuit breaker that absorbs the same change arriving through
    /// multiple channels.
    async fn ingest_execution(
        &self,
        execution: ToolExecution,
        event_preview: Option<Preview>,
    ) -> Result<TimelineItem> {
        let now = Utc::now();
        let debounce_key = format!("{}:{}", execution.id, now.timestamp());
        if !self.execution_debounce.should_process(&debounce_key) {
            tracing::warn!(
                session_id = %execution.session_id,
                execution_id = %execution.id,
                "dropping repeated execution update"
            );
            TraceEvent::UpdateDebounced {
                session_id: execution.session_id.clone(),
                key: debounce_key,
            }
            .emit();
            // Lightweight view for the caller; nothing persisted or broadcast.
            return Ok(TimelineItem::ToolExecution(ToolExecutionItem {
                id: execution.id.clone(),
                session_id: execution.session_id.clone(),
                timestamp: now,
                execution,
                parent_message_id: None,
                preview: None,
            }));
        }

        let session_id = execution.session_id.clone();
        let guard = self.guards.acquire(&session_id).await;
        let items = self.store.load(&session_id)?;
        let existing = items
            .iter()
            .filter_map(|i| i.as_tool_execution())
            .find(|t| t.id == execution.id)
            .cloned();
        let parent_message_id = find_parent_message(&items, &execution.id)
            .or_else(|| existing.as_ref().and_then(|t| t.parent_message_id.clone()));
        // The event's preview wins; fall back to the registry, then to
        // whatever an earlier upsert already attached.
        let preview = event_preview
            .or_else(|| self.executions.previews().for_execution(&execution.id))
            .or_else(|| existing.as_ref().and_then(|t| t.preview.clone()));
        let timestamp = if execution.status.is_terminal() {
            execution.end_time.unwrap_or(now)
        } else {
            now
        };
        let item = TimelineItem::ToolExecution(ToolExecutionItem {
            id: execution.id.clone(),
            session_id: session_id.clone(),
            timestamp,
            execution: execution.clone(),
            parent_message_id,
            preview: preview.clone(),
        });
        self.store.append_or_replace(&session_id, &item)?;
        drop(guard);

        self.emit_local(existing.is_some(), item.clone());
        let event = if execution.status.is_terminal() {
            ClientEvent::ToolExecutionUpdated {
                session_id: session_id.clone(),
                tool_execution: ExecutionUpdatePayload::new(&execution, preview.as_ref()),
            }
        } else {
            ClientEvent::ToolExecutionReceived {
                session_id: session_id.clone(),
                tool_execution: ExecutionPayload {
                    execution,
                    preview: preview.as_ref().map(WirePreview::from),
                },
            }
        };
        self.broadcaster.emit(&session_id, event).await;
        Ok(item)
    }

    // ── Permission ingest ─────────────────────────────────────────────

    /// Upsert the permission item (requested and resolved share a key),
    /// then re-ingest the gating execution, whose state changed with it.
    async fn ingest_permission(&self, request: PermissionRequest) -> Result<()> {
        // Key includes the phase so a prompt resolve is not mistaken for
        // a duplicate of the request event.
        let phase = if request.is_resolved() {
            "resolved"
        } else {
            "requested"
        };
        let debounce_key = format!("{}:{phase}", request.id);
        if !self.permission_debounce.should_process(&debounce_key) {
            tracing::warn!(
                session_id = %request.session_id,
                permission_id = %request.id,
                "dropping repeated permission update"
            );
            TraceEvent::UpdateDebounced {
                session_id: request.session_id.clone(),
                key: debounce_key,
            }
            .emit();
            return Ok(());
        }

        let session_id = request.session_id.clone();
        let guard = self.guards.acquire(&session_id).await;
        let items = self.store.load(&session_id)?;
        let existed = items
            .iter()
            .filter_map(|i| i.as_permission())
            .any(|p| p.id == request.id);
        let preview = request
            .preview_id
            .as_deref()
            .and_then(|pid| self.executions.previews().get(pid));
        let item = TimelineItem::PermissionRequest(PermissionItem {
            id: request.id.clone(),
            session_id: session_id.clone(),
            // request_time across both upserts keeps the item ahead of the
            // execution's post-grant update when siblings sort by time.
            timestamp: request.request_time,
            request: request.clone(),
            preview: preview.clone(),
        });
        self.store.append_or_replace(&session_id, &item)?;
        drop(guard);

        self.emit_local(existed, item);
        self.broadcaster
            .emit(
                &session_id,
                ClientEvent::PermissionRequestReceived {
                    session_id: session_id.clone(),
                    permission_request: request.clone(),
                    preview: preview.as_ref().map(WirePreview::from),
                },
            )
            .await;

        // The gating execution changed state alongside the permission;
        // pull the live record and run it through the execution path,
        // which carries its own debounce.
        if let Some(execution) = self.bridge.get_tool_execution(&request.execution_id) {
            self.ingest_execution(execution, None).await?;
        }
        Ok(())
    }

    // ── Preview attachment ────────────────────────────────────────────

    /// Patch the persisted item when a preview lands after the execution
    /// update went out. Bypasses the circuit breaker: this is the repair
    /// path for exactly that race.
    async fn attach_preview(&self, execution: ToolExecution, preview: Preview) -> Result<()> {
        let session_id = execution.session_id.clone();
        let guard = self.guards.acquire(&session_id).await;
        let items = self.store.load(&session_id)?;
        let existing = items
            .iter()
            .filter_map(|i| i.as_tool_execution())
            .find(|t| t.id == execution.id)
            .cloned();
        let item = match existing {
            Some(mut t) => {
                t.execution = execution.clone();
                t.preview = Some(preview.clone());
                TimelineItem::ToolExecution(t)
            }
            None => {
                // Preview won the race against any persisted update.
                let parent_message_id = find_parent_message(&items, &execution.id);
                TimelineItem::ToolExecution(ToolExecutionItem {
                    id: execution.id.clone(),
                    session_id: session_id.clone(),
                    timestamp: execution.end_time.unwrap_or_else(Utc::now),
                    execution: execution.clone(),
                    parent_message_id,
                    preview: Some(preview.clone()),
                })
            }
        };
        self.store.append_or_replace(&session_id, &item)?;
        drop(guard);

        let _ = self.local_events.send(TimelineEvent::ItemUpdated(item));
        self.broadcaster
            .emit(
                &session_id,
                ClientEvent::ToolExecutionUpdated {
                    session_id: session_id.clone(),
                    tool_execution: ExecutionUpdatePayload::new(&execution, Some(&preview)),
                },
            )
            .await;
        Ok(())
    }

    // ── Read path ─────────────────────────────────────────────────────

    /// Load, order, filter, and paginate a session's timeline. The store
    /// is the source of truth; nothing is cached here.
    pub fn get_timeline_items(
        &self,
        session_id: &str,
        query: &TimelineQuery,
    ) -> Result<TimelinePage> {
        let items = self.store.load(session_id)?;

        let has_user = items
            .iter()
            .filter_map(|i| i.as_message())
            .any(|m| m.message.role == MessageRole::User);
        let has_assistant = items
            .iter()
            .filter_map(|i| i.as_message())
            .any(|m| m.message.role == MessageRole::Assistant);
        if has_assistant && !has_user {
            tracing::warn!(
                session_id,
                "timeline has assistant messages but no user messages"
            );
        }

        let sorted = sort_timeline_items(items);
        let mut filtered: Vec<TimelineItem> = match &query.types {
            Some(types) => sorted
                .into_iter()
                .filter(|i| types.contains(&i.kind()))
                .collect(),
            None => sorted,
        };

        for item in &mut filtered {
            self.resolve_related(item, query.include_related);
        }

        let total_count = filtered.len();
        let start = query
            .page_token
            .as_deref()
            .and_then(|t| t.parse::<usize>().ok())
            .unwrap_or(0)
            .min(total_count);
        let limit = query.limit.unwrap_or(self.config.default_page_size);
        let end = start.saturating_add(limit).min(total_count);
        let next_page_token = if start + limit < total_count {
            Some((start + limit).to_string())
        } else {
            None
        };

        Ok(TimelinePage {
            items: filtered[start..end].to_vec(),
            total_count,
            next_page_token,
        })
    }

    /// Embed the latest preview (or strip it, for `includeRelated=false`).
    fn resolve_related(&self, item: &mut TimelineItem, include: bool) {
        match item {
            TimelineItem::ToolExecution(t) => {
                if include {
                    if t.preview.is_none() {
                        t.preview = self.executions.previews().for_execution(&t.id);
                    }
                } else {
                    t.preview = None;
                }
            }
            TimelineItem::PermissionRequest(p) => {
                if include {
                    if p.preview.is_none() {
                        p.preview = p
                            .request
                            .preview_id
                            .as_deref()
                            .and_then(|pid| self.executions.previews().get(pid));
                    }
                } else {
                    p.preview = None;
                }
            }
            TimelineItem::Message(_) => {}
        }
    }

    fn emit_local(&self, existed: bool, item: TimelineItem) {
        let event = if existed {
            TimelineEvent::ItemUpdated(item)
        } else {
            TimelineEvent::ItemAdded(item)
        };
        let _ = self.local_events.send(event);
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Next free sequence of the right parity, above every assigned sequence.
fn next_sequence(items: &[TimelineItem], role: MessageRole) -> i64 {
    let max = items
        .iter()
        .filter_map(|i| i.as_message())
        .filter_map(|m| m.message.sequence)
        .max();
    match max {
        None => role.sequence_parity(),
        Some(max) => {
            let mut next = max + 1;
            if next % 2 != role.sequence_parity() {
                next += 1;
            }
            next
        }
    }
}

/// The message whose tool calls reference this execution.
fn find_parent_message(items: &[TimelineItem], execution_id: &str) -> Option<String> {
    items
        .iter()
        .filter_map(|i| i.as_message())
        .find(|m| {
            m.tool_executions.iter().any(|e| e == execution_id)
                || m.message
                    .tool_calls
                    .iter()
                    .any(|tc| tc.execution_id == execution_id)
        })
        .map(|m| m.id.clone())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    use weft_domain::{ExecutionStatus, PreviewContentType, ToolCallRef};
    use weft_executions::PreviewRegistry;

    use crate::bridge::AgentSession;

    // ── Stubs ─────────────────────────────────────────────────────────

    struct RecordingBroadcaster {
        events: Mutex<Vec<ClientEvent>>,
    }

    impl RecordingBroadcaster {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn names(&self) -> Vec<&'static str> {
            self.events.lock().iter().map(|e| e.name()).collect()
        }

        fn count(&self, name: &str) -> usize {
            self.events.lock().iter().filter(|e| e.name() == name).count()
        }

        fn snapshot(&self) -> Vec<ClientEvent> {
            self.events.lock().clone()
        }
    }

    #[async_trait]
    impl Broadcaster for RecordingBroadcaster {
        async fn emit(&self, _session_id: &str, event: ClientEvent) {
            self.events.lock().push(event);
        }
    }

    struct TestBridge {
        executions: Arc<ToolExecutionManager>,
        agent_events: broadcast::Sender<AgentEvent>,
    }

    impl AgentBridge for TestBridge {
        fn get_session(&self, _session_id: &str) -> Option<AgentSession> {
            None
        }

        fn get_tool_execution(&self, execution_id: &str) -> Option<ToolExecution> {
            self.executions.get_execution(execution_id)
        }

        fn get_permission_requests(&self, _session_id: &str) -> Vec<PermissionRequest> {
            Vec::new()
        }

        fn subscribe_agent_events(&self) -> broadcast::Receiver<AgentEvent> {
            self.agent_events.subscribe()
        }
    }

    struct Harness {
        _dir: tempfile::TempDir,
        service: Arc<TimelineService>,
        executions: Arc<ToolExecutionManager>,
        broadcaster: Arc<RecordingBroadcaster>,
        agent_tx: broadcast::Sender<AgentEvent>,
    }

    fn harness_with(config: TimelineConfig) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(TimelineStore::new(dir.path()).unwrap());
        let executions = Arc::new(ToolExecutionManager::new(Arc::new(PreviewRegistry::new())));
        let broadcaster = RecordingBroadcaster::new();
        let (agent_tx, _) = broadcast::channel(64);
        let bridge = Arc::new(TestBridge {
            executions: executions.clone(),
            agent_events: agent_tx.clone(),
        });
        let service = TimelineService::new(
            store,
            executions.clone(),
            broadcaster.clone(),
            bridge,
            config,
        );
        Harness {
            _dir: dir,
            service,
            executions,
            broadcaster,
            agent_tx,
        }
    }

    fn harness() -> Harness {
        harness_with(TimelineConfig::default())
    }

    /// Windows of zero let flow tests drive several updates for one
    /// entity without waiting out the breaker.
    fn no_debounce() -> TimelineConfig {
        TimelineConfig {
            execution_debounce_ms: 0,
            permission_debounce_ms: 0,
            ..TimelineConfig::default()
        }
    }

    fn message(
        id: &str,
        role: MessageRole,
        sequence: Option<i64>,
        executions: &[&str],
    ) -> StoredMessage {
        StoredMessage {
            id: id.into(),
            session_id: "s1".into(),
            role,
            timestamp: Utc::now(),
            content: serde_json::json!([{ "type": "text", "text": "hi" }]),
            sequence,
            tool_calls: executions
                .iter()
                .enumerate()
                .map(|(i, e)| ToolCallRef {
                    execution_id: e.to_string(),
                    tool_name: "bash".into(),
                    index: i as u32,
                    is_batched: None,
                })
                .collect(),
            parent_message_id: None,
        }
    }

    fn make_preview(id: &str, execution_id: &str) -> Preview {
        Preview {
            id: id.into(),
            session_id: "s1".into(),
            execution_id: execution_id.into(),
            permission_id: None,
            content_type: PreviewContentType::Text,
            brief_content: "a\nb\n".into(),
            full_content: None,
            metadata: None,
        }
    }

    fn page_ids(page: &TimelinePage) -> Vec<String> {
        page.items.iter().map(|i| i.id().to_owned()).collect()
    }

    // ── Message ingest ────────────────────────────────────────────────

    #[tokio::test]
    async fn first_user_message_gets_sequence_zero() {
        let h = harness();
        let mut local = h.service.subscribe();

        let item = h
            .service
            .add_message_to_timeline("s1", message("m1", MessageRole::User, None, &[]))
            .await
            .unwrap();

        assert_eq!(item.as_message().unwrap().message.sequence, Some(0));
        assert_eq!(h.broadcaster.names(), vec!["message_received"]);
        assert!(matches!(
            local.try_recv().unwrap(),
            TimelineEvent::ItemAdded(_)
        ));
    }

    #[tokio::test]
    async fn sequences_continue_past_the_global_max() {
        let h = harness();
        for (id, role, seq) in [
            ("m0", MessageRole::User, 0),
            ("m1", MessageRole::Assistant, 1),
            ("m2", MessageRole::User, 2),
        ] {
            h.service
                .add_message_to_timeline("s1", message(id, role, Some(seq), &[]))
                .await
                .unwrap();
        }

        let user = h
            .service
            .add_message_to_timeline("s1", message("m4", MessageRole::User, None, &[]))
            .await
            .unwrap();
        assert_eq!(user.as_message().unwrap().message.sequence, Some(4));

        let assistant = h
            .service
            .add_message_to_timeline("s1", message("m5", MessageRole::Assistant, None, &[]))
            .await
            .unwrap();
        assert_eq!(assistant.as_message().unwrap().message.sequence, Some(5));
    }

    #[tokio::test]
    async fn resubmitted_message_upserts() {
        let h = harness();
        let mut local = h.service.subscribe();

        h.service
            .add_message_to_timeline("s1", message("m1", MessageRole::User, Some(0), &[]))
            .await
            .unwrap();
        h.service
            .add_message_to_timeline("s1", message("m1", MessageRole::User, Some(0), &[]))
            .await
            .unwrap();

        let page = h
            .service
            .get_timeline_items("s1", &TimelineQuery::default())
            .unwrap();
        assert_eq!(page.total_count, 1);

        assert!(matches!(
            local.try_recv().unwrap(),
            TimelineEvent::ItemAdded(_)
        ));
        assert!(matches!(
            local.try_recv().unwrap(),
            TimelineEvent::ItemUpdated(_)
        ));
    }

    #[tokio::test]
    async fn message_updated_replaces_content_and_broadcasts() {
        let h = harness();
        h.service
            .add_message_to_timeline("s1", message("m1", MessageRole::User, Some(0), &[]))
            .await
            .unwrap();

        let mut updated = message("m1", MessageRole::User, Some(0), &[]);
        updated.content = serde_json::json!([{ "type": "text", "text": "edited" }]);
        h.service
            .handle_agent_event(AgentEvent::MessageUpdated {
                session_id: "s1".into(),
                message: updated,
            })
            .await;

        assert_eq!(
            h.broadcaster.names(),
            vec!["message_received", "message_updated"]
        );
        match h.broadcaster.snapshot().pop().unwrap() {
            ClientEvent::MessageUpdated {
                message_id,
                content,
                is_complete,
                ..
            } => {
                assert_eq!(message_id, "m1");
                assert_eq!(content[0]["text"], "edited");
                assert!(is_complete);
            }
            other => panic!("expected message_updated, got {}", other.name()),
        }

        let page = h
            .service
            .get_timeline_items("s1", &TimelineQuery::default())
            .unwrap();
        let item = page.items[0].as_message().unwrap();
        assert_eq!(item.message.content[0]["text"], "edited");
    }

    // ── Execution ingest ──────────────────────────────────────────────

    #[tokio::test]
    async fn running_execution_links_parent_and_broadcasts_received() {
        let h = harness_with(no_debounce());
        let exec = h
            .executions
            .create_execution("s1", "bash", "bash", "tu1", serde_json::json!({"cmd": "ls"}));

        h.service
            .add_message_to_timeline("s1", message("m1", MessageRole::User, Some(0), &[]))
            .await
            .unwrap();
        h.service
            .add_message_to_timeline(
                "s1",
                message("m2", MessageRole::Assistant, Some(1), &[&exec.id]),
            )
            .await
            .unwrap();

        let started = h.executions.start_execution(&exec.id).unwrap();
        h.service
            .handle_execution_event(ExecutionEvent::Updated { execution: started })
            .await;

        assert_eq!(h.broadcaster.count("tool_execution_received"), 1);
        let page = h
            .service
            .get_timeline_items("s1", &TimelineQuery::default())
            .unwrap();
        assert_eq!(page_ids(&page), vec!["m1", "m2", exec.id.as_str()]);
        let tool = page.items[2].as_tool_execution().unwrap();
        assert_eq!(tool.parent_message_id.as_deref(), Some("m2"));
        assert_eq!(tool.execution.status, ExecutionStatus::Running);
    }

    #[tokio::test]
    async fn terminal_execution_broadcasts_updated_with_preview_flags() {
        let h = harness();
        let exec = h
            .executions
            .create_execution("s1", "bash", "bash", "tu1", serde_json::json!({}));
        h.executions.start_execution(&exec.id).unwrap();
        let done = h
            .executions
            .complete_execution(&exec.id, serde_json::json!("ok"), Some(42))
            .unwrap();

        h.service
            .handle_execution_event(ExecutionEvent::Completed {
                execution: done,
                preview: None,
            })
            .await;

        match h.broadcaster.snapshot().pop().unwrap() {
            ClientEvent::ToolExecutionUpdated { tool_execution, .. } => {
                assert_eq!(tool_execution.status, ExecutionStatus::Completed);
                assert_eq!(tool_execution.execution_time, Some(42));
                assert!(!tool_execution.has_preview);
                assert!(tool_execution.preview.is_none());
            }
            other => panic!("expected tool_execution_updated, got {}", other.name()),
        }
    }

    #[tokio::test]
    async fn circuit_breaker_drops_rapid_repeats() {
        let h = harness();
        let exec = h
            .executions
            .create_execution("s1", "bash", "bash", "tu1", serde_json::json!({}));
        h.executions.start_execution(&exec.id).unwrap();
        let done = h
            .executions
            .complete_execution(&exec.id, serde_json::json!("ok"), Some(5))
            .unwrap();

        let before = Utc::now().timestamp();
        for _ in 0..5 {
            h.service
                .handle_execution_event(ExecutionEvent::Completed {
                    execution: done.clone(),
                    preview: None,
                })
                .await;
        }
        let after = Utc::now().timestamp();

        let updates = h.broadcaster.count("tool_execution_updated");
        if before == after {
            assert_eq!(updates, 1);
        } else {
            // The burst straddled a second boundary; at most one per bucket.
            assert!((1..=2).contains(&updates));
        }
    }

    // ── Preview attachment race ───────────────────────────────────────

    #[tokio::test]
    async fn late_preview_patches_the_persisted_item() {
        let h = harness();
        let exec = h
            .executions
            .create_execution("s1", "bash", "bash", "tu1", serde_json::json!({"cmd": "ls"}));

        h.service
            .add_message_to_timeline("s1", message("m1", MessageRole::User, Some(0), &[]))
            .await
            .unwrap();
        h.service
            .add_message_to_timeline(
                "s1",
                message("m2", MessageRole::Assistant, Some(1), &[&exec.id]),
            )
            .await
            .unwrap();

        h.executions.start_execution(&exec.id).unwrap();
        let done = h
            .executions
            .complete_execution(&exec.id, serde_json::json!("a\nb\n"), Some(42))
            .unwrap();
        h.service
            .handle_execution_event(ExecutionEvent::Completed {
                execution: done,
                preview: None,
            })
            .await;

        // The preview lands 200 ms later through its own event.
        h.executions.previews().insert(make_preview("p1", &exec.id));
        let with_preview = h.executions.associate_preview(&exec.id, "p1").unwrap();
        h.service
            .handle_execution_event(ExecutionEvent::PreviewGenerated {
                execution: with_preview,
                preview: make_preview("p1", &exec.id),
            })
            .await;

        // Two terminal broadcasts: first bare, then with the preview.
        let updates: Vec<_> = h
            .broadcaster
            .snapshot()
            .into_iter()
            .filter_map(|e| match e {
                ClientEvent::ToolExecutionUpdated { tool_execution, .. } => Some(tool_execution),
                _ => None,
            })
            .collect();
        assert_eq!(updates.len(), 2);
        assert!(!updates[0].has_preview);
        assert!(updates[1].has_preview);
        assert_eq!(
            updates[1].preview.as_ref().unwrap().brief_content,
            "a\nb\n"
        );

        let page = h
            .service
            .get_timeline_items("s1", &TimelineQuery::default())
            .unwrap();
        assert_eq!(page_ids(&page), vec!["m1", "m2", exec.id.as_str()]);
        let tool = page.items[2].as_tool_execution().unwrap();
        assert_eq!(tool.parent_message_id.as_deref(), Some("m2"));
        assert_eq!(tool.preview.as_ref().unwrap().brief_content, "a\nb\n");
    }

    #[tokio::test]
    async fn read_path_resolves_previews_registered_after_persist() {
        let h = harness();
        let exec = h
            .executions
            .create_execution("s1", "bash", "bash", "tu1", serde_json::json!({}));
        h.executions.start_execution(&exec.id).unwrap();
        let done = h
            .executions
            .complete_execution(&exec.id, serde_json::json!("ok"), None)
            .unwrap();
        h.service
            .handle_execution_event(ExecutionEvent::Completed {
                execution: done,
                preview: None,
            })
            .await;

        // Registered but never announced via an event.
        h.executions.previews().insert(make_preview("p1", &exec.id));

        let with_related = h
            .service
            .get_timeline_items("s1", &TimelineQuery::default())
            .unwrap();
        assert!(with_related.items[0]
            .as_tool_execution()
            .unwrap()
            .preview
            .is_some());

        let without = h
            .service
            .get_timeline_items(
                "s1",
                &TimelineQuery {
                    include_related: false,
                    ..TimelineQuery::default()
                },
            )
            .unwrap();
        assert!(without.items[0]
            .as_tool_execution()
            .unwrap()
            .preview
            .is_none());
    }

    // ── Permission flow ───────────────────────────────────────────────

    #[tokio::test]
    async fn permission_roundtrip_upserts_item_and_reingests_execution() {
        let h = harness_with(no_debounce());
        let exec = h
            .executions
            .create_execution("s1", "bash", "bash", "tu1", serde_json::json!({}));
        h.service
            .add_message_to_timeline("s1", message("m1", MessageRole::User, Some(0), &[&exec.id]))
            .await
            .unwrap();

        let request = h
            .executions
            .request_permission(&exec.id, serde_json::json!({"cmd": "rm"}))
            .unwrap();
        h.service
            .handle_execution_event(ExecutionEvent::PermissionRequested {
                request: request.clone(),
            })
            .await;

        let resolved = h.executions.resolve_permission(&request.id, true).unwrap();
        h.service
            .handle_execution_event(ExecutionEvent::PermissionResolved { request: resolved })
            .await;

        assert_eq!(
            h.broadcaster.names(),
            vec![
                "message_received",
                "permission_request_received",
                "tool_execution_received",
                "permission_request_received",
                "tool_execution_received",
            ]
        );

        let page = h
            .service
            .get_timeline_items("s1", &TimelineQuery::default())
            .unwrap();
        assert_eq!(
            page_ids(&page),
            vec!["m1".to_owned(), request.id.clone(), exec.id.clone()]
        );
        let permission = page.items[1].as_permission().unwrap();
        assert_eq!(permission.request.granted, Some(true));
        assert!(permission.request.resolved_time.is_some());
        assert_eq!(
            page.items[2].as_tool_execution().unwrap().execution.status,
            ExecutionStatus::Running
        );
    }

    // ── Read path ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn empty_session_returns_empty_page() {
        let h = harness();
        let page = h
            .service
            .get_timeline_items("ghost", &TimelineQuery::default())
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_count, 0);
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn zero_limit_returns_empty_page_with_cursor() {
        let h = harness();
        h.service
            .add_message_to_timeline("s1", message("m1", MessageRole::User, Some(0), &[]))
            .await
            .unwrap();

        let page = h
            .service
            .get_timeline_items(
                "s1",
                &TimelineQuery {
                    limit: Some(0),
                    ..TimelineQuery::default()
                },
            )
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_count, 1);
        assert_eq!(page.next_page_token.as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn unknown_page_token_reads_from_the_start() {
        let h = harness();
        h.service
            .add_message_to_timeline("s1", message("m1", MessageRole::User, Some(0), &[]))
            .await
            .unwrap();

        let page = h
            .service
            .get_timeline_items(
                "s1",
                &TimelineQuery {
                    page_token: Some("not-a-number".into()),
                    ..TimelineQuery::default()
                },
            )
            .unwrap();
        assert_eq!(page_ids(&page), vec!["m1"]);
    }

    #[tokio::test]
    async fn types_filter_can_exclude_everything() {
        let h = harness();
        h.service
            .add_message_to_timeline("s1", message("m1", MessageRole::User, Some(0), &[]))
            .await
            .unwrap();

        let page = h
            .service
            .get_timeline_items(
                "s1",
                &TimelineQuery {
                    types: Some(vec![ItemKind::PermissionRequest]),
                    ..TimelineQuery::default()
                },
            )
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total_count, 0);
        assert!(page.next_page_token.is_none());
    }

    #[tokio::test]
    async fn paged_replay_reconstructs_the_full_timeline() {
        let h = harness_with(no_debounce());
        for (id, role, seq) in [
            ("m0", MessageRole::User, 0),
            ("m1", MessageRole::Assistant, 1),
            ("m2", MessageRole::User, 2),
            ("m3", MessageRole::Assistant, 3),
        ] {
            h.service
                .add_message_to_timeline("s1", message(id, role, Some(seq), &[]))
                .await
                .unwrap();
        }
        let exec = h
            .executions
            .create_execution("s1", "bash", "bash", "tu1", serde_json::json!({}));
        h.service
            .handle_execution_event(ExecutionEvent::Created {
                execution: h.executions.get_execution(&exec.id).unwrap(),
            })
            .await;

        let full = h
            .service
            .get_timeline_items("s1", &TimelineQuery::default())
            .unwrap();
        assert_eq!(full.total_count, 5);

        let mut collected = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = h
                .service
                .get_timeline_items(
                    "s1",
                    &TimelineQuery {
                        limit: Some(2),
                        page_token: token.clone(),
                        ..TimelineQuery::default()
                    },
                )
                .unwrap();
            collected.extend(page_ids(&page));
            match page.next_page_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        assert_eq!(collected, page_ids(&full));
        let mut deduped = collected.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), collected.len());
    }

    // ── Subscriber loops ──────────────────────────────────────────────

    #[tokio::test]
    async fn run_wires_both_event_streams() {
        let h = harness();
        let _handles = h.service.run();

        h.executions
            .create_execution("s1", "bash", "bash", "tu1", serde_json::json!({}));
        h.agent_tx
            .send(AgentEvent::MessageAdded {
                session_id: "s1".into(),
                message: message("m1", MessageRole::User, None, &[]),
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.broadcaster.count("tool_execution_received"), 1);
        assert_eq!(h.broadcaster.count("message_received"), 1);
    }
}

