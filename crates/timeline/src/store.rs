//! Append-only per-session timeline log.
//!
//! Each session gets a directory under `<state>/sessions/<sessionId>/`
//! holding `timeline.jsonl`: one upsert record per line, `{key, item}`.
//! Readers reduce the log by keeping the last occurrence of each key at
//! its first-seen position, which gives upsert-by-`(type, id)` semantics
//! on top of a plain append.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use weft_domain::timeline::MessageItem;
use weft_domain::trace::TraceEvent;
use weft_domain::{Error, ItemKey, Result, StoredMessage, TimelineItem};

const TIMELINE_FILE: &str = "timeline.jsonl";
const MESSAGES_FILE: &str = "messages.json";

/// One line of the timeline log.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UpsertRecord {
    key: ItemKey,
    item: TimelineItem,
}

/// Durable per-session timeline log with upsert semantics.
///
/// Writers for the same session serialize on a per-session lock; readers
/// do not take it and see either the pre- or post-write state (a torn
/// trailing line is skipped like any other malformed line).
pub struct TimelineStore {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TimelineStore {
    /// Create the store rooted at `<state_path>/sessions/`.
    pub fn new(state_path: &Path) -> Result<Self> {
        let root = state_path.join("sessions");
        std::fs::create_dir_all(&root)
            .map_err(|e| Error::Storage(format!("creating {}: {e}", root.display())))?;
        Ok(Self {
            root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    /// Directory holding a session's persisted files.
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(session_id.to_owned())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Append an upsert record for `item`, write-through before returning.
    pub fn append_or_replace(&self, session_id: &str, item: &TimelineItem) -> Result<()> {
        let record = UpsertRecord {
            key: item.key(),
            item: item.clone(),
        };
        let mut line = serde_json::to_string(&record).map_err(Error::Json)?;
        line.push('\n');

        let lock = self.session_lock(session_id);
        let _guard = lock.lock();

        let dir = self.session_dir(session_id);
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Storage(format!("creating {}: {e}", dir.display())))?;
        let path = dir.join(TIMELINE_FILE);
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| Error::Storage(format!("opening {}: {e}", path.display())))?;
        file.write_all(line.as_bytes())
            .map_err(|e| Error::Storage(format!("appending {}: {e}", path.display())))?;
        file.flush()
            .map_err(|e| Error::Storage(format!("flushing {}: {e}", path.display())))?;
        drop(_guard);

        TraceEvent::TimelineAppend {
            session_id: session_id.to_owned(),
            kind: record.key.kind.to_string(),
            item_id: record.key.id,
        }
        .emit();

        Ok(())
    }

    /// Load the reduced log: all items, insertion-ordered, last write wins
    /// per key. Malformed lines are skipped with a warning.
    pub fn load(&self, session_id: &str) -> Result<Vec<TimelineItem>> {
        let dir = self.session_dir(session_id);
        let path = dir.join(TIMELINE_FILE);

        let mut items: Vec<TimelineItem> = Vec::new();
        let mut positions: HashMap<ItemKey, usize> = HashMap::new();

        if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| Error::Storage(format!("reading {}: {e}", path.display())))?;
            for line in raw.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let record: UpsertRecord = match serde_json::from_str(line) {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!(
                            session_id,
                            error = %e,
                            "skipping malformed timeline line"
                        );
                        continue;
                    }
                };
                match positions.get(&record.key) {
                    Some(&pos) => items[pos] = record.item,
                    None => {
                        positions.insert(record.key, items.len());
                        items.push(record.item);
                    }
                }
            }
        }

        // Compatibility shim: an external messages.json snapshot stands in
        // when the log itself carries no message items.
        if !items.iter().any(|i| i.as_message().is_some()) {
            if let Some(messages) = self.load_messages_snapshot(session_id, &dir) {
                let mut merged: Vec<TimelineItem> = messages;
                merged.append(&mut items);
                items = merged;
            }
        }

        TraceEvent::TimelineLoaded {
            session_id: session_id.to_owned(),
            items: items.len(),
        }
        .emit();

        Ok(items)
    }

    fn load_messages_snapshot(&self, session_id: &str, dir: &Path) -> Option<Vec<TimelineItem>> {
        let path = dir.join(MESSAGES_FILE);
        if !path.exists() {
            return None;
        }
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str::<Vec<StoredMessage>>(&raw) {
            Ok(messages) => Some(
                messages
                    .into_iter()
                    .map(|message| {
                        TimelineItem::Message(MessageItem {
                            id: message.id.clone(),
                            session_id: message.session_id.clone(),
                            timestamp: message.timestamp,
                            tool_executions: message.execution_ids(),
                            message,
                        })
                    })
                    .collect(),
            ),
            Err(e) => {
                tracing::warn!(
                    session_id,
                    error = %e,
                    "ignoring unreadable messages snapshot"
                );
                None
            }
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use weft_domain::message::MessageRole;
    use weft_domain::timeline::ToolExecutionItem;
    use weft_domain::{ExecutionStatus, ToolExecution};

    fn make_store() -> (tempfile::TempDir, TimelineStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = TimelineStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn message_item(id: &str, sequence: i64) -> TimelineItem {
        let message = StoredMessage {
            id: id.into(),
            session_id: "s1".into(),
            role: MessageRole::User,
            timestamp: Utc::now(),
            content: serde_json::json!([{ "type": "text", "text": "hi" }]),
            sequence: Some(sequence),
            tool_calls: vec![],
            parent_message_id: None,
        };
        TimelineItem::Message(MessageItem {
            id: id.into(),
            session_id: "s1".into(),
            timestamp: message.timestamp,
            tool_executions: vec![],
            message,
        })
    }

    fn tool_item(id: &str, status: ExecutionStatus) -> TimelineItem {
        TimelineItem::ToolExecution(ToolExecutionItem {
            id: id.into(),
            session_id: "s1".into(),
            timestamp: Utc::now(),
            execution: ToolExecution {
                id: id.into(),
                session_id: "s1".into(),
                tool_id: "bash".into(),
                tool_name: "bash".into(),
                tool_use_id: "tu1".into(),
                args: serde_json::json!({}),
                status,
                start_time: Utc::now(),
                end_time: None,
                execution_time_ms: None,
                result: None,
                error: None,
                permission_id: None,
                preview_id: None,
                summary: None,
            },
            parent_message_id: None,
            preview: None,
        })
    }

    #[test]
    fn empty_session_loads_empty() {
        let (_dir, store) = make_store();
        assert!(store.load("nope").unwrap().is_empty());
    }

    #[test]
    fn append_then_load_roundtrips() {
        let (_dir, store) = make_store();
        store.append_or_replace("s1", &message_item("m1", 0)).unwrap();
        store
            .append_or_replace("s1", &tool_item("e1", ExecutionStatus::Running))
            .unwrap();

        let items = store.load("s1").unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id(), "m1");
        assert_eq!(items[1].id(), "e1");
    }

    #[test]
    fn same_key_replaces_in_place() {
        let (_dir, store) = make_store();
        store
            .append_or_replace("s1", &tool_item("e1", ExecutionStatus::Running))
            .unwrap();
        store.append_or_replace("s1", &message_item("m1", 0)).unwrap();
        store
            .append_or_replace("s1", &tool_item("e1", ExecutionStatus::Completed))
            .unwrap();

        let items = store.load("s1").unwrap();
        assert_eq!(items.len(), 2);
        // Replacement keeps the first-seen position.
        assert_eq!(items[0].id(), "e1");
        assert_eq!(
            items[0].as_tool_execution().unwrap().execution.status,
            ExecutionStatus::Completed
        );
    }

    #[test]
    fn same_id_different_kind_is_distinct() {
        let (_dir, store) = make_store();
        store.append_or_replace("s1", &message_item("x", 0)).unwrap();
        store
            .append_or_replace("s1", &tool_item("x", ExecutionStatus::Running))
            .unwrap();
        assert_eq!(store.load("s1").unwrap().len(), 2);
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let (_dir, store) = make_store();
        store.append_or_replace("s1", &message_item("m1", 0)).unwrap();

        let path = store.session_dir("s1").join("timeline.jsonl");
        let mut raw = std::fs::read_to_string(&path).unwrap();
        raw.push_str("{not json\n");
        std::fs::write(&path, raw).unwrap();

        let items = store.load("s1").unwrap();
        assert_eq!(items.len(), 1);
    }

    #[test]
    fn messages_snapshot_fills_empty_log() {
        let (_dir, store) = make_store();
        store
            .append_or_replace("s1", &tool_item("e1", ExecutionStatus::Running))
            .unwrap();

        let snapshot = vec![StoredMessage {
            id: "m1".into(),
            session_id: "s1".into(),
            role: MessageRole::User,
            timestamp: Utc::now(),
            content: serde_json::json!([{ "type": "text", "text": "hello" }]),
            sequence: Some(0),
            tool_calls: vec![],
            parent_message_id: None,
        }];
        std::fs::write(
            store.session_dir("s1").join("messages.json"),
            serde_json::to_string(&snapshot).unwrap(),
        )
        .unwrap();

        let items = store.load("s1").unwrap();
        assert_eq!(items.len(), 2);
        assert!(items.iter().any(|i| i.id() == "m1"));
    }

    #[test]
    fn messages_snapshot_ignored_when_log_has_messages() {
        let (_dir, store) = make_store();
        store.append_or_replace("s1", &message_item("m1", 0)).unwrap();

        let snapshot = vec![StoredMessage {
            id: "shadow".into(),
            session_id: "s1".into(),
            role: MessageRole::User,
            timestamp: Utc::now(),
            content: serde_json::json!([]),
            sequence: Some(0),
            tool_calls: vec![],
            parent_message_id: None,
        }];
        std::fs::write(
            store.session_dir("s1").join("messages.json"),
            serde_json::to_string(&snapshot).unwrap(),
        )
        .unwrap();

        let items = store.load("s1").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id(), "m1");
    }

    #[test]
    fn sessions_are_isolated() {
        let (_dir, store) = make_store();
        store.append_or_replace("s1", &message_item("m1", 0)).unwrap();
        store.append_or_replace("s2", &message_item("m2", 0)).unwrap();

        assert_eq!(store.load("s1").unwrap().len(), 1);
        assert_eq!(store.load("s2").unwrap().len(), 1);
    }
}
