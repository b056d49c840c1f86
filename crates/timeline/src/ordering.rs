//! Canonical timeline ordering.
//!
//! Wall-clock timestamps are unreliable here: the agent and the server
//! stamp nearly-simultaneous events, so messages order by role and
//! sequence number, and tool activity orders by parent linkage. Timestamps
//! only break ties at the bottom of the priority list.
//!
//! Priorities, highest first:
//! 1. user messages precede assistant messages;
//! 2. messages with a sequence order by it, and precede sequence-less items;
//! 3. a tool or permission item follows the message that spawned it;
//! 4. siblings under one parent order by timestamp, then by type
//!    (message ≺ tool execution ≺ permission request);
//! 5. anything left orders by timestamp, type, then insertion order.
//!
//! Implemented as a schedule (sort the messages, then slot the anchored
//! items under their parents) rather than a single comparator, which keeps
//! the relation total and the sort idempotent.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use weft_domain::timeline::MessageItem;
use weft_domain::{ItemKind, MessageRole, TimelineItem};

/// Sort a session's items into canonical order.
pub fn sort_timeline_items(items: Vec<TimelineItem>) -> Vec<TimelineItem> {
    // Execution id → parent message id, from the message side of the link.
    let mut execution_parents: HashMap<&str, &str> = HashMap::new();
    for item in &items {
        if let TimelineItem::Message(m) = item {
            for execution_id in &m.tool_executions {
                execution_parents.insert(execution_id.as_str(), m.id.as_str());
            }
        }
    }
    // Permission items anchor through their execution's item.
    let mut tool_parents: HashMap<&str, &str> = HashMap::new();
    for item in &items {
        if let TimelineItem::ToolExecution(t) = item {
            if let Some(parent) = t
                .parent_message_id
                .as_deref()
                .or_else(|| execution_parents.get(t.id.as_str()).copied())
            {
                tool_parents.insert(t.id.as_str(), parent);
            }
        }
    }

    let mut messages: Vec<(usize, &MessageItem)> = Vec::new();
    let mut rest: Vec<(usize, &TimelineItem)> = Vec::new();
    for (index, item) in items.iter().enumerate() {
        match item {
            TimelineItem::Message(m) => messages.push((index, m)),
            other => rest.push((index, other)),
        }
    }

    messages.sort_by_key(|(index, m)| {
        (
            role_rank(m.message.role),
            m.message.sequence.is_none(),
            m.message.sequence.unwrap_or(0),
            m.timestamp,
            *index,
        )
    });
    let message_slot: HashMap<&str, usize> = messages
        .iter()
        .enumerate()
        .map(|(slot, (_, m))| (m.id.as_str(), slot))
        .collect();

    // Bucket the non-message items under their parent's slot; items with
    // no resolvable parent trail the whole schedule.
    let mut buckets: Vec<Vec<(SiblingKey, usize)>> = vec![Vec::new(); messages.len()];
    let mut floating: Vec<(SiblingKey, usize)> = Vec::new();
    for (index, item) in rest {
        let parent = match item {
            TimelineItem::ToolExecution(t) => tool_parents.get(t.id.as_str()),
            TimelineItem::PermissionRequest(p) => {
                tool_parents.get(p.request.execution_id.as_str()).or_else(|| {
                    execution_parents.get(p.request.execution_id.as_str())
                })
            }
            TimelineItem::Message(_) => None,
        };
        let key = sibling_key(item, index);
        match parent.and_then(|id| message_slot.get(id)) {
            Some(&slot) => buckets[slot].push((key, index)),
            None => floating.push((key, index)),
        }
    }
    for bucket in &mut buckets {
        bucket.sort();
    }
    floating.sort();

    let mut order: Vec<usize> = Vec::with_capacity(items.len());
    for (slot, (index, _)) in messages.iter().enumerate() {
        order.push(*index);
        order.extend(buckets[slot].iter().map(|(_, i)| *i));
    }
    order.extend(floating.iter().map(|(_, i)| *i));

    let mut slots: Vec<Option<TimelineItem>> = items.into_iter().map(Some).collect();
    order
        .into_iter()
        .map(|i| slots[i].take().expect("each index scheduled once"))
        .collect()
}

type SiblingKey = (DateTime<Utc>, u8, usize);

fn sibling_key(item: &TimelineItem, index: usize) -> SiblingKey {
    (item.timestamp(), type_rank(item.kind()), index)
}

fn role_rank(role: MessageRole) -> u8 {
    match role {
        MessageRole::User => 0,
        MessageRole::Assistant => 1,
    }
}

fn type_rank(kind: ItemKind) -> u8 {
    match kind {
        ItemKind::Message => 0,
        ItemKind::ToolExecution => 1,
        ItemKind::PermissionRequest => 2,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
