//! Preview records, addressable by id and by execution id.

use std::collections::HashMap;

use parking_lot::RwLock;

use weft_domain::Preview;

/// Thread-safe registry of preview records.
///
/// Attachment to an execution is asynchronous with respect to completion:
/// a preview may be registered before or after the execution reaches a
/// terminal status, and the timeline patches already-persisted items when
/// attachment loses that race.
pub struct PreviewRegistry {
    inner: RwLock<PreviewMap>,
}

#[derive(Default)]
struct PreviewMap {
    by_id: HashMap<String, Preview>,
    by_execution: HashMap<String, String>,
}

impl Default for PreviewRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(PreviewMap::default()),
        }
    }

    /// Insert or replace a preview record.
    pub fn insert(&self, preview: Preview) {
        let mut map = self.inner.write();
        map.by_execution
            .insert(preview.execution_id.clone(), preview.id.clone());
        map.by_id.insert(preview.id.clone(), preview);
    }

    pub fn get(&self, id: &str) -> Option<Preview> {
        self.inner.read().by_id.get(id).cloned()
    }

    pub fn for_execution(&self, execution_id: &str) -> Option<Preview> {
        let map = self.inner.read();
        let id = map.by_execution.get(execution_id)?;
        map.by_id.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_domain::PreviewContentType;

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

    #[test]
    fn addressable_by_id_and_execution() {
        let reg = PreviewRegistry::new();
        reg.insert(make_preview("p1", "e1"));

        assert_eq!(reg.get("p1").unwrap().id, "p1");
        assert_eq!(reg.for_execution("e1").unwrap().id, "p1");
        assert!(reg.get("p2").is_none());
        assert!(reg.for_execution("e2").is_none());
    }

    #[test]
    fn reinsert_replaces() {
        let reg = PreviewRegistry::new();
        reg.insert(make_preview("p1", "e1"));
        let mut updated = make_preview("p1", "e1");
        updated.brief_content = "changed".into();
        reg.insert(updated);

        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get("p1").unwrap().brief_content, "changed");
    }
}
