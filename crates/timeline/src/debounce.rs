//! Short-window deduplication of repeated updates.
//!
//! The same execution change can be observed through several channels
//! (lifecycle events, permission-triggered re-ingest, legacy event
//! shapes). The coordinator drops everything after the first update for a
//! key inside the window, then forgets the key after a TTL.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Shared debounce map with scheduled cleanup.
///
/// One instance per window/TTL pair; keys are caller-defined (the service
/// uses `"<executionId>:<epochSecond>"` for executions and the bare
/// permission id for permissions).
pub struct DebounceCoordinator {
    window: Duration,
    cleanup_after: Duration,
    entries: Arc<Mutex<HashMap<String, Instant>>>,
}

impl DebounceCoordinator {
    pub fn new(window: Duration, cleanup_after: Duration) -> Self {
        Self {
            window,
            cleanup_after,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Record `key` and report whether the caller should process the
    /// update. Returns `false` when the key was recorded within the
    /// window. A fresh record schedules its own cleanup.
    pub fn should_process(&self, key: &str) -> bool {
        let now = Instant::now();
        {
            let mut entries = self.entries.lock();
            if let Some(seen) = entries.get(key) {
                if now.duration_since(*seen) < self.window {
                    return false;
                }
            }
            entries.insert(key.to_owned(), now);
        }
        self.schedule_cleanup(key.to_owned());
        true
    }

    /// Forget `key` after the TTL, unless it was refreshed since.
    fn schedule_cleanup(&self, key: String) {
        let entries = Arc::clone(&self.entries);
        let after = self.cleanup_after;
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let mut entries = entries.lock();
            if let Some(seen) = entries.get(&key) {
                if seen.elapsed() >= after {
                    entries.remove(&key);
                }
            }
        });
    }

    /// Number of live keys (for monitoring and tests).
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
