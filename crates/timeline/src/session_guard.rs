//! Per-session write serialization.
//!
//! Every timeline mutation for a session runs under that session's guard,
//! so ingest for one session is sequential while sessions proceed in
//! parallel. The guard is never held across a broadcast.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Maps session ids to single-permit semaphores.
pub struct SessionGuards {
    guards: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl Default for SessionGuards {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionGuards {
    pub fn new() -> Self {
        Self {
            guards: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the write guard for a session. Waits behind any in-flight
    /// ingest for the same session; auto-releases on drop.
    pub async fn acquire(&self, session_id: &str) -> OwnedSemaphorePermit {
        let sem = {
            let mut guards = self.guards.lock();
            guards
                .entry(session_id.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.acquire_owned()
            .await
            .expect("session guard semaphore is never closed")
    }

    /// Number of tracked sessions (for monitoring).
    pub fn session_count(&self) -> usize {
        self.guards.lock().len()
    }
}
