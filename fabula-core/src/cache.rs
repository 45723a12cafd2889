//! In-memory session cache.
//!
//! An explicit get/put/evict map instead of a process-global; eviction and
//! recovery are testable and the engine decides the policy. Values are
//! `Arc<tokio::sync::Mutex<Session>>` so holding the lock serializes every
//! action on one session without blocking the others.
//!
//! The map itself sits behind an async mutex so a cache miss can be
//! resolved while the entry is held: concurrent misses for the same id
//! must converge on ONE slot, or two callers would serialize on different
//! mutexes and interleave writes to the same artifacts.

use crate::session::Session;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

type Slot = Arc<Mutex<Session>>;

/// Cache of live sessions keyed by session id.
#[derive(Debug, Default)]
pub struct SessionCache {
    inner: Mutex<HashMap<String, Slot>>,
}

impl SessionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a cached session, if present.
    pub async fn get(&self, session_id: &str) -> Option<Slot> {
        self.inner.lock().await.get(session_id).cloned()
    }

    /// Insert (or replace) a session and return its slot.
    pub async fn put(&self, session: Session) -> Slot {
        let id = session.id.clone();
        let slot = Arc::new(Mutex::new(session));
        self.inner.lock().await.insert(id, slot.clone());
        slot
    }

    /// Fetch the slot for `session_id`, loading it with `load` on a miss.
    ///
    /// The map entry is held across check and insert, so concurrent
    /// misses for the same id resolve to the same slot and never run
    /// `load` twice for one insertion.
    pub async fn get_or_try_insert_with<F, Fut, E>(
        &self,
        session_id: &str,
        load: F,
    ) -> Result<Slot, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Session, E>>,
    {
        let mut map = self.inner.lock().await;
        if let Some(slot) = map.get(session_id) {
            return Ok(slot.clone());
        }
        let session = load().await?;
        let slot = Arc::new(Mutex::new(session));
        map.insert(session_id.to_string(), slot.clone());
        Ok(slot)
    }

    /// Drop a session from memory. Its artifacts stay on disk; the next
    /// access goes through recovery.
    pub async fn evict(&self, session_id: &str) -> bool {
        self.inner.lock().await.remove(session_id).is_some()
    }

    /// Number of cached sessions.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
