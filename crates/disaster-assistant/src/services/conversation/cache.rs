use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use super::types::Session;

/// Process-wide session registry.
///
/// Each session sits behind its own async mutex; a turn holds the guard from
/// checkout until its history write, so turns on one session run one at a time
/// while different sessions proceed in parallel.
#[derive(Clone)]
pub struct SessionStore {
    storage: Arc<DashMap<String, Arc<Mutex<Session>>>>,
    capacity: usize,
}

impl SessionStore {
    pub fn new(capacity: usize) -> Self {
        info!("Initializing session store (history capacity {})", capacity);
        Self {
            storage: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Lock the session for a turn, creating it on first use.
    /// Returns the guard and whether the session was just created.
    pub async fn checkout(&self, session_id: &str) -> (OwnedMutexGuard<Session>, bool) {
        let (slot, created) = self.slot(session_id);
        self.lock_live(session_id, slot, created).await
    }

    // A sweep may drop the slot while we wait on its mutex. Only a guard on the
    // slot the map still holds is handed out; otherwise start over.
    async fn lock_live(
        &self,
        session_id: &str,
        mut slot: Arc<Mutex<Session>>,
        mut created: bool,
    ) -> (OwnedMutexGuard<Session>, bool) {
        loop {
            let guard = slot.clone().lock_owned().await;
            if self
                .storage
                .get(session_id)
                .is_some_and(|current| Arc::ptr_eq(current.value(), &slot))
            {
                return (guard, created);
            }

            drop(guard);
            debug!("Session {} was evicted while waiting for its lock, retrying", session_id);
            (slot, created) = self.slot(session_id);
        }
    }

    // The map guard is released before the caller awaits the session mutex.
    fn slot(&self, session_id: &str) -> (Arc<Mutex<Session>>, bool) {
        if let Some(existing) = self.storage.get(session_id) {
            return (existing.value().clone(), false);
        }

        let mut created = false;
        let slot = self
            .storage
            .entry(session_id.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(Mutex::new(Session::new(session_id, self.capacity)))
            })
            .value()
            .clone();

        if created {
            debug!("Created session {}", session_id);
        }
        (slot, created)
    }

    /// Copy of a session's history, without waiting on an in-flight turn longer than needed.
    pub async fn snapshot(&self, session_id: &str) -> Option<Session> {
        let slot = self.storage.get(session_id)?.value().clone();
        let guard = slot.lock().await;
        Some(guard.clone())
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Drop sessions idle longer than `ttl`. Sessions locked by a running turn are kept.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let start_len = self.storage.len();
        self.storage.retain(|_, slot| match slot.try_lock() {
            Ok(session) => !session.is_idle(ttl),
            Err(_) => true,
        });
        let count = start_len.saturating_sub(self.storage.len());

        if count > 0 {
            info!("Evicted {} idle sessions", count);
        }

        count
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            active_sessions: self.len(),
            history_capacity: self.capacity,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreStats {
    pub active_sessions: usize,
    pub history_capacity: usize,
}
