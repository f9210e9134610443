//! Per-key history locks.
//!
//! Concurrent agent runs that persist under the same `(agent_name,
//! session_key)` must not interleave their history writes. Each key maps
//! to a `Semaphore(1)`; holding the permit for the duration of a run
//! gives at-most-one-writer semantics. Runs without persistence never
//! touch this map.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use maestro_domain::error::{Error, Result};

/// Map of history keys to single-permit semaphores.
#[derive(Default)]
pub struct HistoryLocks {
    locks: Mutex<HashMap<String, Arc<Semaphore>>>,
}

impl HistoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for a key, waiting for any current holder. The
    /// permit releases on drop.
    pub async fn acquire(&self, key: &str) -> Result<OwnedSemaphorePermit> {
        let sem = {
            let mut locks = self.locks.lock();
            locks
                .entry(key.to_owned())
                .or_insert_with(|| Arc::new(Semaphore::new(1)))
                .clone()
        };
        sem.acquire_owned()
            .await
            .map_err(|_| Error::Storage(format!("history lock for '{key}' is closed")))
    }

    /// Number of tracked keys (monitoring).
    pub fn key_count(&self) -> usize {
        self.locks.lock().len()
    }

    /// Drop entries whose lock is not currently held.
    pub fn prune_idle(&self) {
        let mut locks = self.locks.lock();
        locks.retain(|_, sem| sem.available_permits() == 0);
    }
}
