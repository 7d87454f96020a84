use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Serialization key for position mutations.
pub type PositionKey = (i64, String);

/// In-process lock table: one async mutex per key, created on demand.
///
/// Holders of the same key run strictly one after another; different keys
/// never contend. An entry is dropped from the table as soon as the last
/// holder releases it with nobody else waiting, so the table only ever
/// contains keys with work in flight.
pub struct KeyedLocks<K: Eq + Hash + Clone> {
    table: Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>,
}

pub struct KeyGuard<K: Eq + Hash + Clone> {
    key: K,
    slot: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<Mutex<HashMap<K, Arc<AsyncMutex<()>>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Wait for exclusive access to `key`.
    pub async fn lock(&self, key: K) -> KeyGuard<K> {
        let slot = {
            let mut table = self.table.lock().unwrap_or_else(|p| p.into_inner());
            Arc::clone(table.entry(key.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))))
        };

        let guard = Arc::clone(&slot).lock_owned().await;

        KeyGuard {
            key,
            slot,
            guard: Some(guard),
            table: Arc::clone(&self.table),
        }
    }

    /// Keys currently held or awaited.
    pub fn active_keys(&self) -> usize {
        self.table.lock().map(|t| t.len()).unwrap_or_else(|p| p.into_inner().len())
    }
}

impl<K: Eq + Hash + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<K> {
    fn drop(&mut self) {
        // Release first so a waiter can proceed, then prune under the table
        // lock. Strong count 2 means only the table and this guard hold the
        // slot; any waiter would hold a third reference.
        self.guard.take();
        let mut table = self.table.lock().unwrap_or_else(|p| p.into_inner());
        if Arc::strong_count(&self.slot) == 2 {
            if let Some(existing) = table.get(&self.key) {
                if Arc::ptr_eq(existing, &self.slot) {
                    table.remove(&self.key);
                }
            }
        }
    }
}
