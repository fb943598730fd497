//! Keyed turn locks: at most one turn per key runs at a time, waiters are served in arrival
//! order (tokio's mutex is fair), and different keys never contend.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};

// std mutex: held only for map access, never across an await.
type Slots<K> = Arc<StdMutex<HashMap<K, Arc<Mutex<()>>>>>;

pub struct KeyedLocks<K: Hash + Eq + Clone> {
    slots: Slots<K>,
}

impl<K: Hash + Eq + Clone> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self {
            slots: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    /// Wait for the turn lock of `key`. The lock is released when the guard drops.
    pub async fn lock(&self, key: K) -> TurnGuard<K> {
        let slot = {
            let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let guard = slot.lock_owned().await;
        TurnGuard {
            key,
            slots: self.slots.clone(),
            guard: Some(guard),
        }
    }

    /// Keys with a held or awaited lock.
    pub fn active(&self) -> usize {
        self.slots.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

pub struct TurnGuard<K: Hash + Eq + Clone> {
    key: K,
    slots: Slots<K>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K: Hash + Eq + Clone> Drop for TurnGuard<K> {
    fn drop(&mut self) {
        // Release first so the slot's only remaining owner is the map when nobody waits.
        self.guard.take();
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(slot) = slots.get(&self.key) {
            if Arc::strong_count(slot) == 1 {
                slots.remove(&self.key);
            }
        }
    }
}
