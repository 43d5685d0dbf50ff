//! Per-key async mutual exclusion
//!
//! The task registry is shared mutable state; lifecycle operations for one
//! task id must not race each other. Each key gets its own async mutex,
//! created on first use and retired once nothing holds it.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Map of per-key async mutexes
pub struct KeyedLocks<K> {
    locks: Mutex<HashMap<K, Arc<tokio::sync::Mutex<()>>>>,
}

impl<K> Default for KeyedLocks<K> {
    fn default() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the mutex for a key, creating it on first use.
    ///
    /// The guard serializes every holder of the same key; distinct keys do
    /// not contend.
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut locks = self.locks.lock();
            locks.entry(key).or_default().clone()
        };
        mutex.lock_owned().await
    }

    /// Drop a key's mutex if no guard is outstanding.
    ///
    /// Called after a task is archived or deleted so the map does not grow
    /// with dead ids.
    pub fn retire(&self, key: &K) {
        let mut locks = self.locks.lock();
        if let Some(mutex) = locks.get(key) {
            if Arc::strong_count(mutex) == 1 {
                locks.remove(key);
            }
        }
    }

    /// Number of keys currently tracked
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_key_does_not_interleave() {
        let locks = Arc::new(KeyedLocks::new());
        let running = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let locks = Arc::clone(&locks);
            let running = Arc::clone(&running);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("task-1").await;
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        let locks = KeyedLocks::new();
        let _a = locks.lock("a").await;
        // Would deadlock if keys shared one mutex
        let _b = locks.lock("b").await;
    }

    #[tokio::test]
    async fn test_retire_removes_unheld_lock() {
        let locks = KeyedLocks::new();
        {
            let _guard = locks.lock("a").await;
            locks.retire(&"a");
            // Still held; must survive
            assert_eq!(locks.len(), 1);
        }
        locks.retire(&"a");
        assert!(locks.is_empty());
    }
}
