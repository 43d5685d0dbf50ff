//! Keyed subscriber-set fan-out
//!
//! Maps a key (task id, build-job id) to its current subscriber set and
//! fans push events out to every live member. Closed subscribers are pruned
//! on delivery.

use crate::push::{PushEvent, Subscriber};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;
use tracing::debug;
use uuid::Uuid;

/// Fan-out registry keyed by `K`
pub struct Fanout<K> {
    subscribers: Mutex<HashMap<K, Vec<Subscriber>>>,
}

impl<K> Default for Fanout<K> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone + std::fmt::Debug> Fanout<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber under a key
    pub fn add(&self, key: K, subscriber: Subscriber) {
        let mut subscribers = self.subscribers.lock();
        subscribers.entry(key).or_default().push(subscriber);
    }

    /// Remove one subscriber; returns how many remain under the key.
    ///
    /// The key's entry is dropped when its set becomes empty.
    pub fn remove(&self, key: &K, id: Uuid) -> usize {
        let mut subscribers = self.subscribers.lock();
        let Some(set) = subscribers.get_mut(key) else {
            return 0;
        };
        set.retain(|s| s.id() != id);

        let remaining = set.len();
        if remaining == 0 {
            subscribers.remove(key);
        }
        remaining
    }

    /// Deliver an event to every live subscriber under a key.
    ///
    /// Returns the number of deliveries; closed sinks are pruned.
    pub fn send(&self, key: &K, event: PushEvent) -> usize {
        let mut subscribers = self.subscribers.lock();
        let Some(set) = subscribers.get_mut(key) else {
            debug!(?key, event = %event.event, "No subscribers for event");
            return 0;
        };

        set.retain(|s| s.send(event.clone()));
        let delivered = set.len();
        if delivered == 0 {
            subscribers.remove(key);
        }
        delivered
    }

    /// Drop every subscriber under a key; returns how many were removed
    pub fn drop_key(&self, key: &K) -> usize {
        self.subscribers
            .lock()
            .remove(key)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    /// Current subscriber count under a key
    pub fn count(&self, key: &K) -> usize {
        self.subscribers
            .lock()
            .get(key)
            .map(|set| set.len())
            .unwrap_or(0)
    }

    /// Keys with at least one subscriber
    pub fn keys(&self) -> Vec<K> {
        self.subscribers.lock().keys().cloned().collect()
    }
}
