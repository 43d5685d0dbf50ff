//! Change-event publishing
//!
//! UI subscribers learn about record mutations through a publish capability.
//! The bus fans events out over a broadcast channel; delivery to slow or
//! absent subscribers is best-effort.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::trace;

/// Default broadcast channel capacity
const CHANNEL_CAPACITY: usize = 1024;

/// Which record family changed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Task,
    Workspace,
    Account,
    Connection,
}

/// What happened to the record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    Created,
    Updated,
    Archived,
    Deleted,
}

/// One change notification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub change: Change,
    pub data: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn new(kind: ChangeKind, change: Change, data: serde_json::Value) -> Self {
        Self {
            kind,
            change,
            data,
            at: Utc::now(),
        }
    }
}

/// Publish capability consumed by the orchestration layer
pub trait ChangePublisher: Send + Sync {
    fn publish(&self, kind: ChangeKind, change: Change, data: serde_json::Value);
}

/// Broadcast-backed change bus
pub struct ChangeBus {
    sender: broadcast::Sender<ChangeEvent>,
    published: AtomicU64,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            published: AtomicU64::new(0),
        }
    }

    /// Subscribe to all future change events
    pub fn receiver(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Total events published since construction
    pub fn event_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangePublisher for ChangeBus {
    fn publish(&self, kind: ChangeKind, change: Change, data: serde_json::Value) {
        self.published.fetch_add(1, Ordering::SeqCst);
        trace!(?kind, ?change, "Publishing change event");

        // No subscribers is fine; events are notifications, not commands.
        let _ = self.sender.send(ChangeEvent::new(kind, change, data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscriber() {
        let bus = ChangeBus::new();
        let mut rx = bus.receiver();

        bus.publish(
            ChangeKind::Task,
            Change::Created,
            serde_json::json!({"id": "t1"}),
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.kind, ChangeKind::Task);
        assert_eq!(event.change, Change::Created);
        assert_eq!(event.data["id"], "t1");
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus = ChangeBus::new();
        bus.publish(ChangeKind::Workspace, Change::Updated, serde_json::json!({}));
        assert_eq!(bus.event_count(), 1);
    }
}
