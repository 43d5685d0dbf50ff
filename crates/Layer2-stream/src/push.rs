//! Server-push event framing and subscriber sinks
//!
//! Events cross the routing seam as text frames:
//! `event: <name>\ndata: <payload>\n\n`. A subscriber is the sending half of
//! an unbounded channel; the routing layer drains the receiving half into
//! its response stream.

use serde::Serialize;
use tokio::sync::mpsc;
use uuid::Uuid;

/// One push event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushEvent {
    pub event: String,
    pub data: String,
}

impl PushEvent {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// Event with a JSON-serialized payload
    pub fn json(event: impl Into<String>, payload: &impl Serialize) -> serde_json::Result<Self> {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }

    /// Wire form served to clients
    pub fn to_wire(&self) -> String {
        format!("event: {}\ndata: {}\n\n", self.event, self.data)
    }
}

/// Live observer of a push stream
#[derive(Debug, Clone)]
pub struct Subscriber {
    id: Uuid,
    tx: mpsc::UnboundedSender<PushEvent>,
}

impl Subscriber {
    /// Create a subscriber and the receiver the routing layer drains
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PushEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: Uuid::new_v4(),
                tx,
            },
            rx,
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Deliver one event; returns false when the receiver is gone
    pub fn send(&self, event: PushEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_framing() {
        let event = PushEvent::new("task-stdout", "compiling...");
        assert_eq!(event.to_wire(), "event: task-stdout\ndata: compiling...\n\n");
    }

    #[test]
    fn test_json_payload() {
        let event =
            PushEvent::json("log", &serde_json::json!({"jobId": "j1", "message": "pulled"}))
                .unwrap();
        assert_eq!(event.event, "log");
        assert!(event.data.contains("\"jobId\":\"j1\""));
    }

    #[tokio::test]
    async fn test_subscriber_delivery() {
        let (sub, mut rx) = Subscriber::channel();
        assert!(sub.send(PushEvent::new("connected", "t1")));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.event, "connected");
    }

    #[tokio::test]
    async fn test_send_after_receiver_dropped() {
        let (sub, rx) = Subscriber::channel();
        drop(rx);

        assert!(!sub.send(PushEvent::new("connected", "t1")));
        assert!(sub.is_closed());
    }
}
