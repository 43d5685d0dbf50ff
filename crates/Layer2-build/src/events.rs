//! Build-job progress broadcasting
//!
//! Ephemeral fan-out keyed by build-job id. No snapshot or replay: a client
//! that connects after the job finished receives nothing.

use dockhand_stream::{Fanout, PushEvent, Subscriber};
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

/// Terminal status of a build job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStatus {
    Success,
    Fail,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Success => "success",
            BuildStatus::Fail => "fail",
        }
    }
}

/// Fans build progress out to per-job subscriber sets
#[derive(Default)]
pub struct BuildBroadcaster {
    fanout: Fanout<String>,
}

impl BuildBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber for a job; acknowledges with `connected`
    pub fn register_client(&self, job_id: &str, subscriber: Subscriber) {
        subscriber.send(PushEvent::new("connected", job_id));
        self.fanout.add(job_id.to_string(), subscriber);
    }

    /// Remove one subscriber from a job
    pub fn remove_client(&self, job_id: &str, subscriber_id: Uuid) {
        self.fanout.remove(&job_id.to_string(), subscriber_id);
    }

    /// Fan a JSON payload out to every current subscriber of a job.
    ///
    /// With no subscribers this is a logged no-op.
    pub fn broadcast(&self, job_id: &str, event: &str, payload: &serde_json::Value) {
        let delivered = self.fanout.send(
            &job_id.to_string(),
            PushEvent::new(event, payload.to_string()),
        );
        if delivered == 0 {
            debug!(job_id, event, "Broadcast with no subscribers");
        }
    }

    /// Convenience for a progress log line
    pub fn log(&self, job_id: &str, message: &str) {
        self.broadcast(job_id, "log", &json!({"jobId": job_id, "message": message}));
    }

    /// Emit the terminal `finished` event, then discard the job's state.
    ///
    /// All subscriber sinks end here; later registrations see nothing.
    pub fn finalize_job(&self, job_id: &str, status: BuildStatus) {
        self.broadcast(
            job_id,
            "finished",
            &json!({"jobId": job_id, "status": status.as_str()}),
        );
        let dropped = self.fanout.drop_key(&job_id.to_string());
        debug!(job_id, dropped, "Finalized build job");
    }

    /// Current subscriber count for a job
    pub fn subscriber_count(&self, job_id: &str) -> usize {
        self.fanout.count(&job_id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_broadcast_fans_out_to_all_subscribers() {
        let broadcaster = BuildBroadcaster::new();
        let (sub_a, mut rx_a) = Subscriber::channel();
        let (sub_b, mut rx_b) = Subscriber::channel();

        broadcaster.register_client("job-1", sub_a);
        broadcaster.register_client("job-1", sub_b);

        // Both receive the connected acknowledgement first
        assert_eq!(rx_a.recv().await.unwrap().event, "connected");
        assert_eq!(rx_b.recv().await.unwrap().event, "connected");

        broadcaster.log("job-1", "pulling base image");

        let event = rx_a.recv().await.unwrap();
        assert_eq!(event.event, "log");
        assert!(event.data.contains("pulling base image"));
        assert_eq!(rx_b.recv().await.unwrap().event, "log");
    }

    #[tokio::test]
    async fn test_finalize_emits_finished_and_discards_state() {
        let broadcaster = BuildBroadcaster::new();
        let (sub, mut rx) = Subscriber::channel();
        broadcaster.register_client("job-1", sub);
        rx.recv().await.unwrap(); // connected

        broadcaster.finalize_job("job-1", BuildStatus::Fail);

        let finished = rx.recv().await.unwrap();
        assert_eq!(finished.event, "finished");
        assert!(finished.data.contains("\"status\":\"fail\""));

        assert_eq!(broadcaster.subscriber_count("job-1"), 0);
    }

    #[tokio::test]
    async fn test_late_subscriber_after_finalize_receives_nothing() {
        let broadcaster = BuildBroadcaster::new();
        broadcaster.finalize_job("job-1", BuildStatus::Success);

        let (sub, mut rx) = Subscriber::channel();
        broadcaster.register_client("job-1", sub);

        // Only the connected acknowledgement; no replay of finished
        assert_eq!(rx.recv().await.unwrap().event, "connected");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_without_subscribers_is_noop() {
        let broadcaster = BuildBroadcaster::new();
        broadcaster.log("absent", "nobody listening");
    }

    #[tokio::test]
    async fn test_remove_client_stops_delivery() {
        let broadcaster = BuildBroadcaster::new();
        let (sub, mut rx) = Subscriber::channel();
        let id = sub.id();

        broadcaster.register_client("job-1", sub);
        rx.recv().await.unwrap(); // connected
        broadcaster.remove_client("job-1", id);

        broadcaster.log("job-1", "after removal");
        assert!(rx.try_recv().is_err());
    }
}
