//! Per-task log multiplexing
//!
//! One Log Session per task fans a single underlying daemon log stream out
//! to any number of subscribers. A new subscriber first receives a one-shot
//! snapshot (a non-follow fetch of all history, decoded and flushed
//! immediately) and is then registered on the live session. The follow
//! stream is reference-counted by the subscriber set: it opens with the
//! first subscriber and is torn down when the last one leaves.
//!
//! Delivery across the snapshot/follow seam is best-effort: a line emitted
//! between the snapshot completing and the follow stream attaching may be
//! duplicated or lost. Acceptable for a log tail; stated, not hidden.

use async_trait::async_trait;
use bollard::container::LogsOptions;
use bollard::Docker;
use dockhand_foundation::{Error, Result, TaskId};
use dockhand_stream::{decode_buffer, ChannelLines, Fanout, Frame, PushEvent, StreamChannel, Subscriber};
use futures::stream::BoxStream;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Result shape of a log fetch.
///
/// The daemon returns one of two shapes for non-follow logs: a single
/// framed buffer, or an incremental stream of demultiplexed frames.
pub enum LogFetch {
    Buffer(Vec<u8>),
    Stream(BoxStream<'static, Result<Frame>>),
}

/// Source of a container's log output
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn fetch(&self, container_id: &str, follow: bool) -> Result<LogFetch>;
}

/// Daemon-backed log source
pub struct DaemonLogSource {
    docker: Docker,
}

impl DaemonLogSource {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl LogSource for DaemonLogSource {
    async fn fetch(&self, container_id: &str, follow: bool) -> Result<LogFetch> {
        let docker = self.docker.clone();
        let container = container_id.to_string();
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

        // The daemon stream borrows the client, so a forwarding task owns
        // both and feeds the channel; the returned stream owns only the
        // receiving half.
        tokio::spawn(async move {
            let mut stream = docker.logs(
                &container,
                Some(LogsOptions::<String> {
                    follow,
                    stdout: true,
                    stderr: true,
                    tail: "all".to_string(),
                    ..Default::default()
                }),
            );
            while let Some(item) = stream.next().await {
                let forwarded = match item {
                    Ok(output) => match Frame::from_log_output(output) {
                        Some(frame) => tx.send(Ok(frame)),
                        None => continue,
                    },
                    Err(e) => {
                        let _ = tx.send(Err(Error::Stream(e.to_string())));
                        break;
                    }
                };
                if forwarded.is_err() {
                    break; // receiver gone
                }
            }
        });

        Ok(LogFetch::Stream(receiver_stream(rx).boxed()))
    }
}

fn receiver_stream<T>(
    mut rx: tokio::sync::mpsc::UnboundedReceiver<T>,
) -> impl futures::Stream<Item = T> {
    futures::stream::poll_fn(move |cx| rx.poll_recv(cx))
}

struct SessionHandle {
    container_id: String,
    reader: JoinHandle<()>,
}

struct MuxInner {
    source: Arc<dyn LogSource>,
    fanout: Fanout<TaskId>,
    sessions: Mutex<HashMap<TaskId, SessionHandle>>,
    pending_cap: usize,
}

impl MuxInner {
    /// Tear a session down: stop the reader and end every subscriber sink
    fn close_session(&self, task_id: TaskId) {
        if let Some(handle) = self.sessions.lock().remove(&task_id) {
            handle.reader.abort();
            let dropped = self.fanout.drop_key(&task_id);
            info!(task = %task_id, container = %handle.container_id, dropped, "Log session closed");
        }
    }
}

/// Per-task fan-out of daemon log streams
pub struct LogMux {
    inner: Arc<MuxInner>,
}

impl LogMux {
    pub fn new(source: Arc<dyn LogSource>, pending_cap: usize) -> Self {
        Self {
            inner: Arc::new(MuxInner {
                source,
                fanout: Fanout::new(),
                sessions: Mutex::new(HashMap::new()),
                pending_cap,
            }),
        }
    }

    /// Register a subscriber for a task's logs.
    ///
    /// The subscriber receives `connected`, then the decoded snapshot of all
    /// history to date, and is then added to the live session - which is
    /// started if this is the first subscriber.
    pub async fn register_client(
        &self,
        task_id: TaskId,
        container_id: &str,
        subscriber: Subscriber,
    ) -> Result<()> {
        subscriber.send(PushEvent::new("connected", task_id.to_string()));

        self.send_snapshot(container_id, &subscriber).await?;

        self.inner.fanout.add(task_id, subscriber);
        self.ensure_session(task_id, container_id);
        Ok(())
    }

    /// Remove a subscriber; the session stops when the last one leaves
    pub fn remove_client(&self, task_id: TaskId, subscriber_id: Uuid) {
        let remaining = self.inner.fanout.remove(&task_id, subscriber_id);
        if remaining == 0 {
            self.inner.close_session(task_id);
        }
    }

    /// Whether a live session exists for the task
    pub fn has_session(&self, task_id: TaskId) -> bool {
        self.inner.sessions.lock().contains_key(&task_id)
    }

    /// Subscriber count for the task
    pub fn subscriber_count(&self, task_id: TaskId) -> usize {
        self.inner.fanout.count(&task_id)
    }

    /// One-shot replay of historical output to a single subscriber
    async fn send_snapshot(&self, container_id: &str, subscriber: &Subscriber) -> Result<()> {
        let fetch = self.inner.source.fetch(container_id, false).await?;
        let mut lines = ChannelLines::with_cap(self.inner.pending_cap);

        match fetch {
            LogFetch::Buffer(buf) => {
                for frame in decode_buffer(&buf) {
                    for (channel, line) in lines.push(&frame) {
                        subscriber.send(line_event(channel, line));
                    }
                }
            }
            LogFetch::Stream(mut stream) => {
                while let Some(item) = stream.next().await {
                    let frame = item?;
                    for (channel, line) in lines.push(&frame) {
                        subscriber.send(line_event(channel, line));
                    }
                }
            }
        }
        Ok(())
    }

    /// Start the follow stream for a task unless one is already running
    fn ensure_session(&self, task_id: TaskId, container_id: &str) {
        let mut sessions = self.inner.sessions.lock();
        if sessions.contains_key(&task_id) {
            return;
        }

        let inner = Arc::clone(&self.inner);
        let container = container_id.to_string();
        let reader = tokio::spawn(async move {
            let fetch = match inner.source.fetch(&container, true).await {
                Ok(fetch) => fetch,
                Err(e) => {
                    warn!(task = %task_id, error = %e, "Follow fetch failed");
                    inner.close_session(task_id);
                    return;
                }
            };

            let mut lines = ChannelLines::with_cap(inner.pending_cap);
            match fetch {
                LogFetch::Buffer(buf) => {
                    for frame in decode_buffer(&buf) {
                        for (channel, line) in lines.push(&frame) {
                            inner.fanout.send(&task_id, line_event(channel, line));
                        }
                    }
                }
                LogFetch::Stream(mut stream) => {
                    while let Some(item) = stream.next().await {
                        match item {
                            Ok(frame) => {
                                for (channel, line) in lines.push(&frame) {
                                    inner.fanout.send(&task_id, line_event(channel, line));
                                }
                            }
                            Err(e) => {
                                // A stream error closes the session; task
                                // state is unaffected.
                                warn!(task = %task_id, error = %e, "Log stream error");
                                break;
                            }
                        }
                    }
                }
            }
            inner.close_session(task_id);
        });

        sessions.insert(
            task_id,
            SessionHandle {
                container_id: container_id.to_string(),
                reader,
            },
        );
        debug!(task = %task_id, container = %container_id, "Log session started");
    }
}

fn line_event(channel: StreamChannel, line: String) -> PushEvent {
    match channel {
        StreamChannel::Stdout => PushEvent::new("task-stdout", line),
        StreamChannel::Stderr => PushEvent::new("task-stderr", line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Source serving a fixed framed buffer as the snapshot and a pending
    /// (never-ending) stream as the follow; counts follow fetches.
    struct FakeSource {
        snapshot: Vec<u8>,
        follow_fetches: AtomicUsize,
    }

    impl FakeSource {
        fn new(snapshot: Vec<u8>) -> Self {
            Self {
                snapshot,
                follow_fetches: AtomicUsize::new(0),
            }
        }

        fn follow_count(&self) -> usize {
            self.follow_fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LogSource for FakeSource {
        async fn fetch(&self, _container_id: &str, follow: bool) -> Result<LogFetch> {
            if follow {
                self.follow_fetches.fetch_add(1, Ordering::SeqCst);
                Ok(LogFetch::Stream(futures::stream::pending().boxed()))
            } else {
                Ok(LogFetch::Buffer(self.snapshot.clone()))
            }
        }
    }

    fn snapshot_with(lines: &[(StreamChannel, &str)]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (channel, text) in lines {
            let frame = Frame {
                channel: *channel,
                payload: format!("{}\n", text).into_bytes(),
            };
            buf.extend_from_slice(&frame.encode());
        }
        buf
    }

    #[tokio::test]
    async fn test_snapshot_then_follow_registration() {
        let source = Arc::new(FakeSource::new(snapshot_with(&[
            (StreamChannel::Stdout, "boot"),
            (StreamChannel::Stderr, "warn: slow disk"),
        ])));
        let mux = LogMux::new(source.clone(), 5000);
        let task_id = TaskId::new();

        let (sub, mut rx) = Subscriber::channel();
        mux.register_client(task_id, "c1", sub).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().event, "connected");
        let first = rx.recv().await.unwrap();
        assert_eq!((first.event.as_str(), first.data.as_str()), ("task-stdout", "boot"));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event, "task-stderr");

        assert!(mux.has_session(task_id));
        assert_eq!(source.follow_count(), 1);
    }

    #[tokio::test]
    async fn test_one_stream_for_many_subscribers() {
        let source = Arc::new(FakeSource::new(Vec::new()));
        let mux = LogMux::new(source.clone(), 5000);
        let task_id = TaskId::new();

        let mut ids = Vec::new();
        let mut receivers = Vec::new();
        for _ in 0..3 {
            let (sub, rx) = Subscriber::channel();
            ids.push(sub.id());
            receivers.push(rx);
            mux.register_client(task_id, "c1", sub).await.unwrap();
        }

        assert_eq!(mux.subscriber_count(task_id), 3);
        assert_eq!(source.follow_count(), 1);

        // Session survives until the last subscriber leaves
        mux.remove_client(task_id, ids[0]);
        mux.remove_client(task_id, ids[1]);
        assert!(mux.has_session(task_id));

        mux.remove_client(task_id, ids[2]);
        assert!(!mux.has_session(task_id));
        assert_eq!(mux.subscriber_count(task_id), 0);
    }

    #[tokio::test]
    async fn test_stream_error_closes_session() {
        struct ErroringSource;

        #[async_trait]
        impl LogSource for ErroringSource {
            async fn fetch(&self, _container_id: &str, follow: bool) -> Result<LogFetch> {
                if follow {
                    Ok(LogFetch::Stream(
                        futures::stream::iter(vec![Err(Error::Stream("daemon reset".into()))])
                            .boxed(),
                    ))
                } else {
                    Ok(LogFetch::Buffer(Vec::new()))
                }
            }
        }

        let mux = LogMux::new(Arc::new(ErroringSource), 5000);
        let task_id = TaskId::new();
        let (sub, _rx) = Subscriber::channel();
        mux.register_client(task_id, "c1", sub).await.unwrap();

        // Give the reader task a chance to hit the error
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!mux.has_session(task_id));
        assert_eq!(mux.subscriber_count(task_id), 0);
    }

    #[tokio::test]
    async fn test_live_lines_fan_out_to_every_subscriber() {
        struct ScriptedSource {
            tx: Mutex<Option<tokio::sync::mpsc::UnboundedSender<Result<Frame>>>>,
        }

        #[async_trait]
        impl LogSource for ScriptedSource {
            async fn fetch(&self, _container_id: &str, follow: bool) -> Result<LogFetch> {
                if follow {
                    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
                    *self.tx.lock() = Some(tx);
                    Ok(LogFetch::Stream(receiver_stream(rx).boxed()))
                } else {
                    Ok(LogFetch::Buffer(Vec::new()))
                }
            }
        }

        let source = Arc::new(ScriptedSource {
            tx: Mutex::new(None),
        });
        let mux = LogMux::new(source.clone(), 5000);
        let task_id = TaskId::new();

        let (sub_a, mut rx_a) = Subscriber::channel();
        let (sub_b, mut rx_b) = Subscriber::channel();
        mux.register_client(task_id, "c1", sub_a).await.unwrap();
        mux.register_client(task_id, "c1", sub_b).await.unwrap();
        rx_a.recv().await.unwrap(); // connected
        rx_b.recv().await.unwrap();

        // Wait for the follow stream to attach, then emit one line
        let tx = loop {
            if let Some(tx) = source.tx.lock().clone() {
                break tx;
            }
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        };
        tx.send(Ok(Frame::stdout(b"compiling...\n".to_vec()))).unwrap();

        let a = rx_a.recv().await.unwrap();
        let b = rx_b.recv().await.unwrap();
        assert_eq!(a.data, "compiling...");
        assert_eq!(b.data, "compiling...");
    }

    #[tokio::test]
    async fn test_snapshot_line_split_across_frames() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&Frame::stdout(b"par".to_vec()).encode());
        buf.extend_from_slice(&Frame::stdout(b"tial line\n".to_vec()).encode());

        let mux = LogMux::new(Arc::new(FakeSource::new(buf)), 5000);
        let (sub, mut rx) = Subscriber::channel();
        mux.register_client(TaskId::new(), "c1", sub).await.unwrap();

        rx.recv().await.unwrap(); // connected
        assert_eq!(rx.recv().await.unwrap().data, "partial line");
    }
}
