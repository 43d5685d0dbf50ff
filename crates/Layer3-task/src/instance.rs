//! Task instance - one task's container
//!
//! Exclusively owns the live I/O handle to its container when attached, the
//! demultiplexed stdout/stderr event channel, and the container-exists flag.
//! Created when the manager registers a task, destroyed when the task is
//! archived or deleted.

use crate::services::Services;
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, InspectContainerOptions,
    RemoveContainerOptions, StartContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use dockhand_build::{is_not_found, BuildRequest, ImageBuilder, ProgressSink};
use dockhand_foundation::{ContainerRef, EngineConfig, Error, Result, TaskId, TaskState};
use dockhand_stream::{Frame, LineReassembler, StreamChannel};
use futures::StreamExt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Demultiplexed output of an attached container
#[derive(Debug, Clone)]
pub enum InstanceEvent {
    /// One reassembled stdout line
    Line(String),

    /// A stdout line that parsed as JSON
    Message(serde_json::Value),

    /// Raw stderr chunk, no line reassembly
    Stderr(Vec<u8>),
}

struct Attachment {
    input: Pin<Box<dyn AsyncWrite + Send>>,
    reader: JoinHandle<()>,
}

/// In-process owner of one task's container
pub struct TaskInstance {
    task_id: TaskId,
    docker: Docker,
    config: EngineConfig,
    services: Services,
    container_exists: AtomicBool,
    attachment: Mutex<Option<Attachment>>,
    events: broadcast::Sender<InstanceEvent>,
}

impl TaskInstance {
    pub fn new(task_id: TaskId, docker: Docker, config: EngineConfig, services: Services) -> Self {
        let (events, _) = broadcast::channel(config.stream.channel_capacity);
        Self {
            task_id,
            docker,
            config,
            services,
            container_exists: AtomicBool::new(false),
            attachment: Mutex::new(None),
            events,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Subscribe to demultiplexed container output
    pub fn subscribe(&self) -> broadcast::Receiver<InstanceEvent> {
        self.events.subscribe()
    }

    /// Whether the last probe confirmed a live container
    pub fn container_exists(&self) -> bool {
        self.container_exists.load(Ordering::SeqCst)
    }

    /// Probe the daemon for the task's container.
    ///
    /// This is a liveness probe, not an error-propagating call: any
    /// inspection failure counts as "does not exist".
    pub async fn refresh_container_status(&self) -> bool {
        let exists = match self.container_id().await {
            Some(id) => self
                .docker
                .inspect_container(&id, None::<InspectContainerOptions>)
                .await
                .is_ok(),
            None => false,
        };
        self.container_exists.store(exists, Ordering::SeqCst);
        exists
    }

    /// Provision the task's container: verify clonability, build the image,
    /// create and start the container, record its id.
    ///
    /// Build and provisioning failures transition the task to `Failed`; a
    /// partially created container is removed before the error is raised.
    pub async fn create_container(&self, job_id: &str, progress: &dyn ProgressSink) -> Result<()> {
        let task = self
            .services
            .tasks
            .get(self.task_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("task {}", self.task_id)))?;
        let workspace = self
            .services
            .workspaces
            .get(task.workspace_id)
            .await?
            .ok_or_else(|| Error::not_found("workspace"))?;
        let connection = self
            .services
            .connections
            .get(task.connection_id)
            .await?
            .ok_or_else(|| Error::not_found("connection"))?;
        let account = match task.account_id {
            Some(id) => self.services.accounts.get(id).await?,
            None => None,
        };

        // Clone resolution is fatal before any daemon resource is allocated
        let clone_url = self
            .services
            .cloner
            .clone_url(&workspace, account.as_ref())
            .await?;
        self.services.cloner.check_clonable(&clone_url).await?;

        let image_tag = format!("{}-task-{}", self.config.build.name_prefix, self.task_id);
        let builder = ImageBuilder::new(self.docker.clone(), self.config.build.clone());
        let build = builder
            .build_image(
                &BuildRequest {
                    workspace: &workspace,
                    account: account.as_ref(),
                    connection: &connection,
                    clone_url,
                    branch: task.source_git_branch.clone(),
                    image_tag,
                    job_id: job_id.to_string(),
                },
                progress,
            )
            .await;

        let outcome = match build {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(task = %self.task_id, error = %e, "Image build failed");
                self.services
                    .tasks
                    .set_state(self.task_id, TaskState::Failed)
                    .await?;
                return Err(e);
            }
        };

        match self.create_and_start(&task.name, &outcome.image_tag, &workspace.env_entries).await {
            Ok(container_id) => {
                self.services
                    .tasks
                    .set_container(
                        self.task_id,
                        ContainerRef::Id(container_id.clone()),
                        Some(self.container_name(&task.name)),
                    )
                    .await?;
                self.services
                    .tasks
                    .set_state(self.task_id, TaskState::Working)
                    .await?;
                self.container_exists.store(true, Ordering::SeqCst);
                info!(task = %self.task_id, container = %container_id, "Container running");
                Ok(())
            }
            Err(e) => {
                error!(task = %self.task_id, error = %e, "Provisioning failed");
                self.services
                    .tasks
                    .set_state(self.task_id, TaskState::Failed)
                    .await?;
                Err(e)
            }
        }
    }

    async fn create_and_start(
        &self,
        task_name: &str,
        image_tag: &str,
        env_entries: &[(String, String)],
    ) -> Result<String> {
        let env: Vec<String> = env_entries
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        // Bind-mount the host daemon socket so nested tooling inside the
        // container can also talk to the daemon.
        let socket = &self.config.daemon.host_socket_path;
        let config = Config {
            image: Some(image_tag.to_string()),
            env: Some(env),
            attach_stdin: Some(true),
            open_stdin: Some(true),
            host_config: Some(HostConfig {
                binds: Some(vec![format!("{}:/var/run/docker.sock", socket)]),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name: self.container_name(task_name),
            ..Default::default()
        };

        let created = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| Error::Provisioning(format!("create container: {}", e)))?;

        if let Err(e) = self
            .docker
            .start_container(&created.id, None::<StartContainerOptions<String>>)
            .await
        {
            // The container exists but never started; clean it up before
            // surfacing the failure.
            self.force_remove(&created.id).await;
            return Err(Error::Provisioning(format!("start container: {}", e)));
        }

        Ok(created.id)
    }

    /// Detach and force-remove the container, best-effort.
    ///
    /// "Not found" is swallowed; other removal errors are logged, never
    /// raised. The persisted container reference is cleared.
    pub async fn remove_container(&self) -> Result<()> {
        self.detach().await;

        if let Some(id) = self.container_id().await {
            self.force_remove(&id).await;
        }
        self.container_exists.store(false, Ordering::SeqCst);
        self.services
            .tasks
            .set_container(self.task_id, ContainerRef::None, None)
            .await?;
        Ok(())
    }

    /// Remove the container, then delete the persisted task row.
    ///
    /// Row deletion proceeds even when removal failed.
    pub async fn teardown(&self) -> Result<()> {
        if let Err(e) = self.remove_container().await {
            warn!(task = %self.task_id, error = %e, "Container removal failed during teardown");
        }
        self.services.tasks.remove(self.task_id).await?;
        Ok(())
    }

    async fn force_remove(&self, container_id: &str) {
        let result = self
            .docker
            .remove_container(
                container_id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;

        match result {
            Ok(()) => {}
            Err(e) if is_not_found(&e) => {
                debug!(container = %container_id, "Container already gone");
            }
            Err(e) => {
                warn!(container = %container_id, error = %e, "Container removal failed");
            }
        }
    }

    /// Attach to the container's combined I/O stream.
    ///
    /// Idempotent: attaching while attached, or with no container id
    /// recorded, is a no-op. Stdout is demultiplexed and line-reassembled;
    /// each line emits [`InstanceEvent::Line`] plus [`InstanceEvent::Message`]
    /// when it parses as JSON. Stderr chunks are emitted raw.
    pub async fn attach(&self) -> Result<()> {
        let mut attachment = self.attachment.lock().await;
        if attachment.is_some() {
            debug!(task = %self.task_id, "Already attached");
            return Ok(());
        }
        let Some(container_id) = self.container_id().await else {
            debug!(task = %self.task_id, "No container to attach to");
            return Ok(());
        };

        let results = self
            .docker
            .attach_container(
                &container_id,
                Some(AttachContainerOptions::<String> {
                    stdin: Some(true),
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(false),
                    detach_keys: None,
                }),
            )
            .await
            .map_err(|e| Error::Stream(format!("attach {}: {}", container_id, e)))?;

        let events = self.events.clone();
        let task_id = self.task_id;
        let cap = self.config.stream.pending_line_cap;
        let mut output = results.output;

        let reader = tokio::spawn(async move {
            let mut stdout_lines = LineReassembler::with_cap(cap);
            while let Some(item) = output.next().await {
                match item {
                    Ok(log) => {
                        let Some(frame) = Frame::from_log_output(log) else {
                            continue;
                        };
                        match frame.channel {
                            StreamChannel::Stdout => {
                                for line in stdout_lines.push(&frame.text()) {
                                    let _ = events.send(InstanceEvent::Line(line.clone()));
                                    if let Ok(value) =
                                        serde_json::from_str::<serde_json::Value>(&line)
                                    {
                                        let _ = events.send(InstanceEvent::Message(value));
                                    }
                                }
                            }
                            StreamChannel::Stderr => {
                                let _ = events.send(InstanceEvent::Stderr(frame.payload));
                            }
                        }
                    }
                    Err(e) => {
                        warn!(task = %task_id, error = %e, "Attach stream error");
                        break;
                    }
                }
            }
            debug!(task = %task_id, "Attach stream ended");
        });

        *attachment = Some(Attachment {
            input: results.input,
            reader,
        });
        info!(task = %self.task_id, container = %container_id, "Attached to container");
        Ok(())
    }

    /// Drop the attachment, stopping the reader task
    pub async fn detach(&self) {
        if let Some(attachment) = self.attachment.lock().await.take() {
            attachment.reader.abort();
            debug!(task = %self.task_id, "Detached from container");
        }
    }

    /// Write one newline-terminated JSON line to the attached stdin.
    ///
    /// A debug-logged no-op when not attached.
    pub async fn send_message(&self, payload: &serde_json::Value) -> Result<()> {
        let mut attachment = self.attachment.lock().await;
        let Some(attachment) = attachment.as_mut() else {
            debug!(task = %self.task_id, "send_message with no attachment");
            return Ok(());
        };

        let mut line = serde_json::to_vec(payload)?;
        line.push(b'\n');
        attachment
            .input
            .write_all(&line)
            .await
            .map_err(|e| Error::Stream(format!("write stdin: {}", e)))?;
        attachment
            .input
            .flush()
            .await
            .map_err(|e| Error::Stream(format!("flush stdin: {}", e)))?;
        Ok(())
    }

    fn container_name(&self, task_name: &str) -> String {
        let slug: String = task_name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    '-'
                }
            })
            .collect();
        format!("{}-{}-{}", self.config.build.name_prefix, slug, self.task_id)
    }

    async fn container_id(&self) -> Option<String> {
        let record = self.services.tasks.get(self.task_id).await.ok()??;
        record.container.id().map(|s| s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dockhand_foundation::{
        AccountRecord, ChangePublisher, Cloner, MemoryStore, Result as FoundationResult,
        TaskNamer, TaskRecord, TaskStore, WorkspaceRecord,
    };
    use std::sync::Arc;

    struct NoopPublisher;

    impl ChangePublisher for NoopPublisher {
        fn publish(
            &self,
            _kind: dockhand_foundation::ChangeKind,
            _change: dockhand_foundation::Change,
            _data: serde_json::Value,
        ) {
        }
    }

    struct FakeCloner;

    #[async_trait::async_trait]
    impl Cloner for FakeCloner {
        async fn check_clonable(&self, _url: &str) -> FoundationResult<()> {
            Ok(())
        }

        async fn clone_url(
            &self,
            workspace: &WorkspaceRecord,
            _account: Option<&AccountRecord>,
        ) -> FoundationResult<String> {
            Ok(workspace.source_repo_url.clone().unwrap_or_default())
        }
    }

    struct FakeNamer;

    #[async_trait::async_trait]
    impl TaskNamer for FakeNamer {
        async fn name_task(&self, _prompt: &str) -> FoundationResult<String> {
            Ok("generated".to_string())
        }
    }

    fn services(store: MemoryStore) -> Services {
        let store = Arc::new(store);
        Services {
            tasks: store.clone(),
            workspaces: store.clone(),
            accounts: store.clone(),
            connections: store,
            cloner: Arc::new(FakeCloner),
            namer: Arc::new(FakeNamer),
            publisher: Arc::new(NoopPublisher),
        }
    }

    fn docker() -> Docker {
        // Lazy client: nothing is contacted until a call is made
        Docker::connect_with_local_defaults().unwrap()
    }

    #[tokio::test]
    async fn test_attach_without_container_is_noop() {
        let store = MemoryStore::new();
        let task = TaskRecord::new("t", uuid::Uuid::new_v4(), uuid::Uuid::new_v4());
        let id = task.id;
        TaskStore::insert(&store, task).await.unwrap();

        let instance = TaskInstance::new(id, docker(), EngineConfig::default(), services(store));
        instance.attach().await.unwrap();
        assert!(!instance.container_exists());
    }

    #[tokio::test]
    async fn test_send_message_without_attachment_is_noop() {
        let store = MemoryStore::new();
        let task = TaskRecord::new("t", uuid::Uuid::new_v4(), uuid::Uuid::new_v4());
        let id = task.id;
        TaskStore::insert(&store, task).await.unwrap();

        let instance = TaskInstance::new(id, docker(), EngineConfig::default(), services(store));
        instance
            .send_message(&serde_json::json!({"type": "user-message"}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_refresh_without_container_id_is_false() {
        let store = MemoryStore::new();
        let task = TaskRecord::new("t", uuid::Uuid::new_v4(), uuid::Uuid::new_v4());
        let id = task.id;
        TaskStore::insert(&store, task).await.unwrap();

        let instance = TaskInstance::new(id, docker(), EngineConfig::default(), services(store));
        assert!(!instance.refresh_container_status().await);
    }

    #[tokio::test]
    async fn test_teardown_deletes_row_without_container() {
        let store = MemoryStore::new();
        let task = TaskRecord::new("t", uuid::Uuid::new_v4(), uuid::Uuid::new_v4());
        let id = task.id;
        TaskStore::insert(&store, task).await.unwrap();

        let services = services(store);
        let instance =
            TaskInstance::new(id, docker(), EngineConfig::default(), services.clone());
        instance.teardown().await.unwrap();

        assert!(services.tasks.get(id).await.unwrap().is_none());
    }

    #[test]
    fn test_container_name_is_sanitized() {
        let store = MemoryStore::new();
        let instance = TaskInstance::new(
            TaskId::new(),
            docker(),
            EngineConfig::default(),
            services(store),
        );
        let name = instance.container_name("Fix Login Flow!");
        assert!(name.starts_with("dockhand-fix-login-flow-"));
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-'));
    }
}
