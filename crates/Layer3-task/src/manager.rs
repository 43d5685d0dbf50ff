//! Task Manager - the in-memory registry of task instances
//!
//! Reconciles registered instances against the task store at startup,
//! creates and launches tasks, and tears them down on archive/delete. Every
//! mutating operation for one task id runs under that id's keyed lock, so
//! concurrent launch/archive/delete calls cannot race each other.

use crate::instance::TaskInstance;
use crate::keyed_lock::KeyedLocks;
use crate::services::Services;
use bollard::container::RemoveContainerOptions;
use bollard::Docker;
use dockhand_build::{is_not_found, BuildBroadcaster, BuildStatus};
use dockhand_foundation::{
    Change, ChangeKind, ContainerRef, EngineConfig, Error, Result, TaskId, TaskRecord,
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Request to create a task
#[derive(Debug, Clone)]
pub struct CreateTaskRequest {
    pub workspace_id: Uuid,
    pub connection_id: Uuid,
    pub account_id: Option<Uuid>,

    /// Prompt handed to the naming service
    pub prompt: String,
}

/// Orchestrates task lifecycles against the container daemon
pub struct TaskManager {
    docker: Docker,
    config: EngineConfig,
    services: Services,
    broadcaster: Arc<BuildBroadcaster>,
    instances: RwLock<HashMap<TaskId, Arc<TaskInstance>>>,
    locks: KeyedLocks<TaskId>,
}

impl TaskManager {
    pub fn new(
        docker: Docker,
        config: EngineConfig,
        services: Services,
        broadcaster: Arc<BuildBroadcaster>,
    ) -> Self {
        Self {
            docker,
            config,
            services,
            broadcaster,
            instances: RwLock::new(HashMap::new()),
            locks: KeyedLocks::new(),
        }
    }

    /// Reconcile in-memory state with the store and the daemon.
    ///
    /// Loads every non-archived task, registers an instance for each, probes
    /// container liveness, and re-attaches I/O to containers confirmed
    /// alive. Instances whose container no longer exists are kept registered
    /// but marked not-existing; nothing is auto-deleted. Returns the number
    /// of registered instances.
    pub async fn initialize_from_store(&self) -> Result<usize> {
        let tasks = self.services.tasks.list_active().await?;
        let mut registered = 0;

        for task in tasks {
            let instance = self.register_instance(task.id).await;
            registered += 1;

            if instance.refresh_container_status().await {
                if let Err(e) = instance.attach().await {
                    warn!(task = %task.id, error = %e, "Re-attach failed during startup");
                }
            } else {
                debug!(task = %task.id, "Container absent at startup");
            }
        }

        info!(count = registered, "Task manager initialized");
        Ok(registered)
    }

    /// Validate and persist a new task, registering its instance.
    ///
    /// The workspace and connection must exist and the workspace must carry
    /// a source repository; the naming service must produce a name. All of
    /// these are request-tier failures - no daemon resource is touched.
    pub async fn create_task(&self, request: CreateTaskRequest) -> Result<TaskRecord> {
        let workspace = self
            .services
            .workspaces
            .get(request.workspace_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("workspace {}", request.workspace_id)))?;
        self.services
            .connections
            .get(request.connection_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("connection {}", request.connection_id)))?;

        if workspace
            .source_repo_url
            .as_deref()
            .unwrap_or("")
            .trim()
            .is_empty()
        {
            return Err(Error::validation("workspace has no source repository"));
        }

        let name = self
            .services
            .namer
            .name_task(&request.prompt)
            .await
            .map_err(|e| Error::validation(format!("task naming failed: {}", e)))?;

        let mut task = TaskRecord::new(name, request.workspace_id, request.connection_id);
        if let Some(account_id) = request.account_id {
            task.account_id = Some(account_id);
        }
        if let Some(template) = &workspace.git_branch_template {
            task.source_git_branch = Some(template.replace("{task}", &task.id.0.to_string()));
        }
        // Accepted but not yet provisioned
        task.container = ContainerRef::Provisioning;

        self.services.tasks.insert(task.clone()).await?;
        self.register_instance(task.id).await;

        self.services.publisher.publish(
            ChangeKind::Task,
            Change::Created,
            json!({"id": task.id.0, "name": task.name}),
        );
        info!(task = %task.id, name = %task.name, "Task created");
        Ok(task)
    }

    /// Provision the task's container.
    ///
    /// Build progress is fanned out under the task's id as the build-job id;
    /// the job is finalized with the build's outcome. On failure the task is
    /// left in whatever failed state provisioning set.
    pub async fn launch_task(&self, task_id: TaskId) -> Result<()> {
        let _guard = self.locks.lock(task_id).await;

        let instance = self
            .instance(task_id)
            .await
            .ok_or_else(|| Error::not_found(format!("task {}", task_id)))?;

        let job_id = task_id.0.to_string();
        let broadcaster = Arc::clone(&self.broadcaster);
        let job = job_id.clone();
        let sink = move |line: &str| broadcaster.log(&job, line);

        let result = instance.create_container(&job_id, &sink).await;
        self.broadcaster.finalize_job(
            &job_id,
            if result.is_ok() {
                BuildStatus::Success
            } else {
                BuildStatus::Fail
            },
        );

        match &result {
            Ok(()) => {
                self.services.publisher.publish(
                    ChangeKind::Task,
                    Change::Updated,
                    json!({"id": task_id.0}),
                );
            }
            Err(e) => {
                error!(task = %task_id, error = %e, "Launch failed");
            }
        }
        result
    }

    /// Archive a task, tearing its container down first.
    ///
    /// Idempotent: archiving an archived task returns Ok without a second
    /// teardown; an unknown id is NotFound.
    pub async fn archive_task(&self, task_id: TaskId) -> Result<()> {
        let guard = self.locks.lock(task_id).await;

        let task = self
            .services
            .tasks
            .get(task_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("task {}", task_id)))?;
        if task.archived {
            debug!(task = %task_id, "Already archived");
            return Ok(());
        }

        match self.instance(task_id).await {
            Some(instance) => {
                if let Err(e) = instance.remove_container().await {
                    warn!(task = %task_id, error = %e, "Container removal failed during archive");
                }
            }
            None => self.remove_container_direct(&task).await,
        }

        self.services.tasks.set_archived(task_id, true).await?;
        self.services
            .tasks
            .set_container(task_id, ContainerRef::None, None)
            .await?;
        self.instances.write().await.remove(&task_id);

        drop(guard);
        self.locks.retire(&task_id);

        self.services.publisher.publish(
            ChangeKind::Task,
            Change::Archived,
            json!({"id": task_id.0}),
        );
        info!(task = %task_id, "Task archived");
        Ok(())
    }

    /// Delete a task: tear the container down, then delete the row.
    ///
    /// An unknown id is NotFound with no side effects.
    pub async fn delete_task(&self, task_id: TaskId) -> Result<()> {
        let guard = self.locks.lock(task_id).await;

        let task = self.services.tasks.get(task_id).await?;
        let instance = self.instance(task_id).await;
        if task.is_none() && instance.is_none() {
            return Err(Error::not_found(format!("task {}", task_id)));
        }

        match instance {
            Some(instance) => instance.teardown().await?,
            None => {
                if let Some(task) = &task {
                    self.remove_container_direct(task).await;
                }
                self.services.tasks.remove(task_id).await?;
            }
        }
        self.instances.write().await.remove(&task_id);

        drop(guard);
        self.locks.retire(&task_id);

        self.services.publisher.publish(
            ChangeKind::Task,
            Change::Deleted,
            json!({"id": task_id.0}),
        );
        info!(task = %task_id, "Task deleted");
        Ok(())
    }

    /// Pure lookup; unknown ids yield None
    pub async fn get_task(&self, task_id: TaskId) -> Option<TaskRecord> {
        self.services.tasks.get(task_id).await.ok().flatten()
    }

    /// All non-archived tasks
    pub async fn list_tasks(&self) -> Result<Vec<TaskRecord>> {
        self.services.tasks.list_active().await
    }

    /// The registered instance for a task, if any
    pub async fn instance(&self, task_id: TaskId) -> Option<Arc<TaskInstance>> {
        self.instances.read().await.get(&task_id).cloned()
    }

    /// Number of registered instances
    pub async fn instance_count(&self) -> usize {
        self.instances.read().await.len()
    }

    async fn register_instance(&self, task_id: TaskId) -> Arc<TaskInstance> {
        let instance = Arc::new(TaskInstance::new(
            task_id,
            self.docker.clone(),
            self.config.clone(),
            self.services.clone(),
        ));
        self.instances
            .write()
            .await
            .insert(task_id, Arc::clone(&instance));
        instance
    }

    /// Container removal for tasks with no registered instance
    async fn remove_container_direct(&self, task: &TaskRecord) {
        let Some(container_id) = task.container.id() else {
            return;
        };
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
                warn!(container = %container_id, error = %e, "Direct container removal failed");
            }
        }
    }
}
