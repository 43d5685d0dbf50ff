//! Store traits - persistence collaborator interfaces
//!
//! The database itself is an external collaborator; the orchestration layer
//! only sees these traits. `MemoryStore` is the reference implementation
//! used by tests and single-process embedders.

use crate::error::Result;
use crate::records::{AccountRecord, ConnectionRecord, ContainerRef, TaskId, TaskRecord, TaskState, WorkspaceRecord};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Persistence interface for task rows
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task row
    async fn insert(&self, task: TaskRecord) -> Result<()>;

    /// Fetch one task
    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>>;

    /// All non-archived tasks
    async fn list_active(&self) -> Result<Vec<TaskRecord>>;

    /// Update the lifecycle state
    async fn set_state(&self, id: TaskId, state: TaskState) -> Result<()>;

    /// Update the container reference and name
    async fn set_container(
        &self,
        id: TaskId,
        container: ContainerRef,
        container_name: Option<String>,
    ) -> Result<()>;

    /// Flip the archived flag
    async fn set_archived(&self, id: TaskId, archived: bool) -> Result<()>;

    /// Delete the row. Deleting an absent row is not an error.
    async fn remove(&self, id: TaskId) -> Result<()>;
}

/// Persistence interface for workspace templates
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    async fn insert(&self, workspace: WorkspaceRecord) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<WorkspaceRecord>>;
}

/// Persistence interface for auth accounts
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn insert(&self, account: AccountRecord) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<AccountRecord>>;
}

/// Persistence interface for LLM connections
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn insert(&self, connection: ConnectionRecord) -> Result<()>;
    async fn get(&self, id: Uuid) -> Result<Option<ConnectionRecord>>;
}

/// In-memory store backing all four interfaces
#[derive(Clone, Default)]
pub struct MemoryStore {
    tasks: Arc<RwLock<HashMap<TaskId, TaskRecord>>>,
    workspaces: Arc<RwLock<HashMap<Uuid, WorkspaceRecord>>>,
    accounts: Arc<RwLock<HashMap<Uuid, AccountRecord>>>,
    connections: Arc<RwLock<HashMap<Uuid, ConnectionRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of task rows currently stored
    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert(&self, task: TaskRecord) -> Result<()> {
        self.tasks.write().await.insert(task.id, task);
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<TaskRecord>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<TaskRecord>> {
        Ok(self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| !t.archived)
            .cloned()
            .collect())
    }

    async fn set_state(&self, id: TaskId, state: TaskState) -> Result<()> {
        if let Some(task) = self.tasks.write().await.get_mut(&id) {
            task.state = state;
        }
        Ok(())
    }

    async fn set_container(
        &self,
        id: TaskId,
        container: ContainerRef,
        container_name: Option<String>,
    ) -> Result<()> {
        if let Some(task) = self.tasks.write().await.get_mut(&id) {
            task.container = container;
            if container_name.is_some() {
                task.container_name = container_name;
            }
        }
        Ok(())
    }

    async fn set_archived(&self, id: TaskId, archived: bool) -> Result<()> {
        if let Some(task) = self.tasks.write().await.get_mut(&id) {
            task.archived = archived;
        }
        Ok(())
    }

    async fn remove(&self, id: TaskId) -> Result<()> {
        self.tasks.write().await.remove(&id);
        Ok(())
    }
}

#[async_trait]
impl WorkspaceStore for MemoryStore {
    async fn insert(&self, workspace: WorkspaceRecord) -> Result<()> {
        self.workspaces
            .write()
            .await
            .insert(workspace.id, workspace);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkspaceRecord>> {
        Ok(self.workspaces.read().await.get(&id).cloned())
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert(&self, account: AccountRecord) -> Result<()> {
        self.accounts.write().await.insert(account.id, account);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<AccountRecord>> {
        Ok(self.accounts.read().await.get(&id).cloned())
    }
}

#[async_trait]
impl ConnectionStore for MemoryStore {
    async fn insert(&self, connection: ConnectionRecord) -> Result<()> {
        self.connections
            .write()
            .await
            .insert(connection.id, connection);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ConnectionRecord>> {
        Ok(self.connections.read().await.get(&id).cloned())
    }
}
