//! Task, workspace, account and connection records
//!
//! These are views of rows owned by the persistence collaborator. The
//! orchestration layer mutates them exclusively through the store traits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// Lifecycle state of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskState {
    /// Accepted, container not yet provisioned
    Pending,

    /// Container provisioned and running
    Working,

    /// Build or provisioning failed
    Failed,
}

impl TaskState {
    pub fn is_pending(&self) -> bool {
        matches!(self, TaskState::Pending)
    }

    pub fn is_working(&self) -> bool {
        matches!(self, TaskState::Working)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TaskState::Failed)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            TaskState::Pending => "Pending",
            TaskState::Working => "Working",
            TaskState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Reference to a task's container.
///
/// `None` means the task was never provisioned; `Provisioning` means the
/// task was accepted but no container exists yet; `Id` holds a real daemon
/// identifier. A tagged enum rather than a sentinel string, so the two
/// "no container" cases cannot be confused with an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "status", content = "id", rename_all = "snake_case")]
pub enum ContainerRef {
    #[default]
    None,
    Provisioning,
    Id(String),
}

impl ContainerRef {
    /// The daemon identifier, if one exists
    pub fn id(&self) -> Option<&str> {
        match self {
            ContainerRef::Id(id) => Some(id),
            _ => None,
        }
    }

    pub fn is_provisioned(&self) -> bool {
        matches!(self, ContainerRef::Id(_))
    }
}

/// One agent run against a workspace, backed by zero or one live container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    /// Unique task identifier
    pub id: TaskId,

    /// Generated human-readable name
    pub name: String,

    /// Lifecycle state
    pub state: TaskState,

    /// Archived tasks are hidden and hold no container
    pub archived: bool,

    /// Container reference
    pub container: ContainerRef,

    /// Name the container was created under
    pub container_name: Option<String>,

    /// Workspace this task was provisioned from
    pub workspace_id: Uuid,

    /// LLM connection used inside the container
    pub connection_id: Uuid,

    /// Auth account for the source repository
    pub account_id: Option<Uuid>,

    /// Branch the task works on
    pub source_git_branch: Option<String>,

    /// When the task was created
    pub created_at: DateTime<Utc>,
}

impl TaskRecord {
    /// Create a new pending task
    pub fn new(name: impl Into<String>, workspace_id: Uuid, connection_id: Uuid) -> Self {
        Self {
            id: TaskId::new(),
            name: name.into(),
            state: TaskState::Pending,
            archived: false,
            container: ContainerRef::None,
            container_name: None,
            workspace_id,
            connection_id,
            account_id: None,
            source_git_branch: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_account(mut self, account_id: Uuid) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.source_git_branch = Some(branch.into());
        self
    }
}

/// Build/runtime template from which tasks are provisioned.
///
/// Immutable for the duration of one build.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceRecord {
    pub id: Uuid,

    pub name: String,

    /// Script run once after clone, inside the container
    pub setup_script: Option<String>,

    /// Validation script run after the agent finishes
    pub post_script: Option<String>,

    /// Extra descriptor commands, inserted verbatim after the fixed block
    pub custom_dockerfile_commands: Option<String>,

    /// Ordered environment entries passed to the container
    pub env_entries: Vec<(String, String)>,

    /// Paths cached between builds of this workspace
    pub cache_files: Vec<String>,

    /// Custom agent instructions baked into the image, when present
    pub agent_instructions: Option<String>,

    /// Clone source; tasks cannot be created without one
    pub source_repo_url: Option<String>,

    /// Template for per-task branch names
    pub git_branch_template: Option<String>,
}

impl WorkspaceRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            setup_script: None,
            post_script: None,
            custom_dockerfile_commands: None,
            env_entries: Vec::new(),
            cache_files: Vec::new(),
            agent_instructions: None,
            source_repo_url: None,
            git_branch_template: None,
        }
    }

    pub fn with_repo(mut self, url: impl Into<String>) -> Self {
        self.source_repo_url = Some(url.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_entries.push((key.into(), value.into()));
        self
    }

    pub fn with_setup_script(mut self, script: impl Into<String>) -> Self {
        self.setup_script = Some(script.into());
        self
    }
}

/// Auth account for a code-hosting provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: Uuid,
    pub login: String,
    pub git_name: Option<String>,
    pub git_email: Option<String>,
    pub access_token: Option<String>,
}

impl AccountRecord {
    pub fn new(login: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            login: login.into(),
            git_name: None,
            git_email: None,
            access_token: None,
        }
    }
}

/// LLM connection used by the agent inside the container
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub id: Uuid,
    pub provider: String,
    pub model: String,
    pub api_key: String,
}

impl ConnectionRecord {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider: provider.into(),
            model: model.into(),
            api_key: api_key.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_id_display_is_short() {
        let id = TaskId::new();
        assert_eq!(id.to_string().len(), 8);
    }

    #[test]
    fn test_container_ref_distinguishes_absent_from_provisioning() {
        assert_eq!(ContainerRef::None.id(), None);
        assert_eq!(ContainerRef::Provisioning.id(), None);
        assert_ne!(ContainerRef::None, ContainerRef::Provisioning);

        let provisioned = ContainerRef::Id("abc123".into());
        assert_eq!(provisioned.id(), Some("abc123"));
        assert!(provisioned.is_provisioned());
    }

    #[test]
    fn test_new_task_is_pending_without_container() {
        let ws = Uuid::new_v4();
        let conn = Uuid::new_v4();
        let task = TaskRecord::new("fix-login-flow", ws, conn);

        assert!(task.state.is_pending());
        assert!(!task.archived);
        assert_eq!(task.container, ContainerRef::None);
        assert!(task.container_name.is_none());
    }

    #[test]
    fn test_workspace_env_entries_preserve_order() {
        let ws = WorkspaceRecord::new("web")
            .with_env("A", "1")
            .with_env("B", "2")
            .with_env("A", "3");

        let keys: Vec<&str> = ws.env_entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["A", "B", "A"]);
    }
}
