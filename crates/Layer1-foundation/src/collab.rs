//! Collaborator interfaces consumed by the orchestration layer
//!
//! Implemented outside this workspace: the clone-URL resolver that talks to
//! the code-hosting provider and the LLM-backed task naming service.

use crate::error::Result;
use crate::records::{AccountRecord, WorkspaceRecord};
use async_trait::async_trait;

/// Resolves and verifies clone URLs for a workspace's source repository
#[async_trait]
pub trait Cloner: Send + Sync {
    /// Verify the URL can be cloned with the given credentials.
    ///
    /// A failure here is fatal to provisioning and must be raised before any
    /// daemon resource is allocated.
    async fn check_clonable(&self, url: &str) -> Result<()>;

    /// Resolve the authenticated clone URL for a workspace
    async fn clone_url(
        &self,
        workspace: &WorkspaceRecord,
        account: Option<&AccountRecord>,
    ) -> Result<String>;
}

/// LLM naming service generating human-readable task names
#[async_trait]
pub trait TaskNamer: Send + Sync {
    /// Generate a name for a task from its prompt.
    ///
    /// Failure is treated as a validation error by the caller, not a
    /// provisioning error.
    async fn name_task(&self, prompt: &str) -> Result<String>;
}
