//! Service bundle wired into the orchestration layer
//!
//! All collaborators are injected explicitly; nothing here is a process-wide
//! singleton, so tests construct isolated bundles around in-memory stores.

use dockhand_foundation::{
    AccountStore, ChangePublisher, Cloner, ConnectionStore, TaskNamer, TaskStore, WorkspaceStore,
};
use std::sync::Arc;

/// Shared collaborator handles
#[derive(Clone)]
pub struct Services {
    pub tasks: Arc<dyn TaskStore>,
    pub workspaces: Arc<dyn WorkspaceStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub connections: Arc<dyn ConnectionStore>,
    pub cloner: Arc<dyn Cloner>,
    pub namer: Arc<dyn TaskNamer>,
    pub publisher: Arc<dyn ChangePublisher>,
}
