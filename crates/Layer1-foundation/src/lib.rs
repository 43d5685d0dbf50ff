//! # dockhand-foundation
//!
//! Foundation layer for Dockhand:
//! - Error: centralized error taxonomy with HTTP-tier mapping
//! - Records: task/workspace/account/connection views of persisted rows
//! - Store: persistence collaborator traits + in-memory reference impl
//! - Collab: cloner and task-naming collaborator traits
//! - Event: change-notification bus consumed by UI subscribers
//! - Config: serde/TOML engine configuration

pub mod collab;
pub mod config;
pub mod error;
pub mod event;
pub mod records;
pub mod store;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Records
// ============================================================================
pub use records::{
    AccountRecord, ConnectionRecord, ContainerRef, TaskId, TaskRecord, TaskState, WorkspaceRecord,
};

// ============================================================================
// Stores & collaborators
// ============================================================================
pub use collab::{Cloner, TaskNamer};
pub use store::{AccountStore, ConnectionStore, MemoryStore, TaskStore, WorkspaceStore};

// ============================================================================
// Events & config
// ============================================================================
pub use config::{BuildConfig, DaemonConfig, EngineConfig, StreamConfig};
pub use event::{Change, ChangeBus, ChangeEvent, ChangeKind, ChangePublisher};
