//! # dockhand-task
//!
//! Task orchestration for Dockhand. Turns a logical task into an ephemeral,
//! isolated container and fans its console output out to live observers.
//!
//! - Task instances own one container each: provisioning, attach/detach,
//!   stdin injection, teardown
//! - The task manager registers instances, reconciles against the store at
//!   startup, and serializes per-task lifecycle operations
//! - The log multiplexer serves snapshot-then-follow log streams to any
//!   number of subscribers over one daemon stream per task

pub mod instance;
pub mod keyed_lock;
pub mod logmux;
pub mod manager;
pub mod services;

pub use instance::{InstanceEvent, TaskInstance};
pub use keyed_lock::KeyedLocks;
pub use logmux::{DaemonLogSource, LogFetch, LogMux, LogSource};
pub use manager::{CreateTaskRequest, TaskManager};
pub use services::Services;
