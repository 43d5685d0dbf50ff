//! # dockhand-build
//!
//! Image build pipeline for Dockhand:
//! - Daemon connection with availability-aware error mapping
//! - Deterministic descriptor (Dockerfile) generation
//! - Ephemeral build-context assembly with guaranteed teardown
//! - Image builds over both classic and BuildKit progress protocols
//! - Per-job build progress broadcasting

pub mod builder;
pub mod context;
pub mod daemon;
pub mod dockerfile;
pub mod events;

pub use builder::{
    consume_build_progress, BuildOutcome, BuildRequest, ImageBuilder, ProgressSink,
};
pub use context::{BuildContext, ContextInputs};
pub use daemon::{connect, is_not_found, provisioning_error};
pub use dockerfile::{DescriptorInput, CONTEXT_FILES, FIXED_PACKAGES};
pub use events::{BuildBroadcaster, BuildStatus};
