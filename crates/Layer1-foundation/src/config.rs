//! Engine configuration
//!
//! Serde-backed config with sensible defaults; optionally loaded from a TOML
//! file. Every knob here has a default so embedders can start with
//! `EngineConfig::default()`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub daemon: DaemonConfig,
    pub build: BuildConfig,
    pub stream: StreamConfig,
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        toml::from_str(&contents).map_err(|e| Error::Config(e.to_string()))
    }
}

/// Container daemon connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Socket path override; local defaults are used when unset
    pub socket: Option<String>,

    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,

    /// Host socket path bind-mounted into task containers so nested tooling
    /// can reach the daemon
    pub host_socket_path: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket: None,
            connect_timeout_secs: 30,
            host_socket_path: "/var/run/docker.sock".to_string(),
        }
    }
}

/// Image build settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Base image all task images are derived from
    pub base_image: String,

    /// Use the BuildKit progress protocol instead of the classic one
    pub use_buildkit: bool,

    /// Prefix for container and image names
    pub name_prefix: String,

    /// Git identity fallbacks used when the account carries none
    pub git_name_fallback: String,
    pub git_email_fallback: String,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            base_image: "ubuntu:24.04".to_string(),
            use_buildkit: false,
            name_prefix: "dockhand".to_string(),
            git_name_fallback: "Dockhand Agent".to_string(),
            git_email_fallback: "agent@dockhand.local".to_string(),
        }
    }
}

/// Log streaming settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Cap on a pending (unterminated) line buffer, in characters
    pub pending_line_cap: usize,

    /// Capacity of instance event channels
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            pending_line_cap: 5000,
            channel_capacity: 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.stream.pending_line_cap, 5000);
        assert_eq!(config.daemon.host_socket_path, "/var/run/docker.sock");
        assert!(!config.build.use_buildkit);
    }

    #[test]
    fn test_load_partial_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dockhand.toml");
        std::fs::write(
            &path,
            "[build]\nbase_image = \"debian:12\"\nuse_buildkit = true\n",
        )
        .unwrap();

        let config = EngineConfig::load(&path).unwrap();
        assert_eq!(config.build.base_image, "debian:12");
        assert!(config.build.use_buildkit);
        // Untouched sections keep their defaults
        assert_eq!(config.stream.pending_line_cap, 5000);
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = EngineConfig::load("/nonexistent/dockhand.toml").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
