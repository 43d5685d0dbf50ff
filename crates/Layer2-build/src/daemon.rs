//! Container daemon connection
//!
//! One place decides how daemon errors map onto the engine's taxonomy:
//! connection-level failures surface as `DaemonUnavailable` so callers can
//! show an actionable message instead of a generic 500.

use bollard::Docker;
use dockhand_foundation::{DaemonConfig, Error, Result};
use tracing::debug;

/// Connect to the container daemon and verify it responds
pub async fn connect(config: &DaemonConfig) -> Result<Docker> {
    let docker = match &config.socket {
        Some(path) => Docker::connect_with_socket(
            path,
            config.connect_timeout_secs,
            bollard::API_DEFAULT_VERSION,
        ),
        None => Docker::connect_with_local_defaults(),
    }
    .map_err(|e| Error::DaemonUnavailable(e.to_string()))?;

    docker
        .ping()
        .await
        .map_err(|e| Error::DaemonUnavailable(e.to_string()))?;

    debug!(socket = ?config.socket, "Connected to container daemon");
    Ok(docker)
}

/// Whether a daemon error is a plain 404
pub fn is_not_found(error: &bollard::errors::Error) -> bool {
    matches!(
        error,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Map a daemon call failure into the engine taxonomy
pub fn provisioning_error(context: &str, error: bollard::errors::Error) -> Error {
    Error::Provisioning(format!("{}: {}", context, error))
}
