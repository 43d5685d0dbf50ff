//! Error types for Dockhand
//!
//! All errors are managed centrally. The taxonomy mirrors the tiers the
//! routing layer serves: validation and lookup failures are rejected before
//! any daemon resource is touched, daemon availability is surfaced
//! distinctly, and build/provisioning/stream failures carry enough context
//! for the task lifecycle to react.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Dockhand error type
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Request-tier failures (rejected before daemon work starts)
    // ========================================================================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // ========================================================================
    // Container daemon
    // ========================================================================
    #[error("Container daemon unavailable: {0}")]
    DaemonUnavailable(String),

    #[error("Image build failed: {}", .0.join("; "))]
    Build(Vec<String>),

    #[error("Provisioning failed: {0}")]
    Provisioning(String),

    // ========================================================================
    // Streaming
    // ========================================================================
    #[error("Stream error: {0}")]
    Stream(String),

    // ========================================================================
    // Configuration
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    // ========================================================================
    // External error conversions
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // Fallback
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status tier the routing layer should serve for this error
    pub fn http_status(&self) -> u16 {
        match self {
            Error::Validation(_) => 400,
            Error::NotFound(_) => 404,
            Error::DaemonUnavailable(_) => 503,
            _ => 500,
        }
    }

    /// Whether a retry could plausibly succeed without operator action
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::DaemonUnavailable(_) | Error::Stream(_))
    }

    /// Whether this error was raised before any daemon resource was allocated
    pub fn is_request_error(&self) -> bool {
        matches!(self, Error::Validation(_) | Error::NotFound(_))
    }

    /// Validation error helper
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Not-found error helper
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_tiers() {
        assert_eq!(Error::validation("missing repo").http_status(), 400);
        assert_eq!(Error::not_found("task").http_status(), 404);
        assert_eq!(Error::DaemonUnavailable("no socket".into()).http_status(), 503);
        assert_eq!(Error::Provisioning("start failed".into()).http_status(), 500);
    }

    #[test]
    fn test_build_error_message() {
        let err = Error::Build(vec!["step 3 failed".into(), "exit code 1".into()]);
        assert!(err.to_string().contains("step 3 failed"));
        assert!(err.to_string().contains("exit code 1"));
    }

    #[test]
    fn test_request_tier_predicate() {
        assert!(Error::validation("x").is_request_error());
        assert!(Error::not_found("x").is_request_error());
        assert!(!Error::Stream("x".into()).is_request_error());
    }
}
