//! Error types for devlog storage
//!
//! Centralized error handling using thiserror.

use std::time::Duration;

use thiserror::Error;

/// All error types that can occur while storing or syncing devlog entries
#[derive(Debug, Error)]
pub enum DevlogError {
    /// Entry, issue or file is absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Title+type collision on create
    #[error("Duplicate entry: {0}")]
    Duplicate(String),

    /// The ID allocator could not take its lock file
    #[error("Timed out acquiring lock {path} after {attempts} attempts")]
    LockTimeout { path: String, attempts: u32 },

    /// Missing driver, unreachable database, remote or API
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// GitHub quota exhausted after all configured retries
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Unparsable counter, index, entry or conflict content
    #[error("Malformed data: {0}")]
    MalformedData(String),

    /// Identifier could not be parsed or is the wrong variant for a backend
    #[error("Invalid id: {0}")]
    InvalidId(String),

    /// Git command exited non-zero
    #[error("git {command} failed: {stderr}")]
    Git { command: String, stderr: String },

    /// GitHub REST call returned an error status
    #[error("GitHub API error {status}: {message}")]
    GitHub { status: u16, message: String },

    /// Storage or application configuration is invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider used before `initialize()`
    #[error("Provider not initialized: {0}")]
    NotInitialized(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Embedded database error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl DevlogError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DevlogError::NotFound(_))
    }

    /// Whether a retry of the same call could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            DevlogError::RateLimited { .. } => true,
            DevlogError::LockTimeout { .. } => true,
            DevlogError::GitHub { status, .. } => *status >= 500,
            DevlogError::Http(_) => true,
            _ => false,
        }
    }
}

/// Result type alias for devlog operations
pub type Result<T> = std::result::Result<T, DevlogError>;
