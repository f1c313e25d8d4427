//! Error types for cmdrelay-core
//!
//! Failures intrinsic to a spawned command (non-zero exit, stderr output) are
//! data and never show up here. Only failures to spawn, to stream or to find
//! a session are errors of this crate.

use thiserror::Error;

/// Core error type
#[derive(Debug, Error)]
pub enum Error {
    /// The shell command could not be started
    #[error("failed to spawn command: {0}")]
    Spawn(String),

    /// No session is registered under this identifier
    #[error("session not found: {0}")]
    UnknownSession(String),

    /// Malformed request (blank command text, bad identifier)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A session's process runner was started a second time
    #[error("process runner already started for session {0}")]
    AlreadyStarted(String),

    /// Append attempted after the terminal chunk was written
    #[error("output buffer is sealed")]
    BufferSealed,

    /// The service is shutting down and no longer accepts new sessions
    #[error("service is shutting down")]
    ShuttingDown,

    /// I/O error while talking to a child process
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the error was caused by the caller rather than the service.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::InvalidRequest(_) | Error::UnknownSession(_))
    }
}
