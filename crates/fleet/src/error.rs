//! Error types for remote operations.
//!
//! Failures are propagated as-is; nothing in this crate retries.

use thiserror::Error;

/// Errors that can occur while talking to hosts.
#[derive(Debug, Error)]
pub enum Error {
    /// A remote command exited unsuccessfully
    #[error("command failed on {host}: {stderr}")]
    RemoteCommand {
        /// Host the command ran on
        host: String,
        /// Standard error output of the command
        stderr: String,
    },

    /// The transport could not reach a host or spawn its client
    #[error("transport error for {host}: {message}")]
    Transport {
        /// Target host
        host: String,
        /// Description of the failure
        message: String,
    },

    /// Copying the archive or a generated file to a host failed
    #[error("transfer to {host} failed: {message}")]
    Transfer {
        /// Target host
        host: String,
        /// Description of the failure
        message: String,
    },

    /// A command on the control host failed
    #[error("local command failed: {command}: {stderr}")]
    LocalCommand {
        /// Command line, with secrets masked
        command: String,
        /// Standard error output of the command
        stderr: String,
    },

    /// Worker pool could not be created
    #[error("failed to create worker pool: {0}")]
    Pool(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for remote operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(e: rayon::ThreadPoolBuildError) -> Self {
        Self::Pool(e.to_string())
    }
}
