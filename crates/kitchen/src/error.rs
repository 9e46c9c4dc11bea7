//! Error types for kitchen operations.
//!
//! Most variants are structural guards: they abort a deployment before
//! anything is sent to a remote host. Per-host attribute problems are not
//! errors at all; they surface as [`crate::DiscoveryWarning`]s.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while preparing a kitchen.
#[derive(Debug, Error)]
pub enum Error {
    /// Every discovered run list is empty
    #[error("You must specify at least one recipe or role")]
    EmptyRunLists,

    /// None of the configured kitchen paths exists
    #[error("No cookbooks found in {}", display_paths(.searched))]
    NoKitchenContent {
        /// Paths that were probed, relative to the project root
        searched: Vec<PathBuf>,
    },

    /// Both a Cheffile and a Berksfile exist while the tool is auto-discovered
    #[error("Multiple cookbook definitions found: Cheffile, Berksfile")]
    ConflictingManifests,

    /// The explicitly selected tool has no manifest in the project root
    #[error("No cookbook definitions found: {0}")]
    MissingManifest(&'static str),

    /// A cookbook dependency tool exited unsuccessfully
    #[error("{tool} failed: {stderr}")]
    ToolFailed {
        /// Executable that failed
        tool: &'static str,
        /// Standard error output of the failed invocation
        stderr: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Directory traversal error
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for kitchen operations.
pub type Result<T> = std::result::Result<T, Error>;

fn display_paths(paths: &[PathBuf]) -> String {
    let names: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
    format!("[{}]", names.join(", "))
}
