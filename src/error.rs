//! Error types for txpublish.
//!
//! All operations return `Result<T>` which aliases `Result<T, Error>`.

use std::path::PathBuf;
use thiserror::Error;

use crate::publish::Stage;

/// Errors from transactions and publish runs.
#[derive(Debug, Error)]
pub enum Error {
    /// A path that must stay inside the transaction root escapes it.
    #[error("Path {} is not relative to {}", .path.display(), .root.display())]
    PathOutsideRoot { path: PathBuf, root: PathBuf },

    /// Path exists but is neither a file, a directory, nor a symlink.
    #[error("Path {} is not a file or directory", .0.display())]
    InvalidFileType(PathBuf),

    /// No user with this name exists on the system.
    #[error("User '{0}' not found")]
    UnknownUser(String),

    /// No group with this name exists on the system.
    #[error("Group '{0}' not found")]
    UnknownGroup(String),

    /// User or group database lookup failed.
    #[cfg(unix)]
    #[error("Owner lookup failed: {0}")]
    Lookup(#[from] nix::errno::Errno),

    /// Operation has no implementation on the current platform.
    #[error("{0} is not implemented on this platform")]
    Unsupported(&'static str),

    /// A publish stage failed, either in the caller's logic or while
    /// committing its transaction. Displays as the underlying failure.
    #[error("{source}")]
    Stage {
        stage: Stage,
        #[source]
        source: Box<Error>,
    },

    /// Rolling back a stage failed.
    ///
    /// Supersedes the stage failure that triggered the rollback, which is
    /// kept as `cause`. Displays as the rollback failure.
    #[error("{error}")]
    Rollback {
        stage: Stage,
        error: Box<Error>,
        #[source]
        cause: Box<Error>,
    },

    /// A concurrent transaction task panicked or was cancelled.
    #[error("Transaction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// File system operation failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Failure raised by caller supplied stage logic.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Returns the stage failure that started a rollback, if this error is
    /// a rollback failure.
    pub fn rollback_cause(&self) -> Option<&Error> {
        match self {
            Error::Rollback { cause, .. } => Some(cause),
            _ => None,
        }
    }
}

/// Result type alias for txpublish operations.
pub type Result<T> = std::result::Result<T, Error>;
