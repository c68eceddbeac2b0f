use std::path::PathBuf;

use able_git_tooling::SyncError;
use thiserror::Error;

/// Registry result type alias
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Failures surfaced while syncing, scanning or loading projects.
///
/// Lookups and bundle generation never produce these; only the operations
/// that touch the remote or the disk do.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to sync {url} ({branch}): {source}")]
    Sync {
        url: String,
        branch: String,
        #[source]
        source: SyncError,
    },

    #[error("invalid manifest {}: {reason}", path.display())]
    Manifest { path: PathBuf, reason: String },

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid remote coordinate {input:?}: {reason}")]
    Coordinate { input: String, reason: String },

    #[error("registry at {} has no remote configured", project_dir.display())]
    NoRemote { project_dir: PathBuf },
}

impl RegistryError {
    pub(crate) fn manifest(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        RegistryError::Manifest {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RegistryError::Io {
            path: path.into(),
            source,
        }
    }
}
