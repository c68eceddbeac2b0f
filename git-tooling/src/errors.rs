use std::path::PathBuf;
use std::process::ExitStatus;
use std::string::FromUtf8Error;

use thiserror::Error;

/// Errors produced while synchronising a checkout with its remote.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to run git {args}: {source}")]
    Spawn {
        args: String,
        #[source]
        source: std::io::Error,
    },
    #[error("git {args} exited with {status}: {stderr}")]
    GitCommand {
        args: String,
        status: ExitStatus,
        stderr: String,
    },
    #[error("git output was not valid UTF-8: {0}")]
    GitOutputUtf8(#[from] FromUtf8Error),
    #[error("{} exists but is not a git checkout", path.display())]
    NotARepository { path: PathBuf },
    #[error("failed to prepare {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
