use std::ffi::OsStr;
use std::ffi::OsString;
use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::SyncError;

/// Keeps a local directory in step with a remote branch.
///
/// Implementations are the only authority on whether the checkout changed;
/// callers must not re-derive that by diffing content.
#[async_trait]
pub trait SourceSync: Send + Sync {
    /// Clone `remote_url` into `local_dir` when it is absent, otherwise fetch
    /// `branch` and hard-reset to its tip. Returns `true` when the checked-out
    /// commit differs from the one present before the call (a fresh clone
    /// always counts as a change).
    async fn clone_or_fetch(
        &self,
        remote_url: &str,
        local_dir: &Path,
        branch: &str,
    ) -> Result<bool, SyncError>;
}

/// [`SourceSync`] backed by the `git` executable.
#[derive(Debug, Clone)]
pub struct GitSync {
    program: OsString,
}

impl GitSync {
    pub fn new() -> Self {
        Self {
            program: OsString::from("git"),
        }
    }

    /// Use a specific git binary instead of the one found on `PATH`.
    pub fn with_program(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn clone_fresh(
        &self,
        remote: &OsStr,
        local_dir: &Path,
        branch: &str,
    ) -> Result<(), SyncError> {
        if let Some(parent) = local_dir.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SyncError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        tracing::info!(remote = %remote.to_string_lossy(), branch, dir = %local_dir.display(), "cloning");
        self.run(
            None,
            [
                OsStr::new("clone"),
                OsStr::new("--quiet"),
                OsStr::new("--recurse-submodules"),
                OsStr::new("--branch"),
                OsStr::new(branch),
                OsStr::new("--"),
                remote,
                local_dir.as_os_str(),
            ],
        )
        .await?;
        Ok(())
    }

    /// Point `origin` at `remote`, fetch `branch` from it and hard-reset.
    async fn fetch_and_reset(
        &self,
        remote: &OsStr,
        local_dir: &Path,
        branch: &str,
    ) -> Result<bool, SyncError> {
        let before = self.head(local_dir).await?;

        tracing::debug!(remote = %remote.to_string_lossy(), branch, dir = %local_dir.display(), "fetching");
        self.run(
            Some(local_dir),
            [
                OsStr::new("remote"),
                OsStr::new("set-url"),
                OsStr::new("origin"),
                remote,
            ],
        )
        .await?;
        self.run(
            Some(local_dir),
            [
                OsStr::new("fetch"),
                OsStr::new("--quiet"),
                OsStr::new("origin"),
                OsStr::new(branch),
            ],
        )
        .await?;
        self.run(
            Some(local_dir),
            ["reset", "--quiet", "--hard", "FETCH_HEAD"].map(OsStr::new),
        )
        .await?;
        self.run(
            Some(local_dir),
            ["submodule", "update", "--quiet", "--init", "--recursive"].map(OsStr::new),
        )
        .await?;

        let after = self.head(local_dir).await?;
        if before != after {
            tracing::info!(%before, %after, dir = %local_dir.display(), "checkout moved");
        }
        Ok(before != after)
    }

    async fn head(&self, dir: &Path) -> Result<String, SyncError> {
        self.run(Some(dir), ["rev-parse", "HEAD"].map(OsStr::new))
            .await
    }

    /// Run git and return its trimmed stdout.
    async fn run<I, S>(&self, cwd: Option<&Path>, args: I) -> Result<String, SyncError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let args: Vec<OsString> = args
            .into_iter()
            .map(|arg| arg.as_ref().to_os_string())
            .collect();
        let display = args
            .iter()
            .map(|arg| arg.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");

        let mut command = Command::new(&self.program);
        command
            .args(&args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }

        let output = command.output().await.map_err(|source| SyncError::Spawn {
            args: display.clone(),
            source,
        })?;
        if !output.status.success() {
            return Err(SyncError::GitCommand {
                args: display,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }
}

impl Default for GitSync {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SourceSync for GitSync {
    async fn clone_or_fetch(
        &self,
        remote_url: &str,
        local_dir: &Path,
        branch: &str,
    ) -> Result<bool, SyncError> {
        let remote = resolve_remote(remote_url)?;
        let git_dir = local_dir.join(".git");
        let is_checkout = tokio::fs::try_exists(&git_dir)
            .await
            .map_err(|source| SyncError::Io {
                path: git_dir,
                source,
            })?;
        if is_checkout {
            return self.fetch_and_reset(&remote, local_dir, branch).await;
        }

        if !is_absent_or_empty(local_dir).await? {
            return Err(SyncError::NotARepository {
                path: local_dir.to_path_buf(),
            });
        }
        self.clone_fresh(&remote, local_dir, branch).await?;
        Ok(true)
    }
}

/// Anchor a relative local remote at the current directory. Git commands
/// inside the checkout would otherwise resolve it against the checkout.
fn resolve_remote(remote_url: &str) -> Result<OsString, SyncError> {
    if !is_relative_local(remote_url) {
        return Ok(OsString::from(remote_url));
    }
    std::path::absolute(remote_url)
        .map(PathBuf::into_os_string)
        .map_err(|source| SyncError::Io {
            path: PathBuf::from(remote_url),
            source,
        })
}

/// True for `mirror`, `./mirror`, `../mirror`; false for URLs, `host:path`
/// and absolute paths.
fn is_relative_local(remote_url: &str) -> bool {
    if remote_url.contains("://") {
        return false;
    }
    let first_segment = remote_url.split('/').next().unwrap_or_default();
    !first_segment.contains(':') && Path::new(remote_url).is_relative()
}

async fn is_absent_or_empty(dir: &Path) -> Result<bool, SyncError> {
    let io_err = |source| SyncError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(io_err(err)),
    };
    Ok(entries.next_entry().await.map_err(io_err)?.is_none())
}
