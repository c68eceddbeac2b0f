//! Git plumbing that keeps a local checkout in step with a remote branch.
//!
//! The registry only needs one primitive from git: make `local_dir` match
//! the tip of `branch` on `remote_url`, and say whether anything moved.
//! [`SourceSync`] is that seam; [`GitSync`] implements it on top of the
//! `git` command line.

mod errors;
mod sync;

pub use errors::SyncError;
pub use sync::GitSync;
pub use sync::SourceSync;
