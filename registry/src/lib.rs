//! `able-registry`: experiment registry and client bundle assembly.
//!
//! Tracks a set of projects (experiments plus default targeting values),
//! keeps them in step with a remote git registry or a local directory, and
//! renders self-contained client bundles on request.
//!
//! ```no_run
//! # async fn example() -> able_registry::Result<()> {
//! use able_registry::Registry;
//! use able_registry::RemoteCoordinate;
//!
//! let registry = Registry::builder("/var/lib/able/projects")
//!     .with_remote(RemoteCoordinate::parse("acme/able-registry#prod")?)
//!     .build();
//! registry.load().await?;
//!
//! let js = registry.bundle("checkout", &serde_json::json!({"id": "u1"}));
//! # let _ = js;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::print_stdout, clippy::print_stderr)]

pub mod bundle;
pub mod config;
pub mod coordinate;
pub mod error;
pub mod project;
pub mod registry;

pub use able_git_tooling::GitSync;
pub use able_git_tooling::SourceSync;
pub use able_git_tooling::SyncError;
pub use bundle::BundleTemplate;
pub use coordinate::RemoteCoordinate;
pub use error::RegistryError;
pub use error::Result;
pub use project::ProjectLoader;
pub use project::ProjectStore;
pub use registry::PullOutcome;
pub use registry::Registry;
pub use registry::RegistryBuilder;
pub use registry::Snapshot;

/// Registry version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
