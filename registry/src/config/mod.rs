//! Configuration for the registry process
//!
//! Layered with the 12-factor app pattern:
//! 1. Defaults (from code)
//! 2. Config file (able.toml)
//! 3. Environment variables (ABLE_* prefix)
//!
//! # Example
//!
//! ```no_run
//! use able_registry::config::ConfigLoader;
//!
//! // Load from default locations
//! let config = ConfigLoader::load_default().expect("Failed to load config");
//!
//! // Or load from a specific file
//! let config = ConfigLoader::new()
//!     .with_file("./able.toml")
//!     .load()
//!     .expect("Failed to load config");
//! ```

pub mod error;
pub mod loader;

pub use error::{ConfigError, Result};
pub use loader::{AppConfig, BundleConfig, ConfigLoader, ProjectsConfig};
