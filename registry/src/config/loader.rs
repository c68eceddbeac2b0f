use crate::config::error::{ConfigError, Result};
use crate::coordinate;
use crate::coordinate::RemoteCoordinate;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where projects live and where they come from
    #[serde(default)]
    pub projects: ProjectsConfig,

    /// Bundle generation settings
    #[serde(default)]
    pub bundle: BundleConfig,
}

/// Project source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectsConfig {
    /// Registry root on disk (relative paths resolve against the config file)
    #[serde(default = "default_projects_path")]
    pub path: PathBuf,

    /// Remote registry to follow (e.g. "acme/able-registry#prod").
    /// Without one the registry only scans `path` once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    /// Branch override for `registry`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    /// Seconds between pulls in watch mode
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

/// Bundle configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BundleConfig {
    /// Client runtime to prepend instead of the built-in one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub runtime_path: Option<PathBuf>,
}

fn default_projects_path() -> PathBuf {
    PathBuf::from("projects")
}
fn default_poll_interval_secs() -> u64 {
    30
}

impl Default for ProjectsConfig {
    fn default() -> Self {
        Self {
            path: default_projects_path(),
            registry: None,
            branch: None,
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl AppConfig {
    /// Remote registry coordinate with the branch override applied.
    pub fn remote(&self) -> Result<Option<RemoteCoordinate>> {
        let Some(registry) = self.projects.registry.as_deref() else {
            return Ok(None);
        };
        let coordinate = RemoteCoordinate::parse(registry)
            .map_err(|err| ConfigError::invalid("projects.registry", err.to_string()))?;
        Ok(Some(match &self.projects.branch {
            Some(branch) => coordinate.with_branch(branch.clone()),
            None => coordinate,
        }))
    }

    fn validate(&self) -> Result<()> {
        if self.projects.poll_interval_secs == 0 {
            return Err(ConfigError::invalid(
                "projects.poll_interval_secs",
                "must be at least 1",
            ));
        }
        if self.projects.path.as_os_str().is_empty() {
            return Err(ConfigError::invalid("projects.path", "must not be empty"));
        }
        if let Some(branch) = &self.projects.branch
            && branch.trim().is_empty()
        {
            return Err(ConfigError::invalid("projects.branch", "must not be empty"));
        }
        self.remote()?;
        Ok(())
    }

    /// Anchor relative paths at `base`.
    fn resolve_paths(&mut self, base: &Path) {
        if self.projects.path.is_relative() {
            self.projects.path = base.join(&self.projects.path);
        }
        if let Some(registry) = &self.projects.registry
            && coordinate::is_relative_path(registry)
        {
            let registry = registry.trim();
            let relative = registry.strip_prefix("./").unwrap_or(registry);
            self.projects.registry = Some(base.join(relative).to_string_lossy().into_owned());
        }
        if let Some(runtime) = &self.bundle.runtime_path
            && runtime.is_relative()
        {
            self.bundle.runtime_path = Some(base.join(runtime));
        }
    }
}

/// Configuration loader with layered merging support
pub struct ConfigLoader {
    config_path: Option<PathBuf>,
}

impl ConfigLoader {
    /// Create a new ConfigLoader
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration with layered merging:
    /// 1. Start with defaults (from Default implementations)
    /// 2. Merge config file if provided
    /// 3. Override with environment variables (ABLE_ prefix)
    pub fn load(&self) -> Result<AppConfig> {
        let mut builder = Config::builder();

        // Layer 1: Defaults (serialize defaults to JSON and load as base)
        let defaults_json = serde_json::to_string(&AppConfig::default())?;
        builder = builder.add_source(File::from_str(&defaults_json, config::FileFormat::Json));

        // Layer 2: Config file (if provided)
        if let Some(ref path) = self.config_path {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_ref()));
            } else {
                return Err(ConfigError::FileNotFound(path.clone()));
            }
        }

        // Layer 3: Environment variables (ABLE_ prefix, double underscore for nesting)
        // Example: ABLE_PROJECTS__POLL_INTERVAL_SECS=10
        builder = builder.add_source(
            Environment::with_prefix("ABLE")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let mut app_config: AppConfig = builder.build()?.try_deserialize()?;
        app_config.validate()?;

        if let Some(base) = self
            .config_path
            .as_deref()
            .and_then(Path::parent)
            .filter(|parent| !parent.as_os_str().is_empty())
        {
            app_config.resolve_paths(base);
        }

        Ok(app_config)
    }

    /// Locate the default config file in standard locations:
    /// 1. Current directory: ./able.toml
    /// 2. XDG config: ~/.config/able/config.toml
    pub fn find_config_file() -> Option<PathBuf> {
        let cwd_config = PathBuf::from("./able.toml");
        if cwd_config.exists() {
            return Some(cwd_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let xdg_config = config_dir.join("able").join("config.toml");
            if xdg_config.exists() {
                return Some(xdg_config);
            }
        }

        None
    }

    /// Load configuration from default locations
    pub fn load_default() -> Result<AppConfig> {
        let loader = if let Some(config_path) = Self::find_config_file() {
            ConfigLoader::new().with_file(config_path)
        } else {
            ConfigLoader::new()
        };

        loader.load()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serial_test::serial;
    use std::env;

    fn write_config(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("able.toml");
        std::fs::write(&path, content).expect("Failed to write temp file");
        path
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.projects.path, PathBuf::from("projects"));
        assert_eq!(config.projects.poll_interval_secs, 30);
        assert_eq!(config.projects.registry, None);
        assert_eq!(config.bundle.runtime_path, None);
    }

    #[test]
    #[serial]
    fn test_load_with_defaults_only() {
        let config = ConfigLoader::new().load().expect("Failed to load default config");
        assert_eq!(config.projects.path, PathBuf::from("projects"));
        assert_eq!(config.remote().unwrap(), None);
    }

    #[test]
    #[serial]
    fn test_load_with_toml_file_resolves_paths() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = write_config(
            temp_dir.path(),
            r#"
[projects]
path = "checkouts"
registry = "acme/able-registry#prod"
poll_interval_secs = 5

[bundle]
runtime_path = "runtime/able.js"
"#,
        );

        let config = ConfigLoader::new()
            .with_file(&config_path)
            .load()
            .expect("Failed to load config");

        assert_eq!(config.projects.path, temp_dir.path().join("checkouts"));
        assert_eq!(config.projects.poll_interval_secs, 5);
        assert_eq!(
            config.bundle.runtime_path,
            Some(temp_dir.path().join("runtime/able.js"))
        );
        let remote = config.remote().unwrap().expect("remote configured");
        assert_eq!(remote.url, "https://github.com/acme/able-registry");
        assert_eq!(remote.branch, "prod");
    }

    #[test]
    #[serial]
    fn test_absolute_paths_are_kept() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = write_config(temp_dir.path(), "[projects]\npath = \"/srv/able\"\n");

        let config = ConfigLoader::new().with_file(&config_path).load().unwrap();
        assert_eq!(config.projects.path, PathBuf::from("/srv/able"));
    }

    #[test]
    #[serial]
    fn test_relative_local_registry_resolves_against_config_dir() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = write_config(
            temp_dir.path(),
            "[projects]\nregistry = \"./mirror#prod\"\n",
        );

        let config = ConfigLoader::new().with_file(&config_path).load().unwrap();
        let remote = config.remote().unwrap().expect("remote configured");
        assert_eq!(remote.url, temp_dir.path().join("mirror").to_string_lossy());
        assert_eq!(remote.branch, "prod");
        assert_eq!(remote.repo, "mirror");
    }

    #[test]
    #[serial]
    fn test_branch_override() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = write_config(
            temp_dir.path(),
            "[projects]\nregistry = \"acme/able-registry#prod\"\nbranch = \"staging\"\n",
        );

        let config = ConfigLoader::new().with_file(&config_path).load().unwrap();
        assert_eq!(config.remote().unwrap().unwrap().branch, "staging");
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = write_config(temp_dir.path(), "[projects]\npoll_interval_secs = 5\n");

        unsafe {
            env::set_var("ABLE_PROJECTS__POLL_INTERVAL_SECS", "12");
        }
        let result = ConfigLoader::new().with_file(&config_path).load();
        unsafe {
            env::remove_var("ABLE_PROJECTS__POLL_INTERVAL_SECS");
        }

        assert_eq!(result.unwrap().projects.poll_interval_secs, 12);
    }

    #[test]
    #[serial]
    fn test_env_sets_registry() {
        unsafe {
            env::set_var("ABLE_PROJECTS__REGISTRY", "https://github.com/acme/flags");
        }
        let result = ConfigLoader::new().load();
        unsafe {
            env::remove_var("ABLE_PROJECTS__REGISTRY");
        }

        let remote = result.unwrap().remote().unwrap().expect("remote from env");
        assert_eq!(remote.repo, "flags");
        assert_eq!(remote.branch, "master");
    }

    #[test]
    fn test_missing_file_error() {
        let result = ConfigLoader::new()
            .with_file("/nonexistent/able.toml")
            .load();
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    #[serial]
    fn test_zero_poll_interval_rejected() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = write_config(temp_dir.path(), "[projects]\npoll_interval_secs = 0\n");

        let err = ConfigLoader::new()
            .with_file(&config_path)
            .load()
            .unwrap_err();
        assert!(
            matches!(
                err,
                ConfigError::InvalidValue {
                    key: "projects.poll_interval_secs",
                    ..
                }
            ),
            "{err:?}"
        );
    }

    #[test]
    #[serial]
    fn test_blank_branch_rejected() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = write_config(
            temp_dir.path(),
            "[projects]\nregistry = \"acme/able-registry\"\nbranch = \"  \"\n",
        );

        let err = ConfigLoader::new()
            .with_file(&config_path)
            .load()
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid value for projects.branch: must not be empty");
    }

    #[test]
    #[serial]
    fn test_bad_registry_rejected() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = write_config(temp_dir.path(), "[projects]\nregistry = \"nonsense\"\n");

        let err = ConfigLoader::new()
            .with_file(&config_path)
            .load()
            .unwrap_err();
        assert!(
            matches!(
                err,
                ConfigError::InvalidValue {
                    key: "projects.registry",
                    ..
                }
            ),
            "{err:?}"
        );
        assert!(err.to_string().contains("projects.registry"));
    }

    #[test]
    #[serial]
    fn test_invalid_toml_is_a_load_error() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config_path = write_config(temp_dir.path(), "[projects\npath = ");

        let err = ConfigLoader::new()
            .with_file(&config_path)
            .load()
            .unwrap_err();
        assert!(matches!(err, ConfigError::LoadError(_)), "{err:?}");
    }
}
