//! Project stores and the loader that builds them from disk.
//!
//! A project directory holds a `package.json` manifest:
//!
//! ```json
//! { "name": "checkout", "defaults": { "country": "US" }, "experiments": [ … ] }
//! ```
//!
//! `name` falls back to the directory name. A registry root may carry its own
//! manifest listing the projects it follows:
//!
//! ```json
//! { "able": ["acme/checkout", "https://github.com/acme/search/tree/prod"] }
//! ```
//!
//! Each entry resolves to `<root>/<repo>`.

use std::path::Path;
use std::path::PathBuf;

use futures::future::try_join_all;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Map;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::bundle::script_safe_json;
use crate::coordinate::RemoteCoordinate;
use crate::error::RegistryError;
use crate::error::Result;

/// Manifest file name for projects and for the registry root.
pub const MANIFEST_FILE: &str = "package.json";

#[derive(Debug, Deserialize)]
struct ProjectManifest {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    defaults: Map<String, Value>,
    #[serde(default)]
    experiments: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RegistryManifest {
    #[serde(default)]
    able: Option<Vec<String>>,
}

/// One project's defaults and experiments.
///
/// Immutable once built. The serialized forms used by bundles are computed
/// up front so bundle generation is a handful of string copies.
#[derive(Debug)]
pub struct ProjectStore {
    name: String,
    defaults: Map<String, Value>,
    experiments: Vec<Value>,
    defaults_json: String,
    experiments_json: String,
    origin: Option<RemoteCoordinate>,
    directory: Option<PathBuf>,
    /// `None` for the inert missing-project store.
    lifetime: Option<CancellationToken>,
}

impl ProjectStore {
    pub fn new(
        name: impl Into<String>,
        defaults: Map<String, Value>,
        experiments: Vec<Value>,
    ) -> Self {
        let defaults_json = script_safe_json(Value::Object(defaults.clone()).to_string());
        let experiments_json = script_safe_json(Value::Array(experiments.clone()).to_string());
        Self {
            name: name.into(),
            defaults,
            experiments,
            defaults_json,
            experiments_json,
            origin: None,
            directory: None,
            lifetime: Some(CancellationToken::new()),
        }
    }

    /// Stand-in returned for names the registry does not know: no defaults,
    /// no experiments, serializes to `[]`.
    pub fn missing() -> Self {
        Self {
            name: String::new(),
            defaults: Map::new(),
            experiments: Vec::new(),
            defaults_json: "{}".to_string(),
            experiments_json: "[]".to_string(),
            origin: None,
            directory: None,
            lifetime: None,
        }
    }

    fn with_origin(mut self, origin: Option<RemoteCoordinate>, directory: PathBuf) -> Self {
        self.origin = origin;
        self.directory = Some(directory);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn defaults(&self) -> &Map<String, Value> {
        &self.defaults
    }

    pub fn experiments(&self) -> &[Value] {
        &self.experiments
    }

    /// Canonical JSON text of the experiment list, embedded verbatim in bundles.
    pub fn serialize(&self) -> &str {
        &self.experiments_json
    }

    pub fn defaults_json(&self) -> &str {
        &self.defaults_json
    }

    /// Registry manifest entry this project was resolved from.
    pub fn origin(&self) -> Option<&RemoteCoordinate> {
        self.origin.as_ref()
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn is_missing(&self) -> bool {
        self.lifetime.is_none()
    }

    /// Release background work tied to this project. Idempotent; a no-op on
    /// the missing-project store.
    pub fn stop(&self) {
        if let Some(lifetime) = &self.lifetime
            && !lifetime.is_cancelled()
        {
            tracing::debug!(project = %self.name, "stopping project");
            lifetime.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.lifetime
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }

    /// Resolves once [`ProjectStore::stop`] has been called. Work spawned on
    /// behalf of a project should select on this to shut down with it.
    pub async fn stopped(&self) {
        match &self.lifetime {
            Some(lifetime) => lifetime.cancelled().await,
            None => std::future::pending().await,
        }
    }
}

/// Builds [`ProjectStore`]s from a registry root on disk.
#[derive(Debug, Clone)]
pub struct ProjectLoader {
    root: PathBuf,
}

impl ProjectLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory a registry manifest entry is checked out into.
    pub fn resolve(&self, entry: &RemoteCoordinate) -> PathBuf {
        self.root.join(&entry.repo)
    }

    /// Load a single project from `directory`, recording the manifest entry
    /// it came from when there is one.
    pub async fn load(
        &self,
        directory: &Path,
        entry: Option<RemoteCoordinate>,
    ) -> Result<ProjectStore> {
        let manifest_path = directory.join(MANIFEST_FILE);
        let manifest: ProjectManifest = read_manifest(&manifest_path).await?;

        let name = match manifest.name {
            Some(name) if !name.trim().is_empty() => name,
            _ => directory_name(directory)
                .ok_or_else(|| RegistryError::manifest(&manifest_path, "project has no name"))?,
        };

        tracing::debug!(
            project = %name,
            experiments = manifest.experiments.len(),
            dir = %directory.display(),
            "loaded project"
        );
        Ok(ProjectStore::new(name, manifest.defaults, manifest.experiments)
            .with_origin(entry, directory.to_path_buf()))
    }

    /// Load a project named by a registry manifest entry.
    pub async fn load_entry(&self, entry: RemoteCoordinate) -> Result<ProjectStore> {
        let directory = self.resolve(&entry);
        self.load(&directory, Some(entry)).await
    }

    /// Load every project under the root.
    ///
    /// Follows the registry manifest when the root has one with an `able`
    /// list, otherwise falls back to [`ProjectLoader::scan`].
    pub async fn load_all(&self) -> Result<Vec<ProjectStore>> {
        let manifest_path = self.root.join(MANIFEST_FILE);
        let manifest: Option<RegistryManifest> = if is_file(&manifest_path).await {
            Some(read_manifest(&manifest_path).await?)
        } else {
            None
        };

        match manifest.and_then(|manifest| manifest.able) {
            Some(entries) => self.follow(&manifest_path, entries).await,
            None => self.scan().await,
        }
    }

    /// Load every immediate subdirectory that contains a manifest.
    ///
    /// Loads run concurrently; the first failure fails the whole scan.
    pub async fn scan(&self) -> Result<Vec<ProjectStore>> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|source| RegistryError::io(&self.root, source))?;

        let mut directories = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|source| RegistryError::io(&self.root, source))?
        {
            let path = entry.path();
            if is_file(&path.join(MANIFEST_FILE)).await {
                directories.push(path);
            }
        }
        directories.sort();

        tracing::debug!(root = %self.root.display(), projects = directories.len(), "scanning");
        try_join_all(directories.iter().map(|dir| self.load(dir, None))).await
    }

    async fn follow(&self, manifest_path: &Path, entries: Vec<String>) -> Result<Vec<ProjectStore>> {
        let coordinates = entries
            .iter()
            .map(|entry| {
                RemoteCoordinate::parse(entry)
                    .map_err(|err| RegistryError::manifest(manifest_path, err.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(
            manifest = %manifest_path.display(),
            projects = coordinates.len(),
            "following registry manifest"
        );
        try_join_all(coordinates.into_iter().map(|entry| self.load_entry(entry))).await
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .is_ok_and(|metadata| metadata.is_file())
}

fn directory_name(directory: &Path) -> Option<String> {
    directory
        .file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
}

/// Missing or unparsable manifests are manifest errors; anything else the
/// filesystem reports is an I/O error.
async fn read_manifest<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(RegistryError::manifest(path, "manifest not found"));
        }
        Err(err) => return Err(RegistryError::io(path, err)),
    };
    serde_json::from_slice(&bytes).map_err(|err| RegistryError::manifest(path, err.to_string()))
}
