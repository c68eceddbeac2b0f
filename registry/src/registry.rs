//! The live registry: a snapshot of every project, kept fresh from a remote
//! checkout or loaded once from a directory.
//!
//! # Consistency
//!
//! ```text
//! pull → sync checkout → changed? ─no──▶ keep snapshot
//!                            │yes
//!                            ▼
//!                 load every project (fail-fast)
//!                            │ok            │err
//!                            ▼              ▼
//!                  ArcSwap::store    keep snapshot, return error
//! ```
//!
//! Readers load the snapshot pointer without locking and always see either
//! the previous generation or the next one in full.

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use able_git_tooling::GitSync;
use able_git_tooling::SourceSync;
use arc_swap::ArcSwap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::bundle::BundleTemplate;
use crate::config::AppConfig;
use crate::config::ConfigError;
use crate::coordinate::RemoteCoordinate;
use crate::error::RegistryError;
use crate::error::Result;
use crate::project::ProjectLoader;
use crate::project::ProjectStore;

/// Delay between the end of one pull and the start of the next.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Project name → store. Replaced wholesale, never mutated.
pub type Snapshot = HashMap<String, Arc<ProjectStore>>;

/// What a successful [`Registry::pull`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullOutcome {
    /// The checkout did not move and a snapshot was already installed.
    Unchanged,
    /// A new snapshot with this many projects was installed.
    Reloaded { projects: usize },
}

/// Shared handle to the registry. Cloning is cheap and every clone sees the
/// same snapshot.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

struct Inner {
    project_dir: PathBuf,
    remote: Option<RemoteCoordinate>,
    sync: Arc<dyn SourceSync>,
    loader: ProjectLoader,
    template: BundleTemplate,
    poll_interval: Duration,
    snapshot: ArcSwap<Snapshot>,
    loaded: AtomicBool,
    /// Serialises pulls and scans so checkout writes never overlap reads.
    reload_lock: tokio::sync::Mutex<()>,
    /// Cancels the next scheduled pull; present only while watching.
    watch: Mutex<Option<CancellationToken>>,
    missing: Arc<ProjectStore>,
}

/// Builder for [`Registry`].
pub struct RegistryBuilder {
    project_dir: PathBuf,
    remote: Option<RemoteCoordinate>,
    sync: Option<Arc<dyn SourceSync>>,
    template: BundleTemplate,
    poll_interval: Duration,
}

impl RegistryBuilder {
    /// Follow a remote registry; without one the registry only scans
    /// `project_dir`.
    pub fn with_remote(mut self, remote: RemoteCoordinate) -> Self {
        self.remote = Some(remote);
        self
    }

    /// Replace the git-backed source sync.
    pub fn with_source_sync(mut self, sync: Arc<dyn SourceSync>) -> Self {
        self.sync = Some(sync);
        self
    }

    pub fn with_template(mut self, template: BundleTemplate) -> Self {
        self.template = template;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn build(self) -> Registry {
        let sync = self
            .sync
            .unwrap_or_else(|| Arc::new(GitSync::new()) as Arc<dyn SourceSync>);
        Registry {
            inner: Arc::new(Inner {
                loader: ProjectLoader::new(&self.project_dir),
                project_dir: self.project_dir,
                remote: self.remote,
                sync,
                template: self.template,
                poll_interval: self.poll_interval,
                snapshot: ArcSwap::from_pointee(Snapshot::new()),
                loaded: AtomicBool::new(false),
                reload_lock: tokio::sync::Mutex::new(()),
                watch: Mutex::new(None),
                missing: Arc::new(ProjectStore::missing()),
            }),
        }
    }
}

impl Registry {
    pub fn builder(project_dir: impl Into<PathBuf>) -> RegistryBuilder {
        RegistryBuilder {
            project_dir: project_dir.into(),
            remote: None,
            sync: None,
            template: BundleTemplate::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Build a registry from loaded configuration. Reads the custom bundle
    /// runtime, if one is configured, exactly once.
    pub async fn from_config(config: &AppConfig) -> std::result::Result<Self, ConfigError> {
        let mut builder = Self::builder(&config.projects.path)
            .with_poll_interval(Duration::from_secs(config.projects.poll_interval_secs));
        if let Some(remote) = config.remote()? {
            builder = builder.with_remote(remote);
        }
        if let Some(path) = &config.bundle.runtime_path {
            let template = BundleTemplate::from_file(path)
                .await
                .map_err(|err| match err {
                    RegistryError::Io { path, source } => ConfigError::Runtime { path, source },
                    other => ConfigError::LoadError(other.to_string()),
                })?;
            builder = builder.with_template(template);
        }
        Ok(builder.build())
    }

    pub fn project_dir(&self) -> &Path {
        &self.inner.project_dir
    }

    pub fn remote(&self) -> Option<&RemoteCoordinate> {
        self.inner.remote.as_ref()
    }

    pub fn poll_interval(&self) -> Duration {
        self.inner.poll_interval
    }

    /// True once any snapshot has been installed.
    pub fn is_loaded(&self) -> bool {
        self.inner.loaded.load(Ordering::Acquire)
    }

    pub fn is_watching(&self) -> bool {
        self.watch_slot().is_some()
    }

    /// Start the registry: watch the remote when one is configured,
    /// otherwise scan the project directory once.
    ///
    /// In watch mode the error of the first pull is returned but polling
    /// carries on regardless.
    pub async fn load(&self) -> Result<()> {
        if self.inner.remote.is_some() {
            self.watch().await.map(|_| ())
        } else {
            self.load_projects_from_directory().await.map(|_| ())
        }
    }

    /// Pull now, then keep pulling every poll interval until [`Registry::stop`].
    ///
    /// Replaces any earlier watch. A failed pull is logged and the schedule
    /// continues; the outcome of the immediate pull is returned.
    pub async fn watch(&self) -> Result<PullOutcome> {
        self.stop();
        let cancel = CancellationToken::new();
        *self.watch_slot() = Some(cancel.clone());

        let outcome = self.pull().await;
        if let Err(err) = &outcome {
            tracing::error!(error = %err, "registry pull failed");
        }

        if !cancel.is_cancelled() {
            tokio::spawn(poll_loop(
                Arc::downgrade(&self.inner),
                cancel,
                self.inner.poll_interval,
            ));
        }
        outcome
    }

    /// Cancel the next scheduled pull. A pull already running completes.
    pub fn stop(&self) {
        if let Some(cancel) = self.watch_slot().take() {
            tracing::debug!("stopping registry watch");
            cancel.cancel();
        }
    }

    /// Sync the checkout and reload every project if it changed.
    ///
    /// On error the current snapshot and loaded flag are left untouched.
    pub async fn pull(&self) -> Result<PullOutcome> {
        let remote = self
            .inner
            .remote
            .as_ref()
            .ok_or_else(|| RegistryError::NoRemote {
                project_dir: self.inner.project_dir.clone(),
            })?;

        let _reload = self.inner.reload_lock.lock().await;
        let changed = self
            .inner
            .sync
            .clone_or_fetch(&remote.url, &self.inner.project_dir, &remote.branch)
            .await
            .map_err(|source| RegistryError::Sync {
                url: remote.url.clone(),
                branch: remote.branch.clone(),
                source,
            })?;

        if !changed && self.is_loaded() {
            tracing::debug!(remote = %remote, "registry unchanged");
            return Ok(PullOutcome::Unchanged);
        }

        for project in self.all() {
            project.stop();
        }
        let projects = self.inner.loader.load_all().await?;
        let count = self.install(projects)?;
        Ok(PullOutcome::Reloaded { projects: count })
    }

    /// Load every project directory under the project root and install the
    /// result. Any single failure aborts the whole load.
    pub async fn load_projects_from_directory(&self) -> Result<usize> {
        let _reload = self.inner.reload_lock.lock().await;
        let projects = self.inner.loader.scan().await?;
        self.install(projects)
    }

    /// Current snapshot; stays consistent for as long as it is held.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.snapshot.load_full()
    }

    pub fn all(&self) -> Vec<Arc<ProjectStore>> {
        self.snapshot().values().cloned().collect()
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<ProjectStore>> {
        self.inner.snapshot.load().get(name).cloned()
    }

    /// Like [`Registry::lookup`], but unknown names yield an empty store.
    pub fn project(&self, name: &str) -> Arc<ProjectStore> {
        self.lookup(name)
            .unwrap_or_else(|| Arc::clone(&self.inner.missing))
    }

    pub fn experiments(&self, name: &str) -> Vec<Value> {
        self.project(name).experiments().to_vec()
    }

    /// Client bundle for `name`, personalised with `subject`.
    pub fn bundle(&self, name: &str, subject: &Value) -> String {
        let project = self.project(name);
        let now = chrono::Utc::now().timestamp_millis();
        self.inner.template.render(&project, subject, now)
    }

    fn install(&self, projects: Vec<ProjectStore>) -> Result<usize> {
        let mut snapshot = Snapshot::with_capacity(projects.len());
        for project in projects {
            if let Some(previous) = snapshot.get(project.name()) {
                let path = project
                    .directory()
                    .map(Path::to_path_buf)
                    .unwrap_or_default();
                return Err(RegistryError::manifest(
                    path,
                    format!(
                        "duplicate project name {:?} (also defined in {})",
                        project.name(),
                        previous
                            .directory()
                            .map(|dir| dir.display().to_string())
                            .unwrap_or_default()
                    ),
                ));
            }
            snapshot.insert(project.name().to_string(), Arc::new(project));
        }

        let count = snapshot.len();
        self.inner.snapshot.store(Arc::new(snapshot));
        self.inner.loaded.store(true, Ordering::Release);
        tracing::info!(projects = count, dir = %self.inner.project_dir.display(), "registry loaded");
        Ok(count)
    }

    fn watch_slot(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.inner
            .watch
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("project_dir", &self.inner.project_dir)
            .field("remote", &self.inner.remote)
            .field("loaded", &self.is_loaded())
            .field("projects", &self.inner.snapshot.load().len())
            .finish()
    }
}

/// Sleep, pull, repeat. Holds only a weak handle so dropping every
/// [`Registry`] ends the loop at its next wake-up.
async fn poll_loop(inner: Weak<Inner>, cancel: CancellationToken, interval: Duration) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        let registry = Registry { inner };
        match registry.pull().await {
            Ok(PullOutcome::Reloaded { projects }) => {
                tracing::info!(projects, "registry reloaded");
            }
            Ok(PullOutcome::Unchanged) => {}
            Err(err) => tracing::error!(error = %err, "registry pull failed"),
        }
    }
    tracing::debug!("registry watch loop exited");
}
