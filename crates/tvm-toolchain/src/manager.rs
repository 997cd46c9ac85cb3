//! The orchestrator tying discovery, install and activation together.
//!
//! [`VersionManager`] owns the process-wide state (mirror health, the rate
//! limiter, per-tool metadata locks, the download history and the worker
//! pool) and hands it to the fetcher, scanner and installer it composes.
//! Every public operation validates its inputs first and reports failure as
//! `false`, `None` or an empty list, logging the reason.

use crate::download::{DownloadOptions, Installer};
use crate::environment::Environment;
use crate::history::{DownloadHistory, DownloadRecord};
use crate::http::HttpClients;
use crate::local::{LocalScanner, SystemVersion};
use crate::lock::MetadataLocks;
use crate::mirror::MirrorHealth;
use crate::rate_limit::RateLimiter;
use crate::remote::RemoteFetcher;
use crate::version::{VersionGroup, VersionLike, group_by_major, sort_desc};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use tvm_config::{ConfigStore, InstalledVersion, RemoteVersionEntry};
use tvm_core::{Result, validate};

/// Concurrent background downloads and fetches.
pub const WORKER_COUNT: usize = 4;

/// Facade over remote discovery, local scanning, installation and
/// environment switching.
pub struct VersionManager {
    config: Arc<dyn ConfigStore>,
    env: Arc<dyn Environment>,
    fetcher: RemoteFetcher,
    scanner: LocalScanner,
    installer: Installer,
    health: Arc<MirrorHealth>,
    history: Arc<DownloadHistory>,
    locks: Arc<MetadataLocks>,
    workers: Arc<Semaphore>,
}

impl VersionManager {
    /// Build a manager over `config` and `env` with default HTTP clients.
    pub fn new(config: Arc<dyn ConfigStore>, env: Arc<dyn Environment>) -> Result<Self> {
        Ok(Self::with_http(config, env, HttpClients::new()?))
    }

    /// Build a manager with explicit HTTP clients.
    pub fn with_http(config: Arc<dyn ConfigStore>, env: Arc<dyn Environment>, http: HttpClients) -> Self {
        let settings = config.settings();
        let limiter = Arc::new(RateLimiter::per_second(settings.request_rate_limit));
        let health = Arc::new(MirrorHealth::new());
        let locks = Arc::new(MetadataLocks::new());
        let history = Arc::new(DownloadHistory::open(&config.data_dir()));

        let fetcher = RemoteFetcher::new(config.clone(), http.clone(), limiter.clone(), health.clone());
        let scanner = LocalScanner::new(config.clone(), locks.clone());
        let installer = Installer::new(
            config.clone(),
            http,
            limiter,
            health.clone(),
            locks.clone(),
            history.clone(),
        );

        Self {
            config,
            env,
            fetcher,
            scanner,
            installer,
            health,
            history,
            locks,
            workers: Arc::new(Semaphore::new(WORKER_COUNT)),
        }
    }

    /// Shared mirror health.
    pub fn mirror_health(&self) -> &MirrorHealth {
        &self.health
    }

    /// The download installer.
    pub fn installer(&self) -> &Installer {
        &self.installer
    }

    /// Configured mirrors for `tool`, in configuration order.
    pub fn mirror_list(&self, tool: &str) -> Vec<String> {
        self.config
            .tool_template(tool)
            .map(|t| t.mirror_list)
            .unwrap_or_default()
    }

    /// Change the install root of `tool`.
    pub fn set_tool_root(&self, tool: &str, root: &Path) -> bool {
        if let Err(e) = validate::tool_name(tool).and_then(|_| validate::path(&root.to_string_lossy())) {
            error!("Invalid input: {}", e);
            return false;
        }
        match self.config.set_tool_root(tool, root) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to set the {} root: {}", tool, e);
                false
            }
        }
    }

    /// Installed versions of `tool`, reconciled into its metadata.
    pub async fn scan_local_versions(&self, tool: &str) -> Vec<InstalledVersion> {
        if let Err(e) = validate::tool_name(tool) {
            error!("Invalid input: {}", e);
            return Vec::new();
        }
        self.scanner.scan_local_versions(tool).await
    }

    /// Versions of `tool` available from its mirrors.
    pub async fn get_remote_versions(&self, tool: &str, use_cache: bool) -> Vec<RemoteVersionEntry> {
        if let Err(e) = validate::tool_name(tool) {
            error!("Invalid input: {}", e);
            return Vec::new();
        }
        self.fetcher.get_remote_versions(tool, use_cache).await
    }

    /// The remote entry for `version`, preferring cached lists.
    pub async fn get_version_info(&self, tool: &str, version: &str) -> Option<RemoteVersionEntry> {
        if let Err(e) = validate::tool_name(tool).and_then(|_| validate::version(version)) {
            error!("Invalid input: {}", e);
            return None;
        }
        self.fetcher
            .get_remote_versions(tool, true)
            .await
            .into_iter()
            .find(|v| v.version == version)
    }

    /// Drop every cached remote version list.
    pub fn clear_cache(&self) -> bool {
        self.fetcher.clear_cache()
    }

    /// Download and install `version` of `tool`.
    pub async fn download_version(&self, tool: &str, version: &str, options: &DownloadOptions) -> bool {
        if let Err(e) = validate_download(tool, version, options) {
            error!("Invalid input: {}", e);
            return false;
        }
        self.installer.download_version(tool, version, options).await
    }

    /// Run [`download_version`](Self::download_version) on the worker pool.
    ///
    /// At most [`WORKER_COUNT`] spawned downloads run at once; the rest wait
    /// for a permit.
    pub fn spawn_download(self: &Arc<Self>, tool: String, version: String, options: DownloadOptions) -> JoinHandle<bool> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let Ok(_permit) = manager.workers.clone().acquire_owned().await else {
                return false;
            };
            manager.download_version(&tool, &version, &options).await
        })
    }

    /// Point the environment at `version` of `tool` and make it current.
    ///
    /// Installed versions other than the previous and new current version
    /// are left untouched.
    #[instrument(skip(self))]
    pub async fn switch_version(&self, tool: &str, version: &str) -> bool {
        if let Err(e) = validate::tool_name(tool).and_then(|_| validate::version(version)) {
            error!("Invalid input: {}", e);
            return false;
        }

        let path = match self.config.tool_metadata(tool).find(version) {
            Some(installed) => installed.path.clone(),
            None => {
                info!("{} {} not in metadata, scanning", tool, version);
                match self
                    .scanner
                    .scan_local_versions(tool)
                    .await
                    .into_iter()
                    .find(|v| v.version == version)
                {
                    Some(installed) => installed.path,
                    None => {
                        error!("{} {} is not installed", tool, version);
                        return false;
                    }
                }
            }
        };

        let Some(rule) = self.config.tool_template(tool).and_then(|t| t.env_rule) else {
            error!("No environment rule for {}", tool);
            return false;
        };
        if rule.home_var.trim().is_empty() {
            error!("No home variable configured for {}", tool);
            return false;
        }
        let _guard = self.locks.lock(tool).await;
        let previous = self.config.tool_metadata(tool);
        let mut metadata = previous.clone();
        if let Some(current) = metadata.current_version.clone()
            && let Some(entry) = metadata.find_mut(&current)
        {
            entry.is_system = false;
        }
        if let Some(entry) = metadata.find_mut(version) {
            entry.is_system = true;
        }
        metadata.current_version = Some(version.to_string());
        if let Err(e) = self.config.save_tool_metadata(tool, &metadata) {
            error!("Failed to save {} metadata: {}", tool, e);
            return false;
        }

        if let Err(e) = self.env.setup_tool_env(&rule.home_var, &path, &rule.path_entries) {
            error!("Failed to set up the environment for {} {}: {}", tool, version, e);
            if let Err(e) = self.config.save_tool_metadata(tool, &previous) {
                error!("Failed to restore {} metadata: {}", tool, e);
            }
            return false;
        }
        info!("Switched {} to {}", tool, version);
        true
    }

    /// The current version of `tool`: the recorded pointer, else whatever
    /// the tool's home variable points at.
    pub async fn get_current_version(&self, tool: &str) -> Option<String> {
        if let Err(e) = validate::tool_name(tool) {
            error!("Invalid input: {}", e);
            return None;
        }
        if let Some(current) = self.config.tool_metadata(tool).current_version {
            return Some(current);
        }
        self.scanner.system_version_from_env(tool, self.env.as_ref()).await
    }

    /// Re-derive `is_system` flags from the tool's home variable.
    pub async fn check_and_update_system_version(&self, tool: &str) -> Option<SystemVersion> {
        if let Err(e) = validate::tool_name(tool) {
            error!("Invalid input: {}", e);
            return None;
        }
        self.scanner
            .check_and_update_system_version(tool, self.env.as_ref())
            .await
    }

    /// Set or clear the `locked` flag on an installed version.
    pub async fn lock_version(&self, tool: &str, version: &str, locked: bool) -> bool {
        if let Err(e) = validate::tool_name(tool).and_then(|_| validate::version(version)) {
            error!("Invalid input: {}", e);
            return false;
        }

        let _guard = self.locks.lock(tool).await;
        let mut metadata = self.config.tool_metadata(tool);
        let Some(entry) = metadata.find_mut(version) else {
            error!("{} {} not found", tool, version);
            return false;
        };
        entry.locked = locked;
        match self.config.save_tool_metadata(tool, &metadata) {
            Ok(()) => {
                info!("{} {} {}", if locked { "Locked" } else { "Unlocked" }, tool, version);
                true
            }
            Err(e) => {
                error!("Failed to save {} metadata: {}", tool, e);
                false
            }
        }
    }

    /// Remove an installed version from disk and from metadata.
    ///
    /// Locked and system versions are refused.
    #[instrument(skip(self))]
    pub async fn delete_version(&self, tool: &str, version: &str) -> bool {
        if let Err(e) = validate::tool_name(tool).and_then(|_| validate::version(version)) {
            error!("Invalid input: {}", e);
            return false;
        }

        let _guard = self.locks.lock(tool).await;
        let mut metadata = self.config.tool_metadata(tool);
        let Some(entry) = metadata.find(version) else {
            error!("{} {} not found", tool, version);
            return false;
        };
        if entry.locked {
            error!("{} {} is locked and cannot be deleted", tool, version);
            return false;
        }
        if entry.is_system {
            error!("{} {} is the system version and cannot be deleted", tool, version);
            return false;
        }

        let path = entry.path.clone();
        if path.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                error!("Failed to delete {}: {}", path.display(), e);
                return false;
            }
            info!("Deleted {}", path.display());
        } else {
            warn!("{} is already gone", path.display());
        }

        metadata.remove(version);
        if metadata.is_current(version) {
            metadata.current_version = None;
        }
        match self.config.save_tool_metadata(tool, &metadata) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to save {} metadata: {}", tool, e);
                false
            }
        }
    }

    /// Recent downloads, newest first.
    pub fn download_history(&self, tool: Option<&str>, limit: usize) -> Vec<DownloadRecord> {
        self.history.records(tool, limit)
    }

    /// Sort versions newest first.
    pub fn sort_versions_desc<T: VersionLike>(&self, mut versions: Vec<T>) -> Vec<T> {
        sort_desc(&mut versions);
        versions
    }

    /// Group versions by major version, newest major first.
    pub fn group_versions_by_major<T: VersionLike>(&self, versions: Vec<T>) -> Vec<VersionGroup<T>> {
        group_by_major(versions)
    }
}

fn validate_download(tool: &str, version: &str, options: &DownloadOptions) -> Result<()> {
    validate::tool_name(tool)?;
    validate::version(version)?;
    if let Some(info) = &options.version_info
        && !info.download_url.trim().is_empty()
    {
        validate::url(&info.download_url)?;
    }
    Ok(())
}
