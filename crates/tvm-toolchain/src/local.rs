//! Local install discovery and metadata reconciliation.

use crate::environment::Environment;
use crate::known::{KnownTool, generic_output_pattern, version_from_folder};
use crate::lock::MetadataLocks;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use tvm_config::paths::same_path_loose;
use tvm_config::{ConfigStore, InstalledVersion, ToolMetadata, ToolTemplate};
use tvm_core::CommandRunner;
use tvm_telemetry::TimingGuard;

/// Upper bound for a version command.
pub const VERSION_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// An install directory found by a scan, before flags are attached.
#[derive(Debug, Clone)]
struct Discovered {
    version: String,
    path: PathBuf,
    install_date: DateTime<Utc>,
}

/// The install the environment currently points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemVersion {
    /// Version of the matched install, or as reported by the executable.
    pub version: Option<String>,
    /// The home path read from the environment.
    pub path: PathBuf,
}

/// Scans a tool's install root.
pub struct LocalScanner {
    config: Arc<dyn ConfigStore>,
    locks: Arc<MetadataLocks>,
    timeout: Duration,
}

impl LocalScanner {
    /// Create a scanner writing through `config` under `locks`.
    pub fn new(config: Arc<dyn ConfigStore>, locks: Arc<MetadataLocks>) -> Self {
        Self {
            config,
            locks,
            timeout: VERSION_COMMAND_TIMEOUT,
        }
    }

    /// Override the version command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Scan the install root of `tool` and reconcile the result into its
    /// metadata.
    ///
    /// Directories that fail inspection are logged and skipped.
    #[instrument(skip(self))]
    pub async fn scan_local_versions(&self, tool: &str) -> Vec<InstalledVersion> {
        let _timing = TimingGuard::new(format!("scan {tool}"));
        let Some(template) = self.config.tool_template(tool) else {
            warn!("No template configured for {}", tool);
            return Vec::new();
        };
        let Some(root) = template.root() else {
            info!("No install root configured for {}", tool);
            return Vec::new();
        };
        if !root.is_dir() {
            info!("Install root for {} does not exist: {}", tool, root.display());
            return Vec::new();
        }

        let dirs = match list_dirs(&root).await {
            Ok(dirs) => dirs,
            Err(e) => {
                warn!("Failed to read {}: {}", root.display(), e);
                return Vec::new();
            }
        };

        let mut discovered = Vec::new();
        for dir in dirs {
            match self.inspect(tool, &template, &dir).await {
                Ok(Some(found)) => discovered.push(found),
                Ok(None) => {}
                Err(e) => warn!("Skipping {}: {}", dir.display(), e),
            }
        }
        info!("Found {} local {} versions", discovered.len(), tool);

        let _guard = self.locks.lock(tool).await;
        let previous = self.config.tool_metadata(tool);
        let (scanned, metadata) = reconcile(&previous, discovered);
        if metadata != previous
            && let Err(e) = self.config.save_tool_metadata(tool, &metadata)
        {
            warn!("Failed to save {} metadata: {}", tool, e);
        }
        scanned
    }

    /// Inspect one directory. `Ok(None)` means it is not an install.
    async fn inspect(
        &self,
        tool: &str,
        template: &ToolTemplate,
        dir: &Path,
    ) -> std::io::Result<Option<Discovered>> {
        let Some(name) = dir.file_name().map(|n| n.to_string_lossy().into_owned()) else {
            return Ok(None);
        };
        if !is_valid_install(tool, dir) {
            debug!("{} is not a {} install", dir.display(), tool);
            return Ok(None);
        }

        let from_folder = version_from_folder(tool, &name);
        let detected = self.detect_version(tool, template, dir).await;
        let version = match (detected, from_folder) {
            (Some(detected), Some(folder)) => {
                if detected != folder {
                    info!(
                        "{}: folder says {} but the executable reports {}, using {}",
                        name, folder, detected, detected
                    );
                }
                detected
            }
            (Some(detected), None) => detected,
            (None, Some(folder)) => folder,
            (None, None) => {
                warn!("Could not determine the version in {}, skipping", dir.display());
                return Ok(None);
            }
        };

        let meta = tokio::fs::metadata(dir).await?;
        let install_date = meta
            .created()
            .or_else(|_| meta.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(Some(Discovered {
            version,
            path: dir.to_path_buf(),
            install_date,
        }))
    }

    /// Run the tool's version command against the install in `dir`.
    ///
    /// Returns `None` when no executable is found, the command fails or
    /// times out, or its output has no recognisable version.
    pub async fn detect_version(&self, tool: &str, template: &ToolTemplate, dir: &Path) -> Option<String> {
        let (executable, args, pattern) = version_command(tool, template, dir)?;
        if !executable.is_file() {
            debug!("No executable at {}", executable.display());
            return None;
        }

        let runner = CommandRunner::new().with_timeout(self.timeout);
        let output = match runner.run(executable.as_os_str(), args.iter().map(OsStr::new)).await {
            Ok(output) => output,
            Err(e) => {
                debug!("Version command for {} failed: {}", dir.display(), e);
                return None;
            }
        };

        let combined = output.combined();
        let version = pattern.captures(&combined)?.get(1)?.as_str().to_string();
        debug!("{} reports version {}", executable.display(), version);
        Some(version)
    }

    /// Flag the installed version whose path matches the tool's home
    /// variable as the system version, clearing the flag elsewhere.
    ///
    /// Metadata is only saved when a flag changed.
    #[instrument(skip(self, env))]
    pub async fn check_and_update_system_version(
        &self,
        tool: &str,
        env: &dyn Environment,
    ) -> Option<SystemVersion> {
        let (template, home) = self.home_from_env(tool, env)?;

        let guard = self.locks.lock(tool).await;
        let mut metadata = self.config.tool_metadata(tool);
        let mut changed = false;
        let mut matched = None;
        for installed in &mut metadata.installed_versions {
            let is_system = same_path_loose(&installed.path, &home);
            if is_system {
                matched = Some(installed.version.clone());
            }
            if installed.is_system != is_system {
                debug!("{} {} is_system -> {}", tool, installed.version, is_system);
                installed.is_system = is_system;
                changed = true;
            }
        }
        if changed {
            match self.config.save_tool_metadata(tool, &metadata) {
                Ok(()) => info!("Updated system version flags for {}", tool),
                Err(e) => warn!("Failed to save {} metadata: {}", tool, e),
            }
        }
        drop(guard);

        let version = match matched {
            Some(version) => Some(version),
            None => self.detect_version(tool, &template, &home).await,
        };
        Some(SystemVersion { version, path: home })
    }

    /// Version reported by the install the tool's home variable points at,
    /// without touching metadata.
    pub async fn system_version_from_env(&self, tool: &str, env: &dyn Environment) -> Option<String> {
        let (template, home) = self.home_from_env(tool, env)?;
        self.detect_version(tool, &template, &home).await
    }

    /// The tool's template and the home path its environment rule names.
    ///
    /// The home path is read from `env`, then from the process environment.
    fn home_from_env(&self, tool: &str, env: &dyn Environment) -> Option<(ToolTemplate, PathBuf)> {
        let template = self.config.tool_template(tool)?;
        let Some(rule) = template.env_rule.as_ref() else {
            debug!("No environment rule for {}", tool);
            return None;
        };
        let Some(home) = env
            .get_var(&rule.home_var)
            .or_else(|| std::env::var(&rule.home_var).ok())
            .filter(|v| !v.trim().is_empty())
        else {
            debug!("{} is not set", rule.home_var);
            return None;
        };
        Some((template, PathBuf::from(home)))
    }
}

/// Whether `dir` looks like an install of `tool`.
///
/// Known tools need their marker executable; anything else only needs the
/// directory to exist.
pub fn is_valid_install(tool: &str, dir: &Path) -> bool {
    match KnownTool::from_name(tool) {
        Some(known) => known.executable(dir).is_file(),
        None => dir.is_dir(),
    }
}

/// Executable, arguments and output pattern for the version command.
fn version_command(
    tool: &str,
    template: &ToolTemplate,
    dir: &Path,
) -> Option<(PathBuf, Vec<String>, &'static Regex)> {
    if let Some(known) = KnownTool::from_name(tool) {
        let args = known.version_args().iter().map(|a| a.to_string()).collect();
        return Some((known.executable(dir), args, known.output_pattern()));
    }

    let mut parts = template.version_cmd.split_whitespace();
    let program = parts.next()?;
    let args = parts.map(str::to_string).collect();
    let exe = |p: PathBuf| {
        if cfg!(windows) { p.with_extension("exe") } else { p }
    };
    let executable = [dir.join("bin").join(program), dir.join(program)]
        .into_iter()
        .map(exe)
        .find(|p| p.is_file())?;
    Some((executable, args, generic_output_pattern()))
}

/// Candidate install directories under `root`. Hidden entries are skipped;
/// they include the extractor's `.extract-*` scratch directories.
async fn list_dirs(root: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(root).await?;
    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        let path = entry.path();
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => dirs.push(path),
            Ok(_) => {}
            Err(e) => warn!("Skipping {}: {}", path.display(), e),
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Merge scan results into previously persisted metadata.
///
/// Returns the scanned entries (with flags) and the metadata to persist.
/// Entries matched by path keep their flags and position in the result;
/// new directories get default flags; directories that disappeared are
/// dropped. When the current version's directory now reports a different
/// version, the current-version pointer follows it.
fn reconcile(previous: &ToolMetadata, discovered: Vec<Discovered>) -> (Vec<InstalledVersion>, ToolMetadata) {
    let current = previous.current_version.clone();
    let current_path = current
        .as_deref()
        .and_then(|v| previous.find(v))
        .map(|v| v.path.clone());

    let scanned: Vec<InstalledVersion> = discovered
        .into_iter()
        .map(|found| {
            let existing = previous.find_by_path(&found.path);
            let locked = existing.is_some_and(|e| e.locked);
            let is_system = existing.is_some_and(|e| e.is_system)
                || current.as_deref() == Some(found.version.as_str());
            InstalledVersion {
                version: found.version,
                path: found.path,
                install_date: found.install_date,
                locked,
                is_system,
            }
        })
        .collect();

    let mut installed = Vec::with_capacity(scanned.len());
    for entry in &scanned {
        match previous.find_by_path(&entry.path) {
            Some(existing) => installed.push(InstalledVersion {
                version: entry.version.clone(),
                install_date: entry.install_date,
                ..existing.clone()
            }),
            None => installed.push(InstalledVersion::new(
                entry.version.clone(),
                entry.path.clone(),
                entry.install_date,
            )),
        }
    }

    let mut current_version = current;
    if let Some(path) = current_path
        && let Some(now) = installed.iter().find(|v| v.path == path)
        && current_version.as_deref() != Some(now.version.as_str())
    {
        info!(
            "Install at {} now reports {}, updating current version",
            path.display(),
            now.version
        );
        current_version = Some(now.version.clone());
    }

    (
        scanned,
        ToolMetadata {
            installed_versions: installed,
            current_version,
        },
    )
}
