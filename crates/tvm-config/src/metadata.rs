//! Persisted per-tool state: installed versions and the remote version cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Installed versions of one tool plus its current-version pointer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolMetadata {
    /// Installed versions in discovery order.
    #[serde(default)]
    pub installed_versions: Vec<InstalledVersion>,
    /// The version the tool's environment variables point at.
    #[serde(default)]
    pub current_version: Option<String>,
}

impl ToolMetadata {
    /// Find an installed version by version string.
    pub fn find(&self, version: &str) -> Option<&InstalledVersion> {
        self.installed_versions.iter().find(|v| v.version == version)
    }

    /// Find an installed version by version string, mutably.
    pub fn find_mut(&mut self, version: &str) -> Option<&mut InstalledVersion> {
        self.installed_versions
            .iter_mut()
            .find(|v| v.version == version)
    }

    /// Find an installed version by install path.
    pub fn find_by_path(&self, path: &Path) -> Option<&InstalledVersion> {
        self.installed_versions.iter().find(|v| v.path == path)
    }

    /// Insert or update the entry for `version`.
    ///
    /// An existing entry keeps its position and flags; only the path and
    /// install date are refreshed.
    pub fn upsert(&mut self, version: &str, path: PathBuf, install_date: DateTime<Utc>) {
        match self.find_mut(version) {
            Some(existing) => {
                existing.path = path;
                existing.install_date = install_date;
            }
            None => self
                .installed_versions
                .push(InstalledVersion::new(version, path, install_date)),
        }
    }

    /// Remove the entry for `version`, returning it.
    pub fn remove(&mut self, version: &str) -> Option<InstalledVersion> {
        let idx = self
            .installed_versions
            .iter()
            .position(|v| v.version == version)?;
        Some(self.installed_versions.remove(idx))
    }

    /// Whether `version` is the current version.
    pub fn is_current(&self, version: &str) -> bool {
        self.current_version.as_deref() == Some(version)
    }
}

/// A version installed under a tool's root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstalledVersion {
    /// Version string (e.g., "3.10.4").
    pub version: String,
    /// Installation directory.
    pub path: PathBuf,
    /// When the directory was installed or discovered.
    pub install_date: DateTime<Utc>,
    /// Locked versions cannot be deleted.
    #[serde(default)]
    pub locked: bool,
    /// Whether the environment currently points at this install.
    #[serde(default)]
    pub is_system: bool,
}

impl InstalledVersion {
    /// Create an unlocked, non-system entry.
    pub fn new(version: impl Into<String>, path: PathBuf, install_date: DateTime<Utc>) -> Self {
        Self {
            version: version.into(),
            path,
            install_date,
            locked: false,
            is_system: false,
        }
    }
}

/// A version available from a mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteVersionEntry {
    /// Version string.
    pub version: String,
    /// Archive download URL.
    pub download_url: String,
    /// Release date as published by the index.
    #[serde(default)]
    pub release_date: Option<String>,
    /// Long-term-support marker, when the index provides one.
    #[serde(default)]
    pub lts: Option<bool>,
}

impl RemoteVersionEntry {
    /// Whether the entry carries both a version and a download URL.
    pub fn is_valid(&self) -> bool {
        !self.version.trim().is_empty() && !self.download_url.trim().is_empty()
    }

    /// Whether the entry is marked LTS.
    pub fn is_lts(&self) -> bool {
        self.lts.unwrap_or(false)
    }
}

/// A cached remote version list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedVersions {
    /// RFC 3339 UTC timestamp of the fetch.
    pub last_update: String,
    /// The fetched versions.
    #[serde(default)]
    pub versions: Vec<RemoteVersionEntry>,
}

impl CachedVersions {
    /// Cache `versions` as fetched now.
    pub fn now(versions: Vec<RemoteVersionEntry>) -> Self {
        Self::at(Utc::now(), versions)
    }

    /// Cache `versions` as fetched at `when`.
    pub fn at(when: DateTime<Utc>, versions: Vec<RemoteVersionEntry>) -> Self {
        Self {
            last_update: when.to_rfc3339(),
            versions,
        }
    }

    /// When the list was fetched, if the timestamp parses.
    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(&self.last_update)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    /// Whether the list is younger than `expiry`. Unparseable timestamps are
    /// stale.
    pub fn is_fresh(&self, expiry: Duration) -> bool {
        let Some(updated) = self.updated_at() else {
            return false;
        };
        let Ok(expiry) = chrono::Duration::from_std(expiry) else {
            return true;
        };
        Utc::now().signed_duration_since(updated) < expiry
    }
}
