//! The configuration collaborator and its implementations.
//!
//! The toolchain never touches `config.json` directly: it reads templates and
//! settings, and persists tool metadata and the remote-version cache, through
//! [`ConfigStore`].

use crate::dirs::{config_dir, ensure_dir, write_json_atomic};
use crate::metadata::{CachedVersions, ToolMetadata};
use crate::paths::normalize_root;
use crate::settings::{Settings, ToolTemplate};
use crate::{CACHE_FILENAME, CONFIG_FILENAME};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, info, warn};
use tvm_core::{Error, Result};

/// Key-value access to settings, tool metadata and the version cache.
pub trait ConfigStore: Send + Sync {
    /// Current global settings.
    fn settings(&self) -> Settings;

    /// The template for `tool`, if configured.
    fn tool_template(&self, tool: &str) -> Option<ToolTemplate> {
        self.settings().tool_templates.get(tool).cloned()
    }

    /// Names of all configured tools.
    fn tool_names(&self) -> Vec<String> {
        self.settings().tool_templates.keys().cloned().collect()
    }

    /// Update a tool's install root and persist it.
    fn set_tool_root(&self, tool: &str, root: &Path) -> Result<()>;

    /// Persisted metadata for `tool` (empty when never saved).
    fn tool_metadata(&self, tool: &str) -> ToolMetadata;

    /// Persist metadata for `tool`.
    fn save_tool_metadata(&self, tool: &str, metadata: &ToolMetadata) -> Result<()>;

    /// A cached version list.
    fn cache_get(&self, key: &str) -> Option<CachedVersions>;

    /// Store a version list in the cache (not yet persisted).
    fn cache_set(&self, key: &str, value: CachedVersions);

    /// Persist the cache.
    fn cache_save(&self) -> Result<()>;

    /// Drop every cached entry and persist the empty cache.
    fn clear_cache(&self) -> Result<()>;

    /// Directory for downloads in progress and the download history.
    fn data_dir(&self) -> PathBuf;
}

/// Shape of `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default = "Settings::builtin")]
    settings: Settings,
    #[serde(default)]
    tools: BTreeMap<String, ToolMetadata>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            settings: Settings::builtin(),
            tools: BTreeMap::new(),
        }
    }
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// [`ConfigStore`] backed by `config.json` and `cache.json` in one directory.
///
/// Every save replaces the file atomically.
#[derive(Debug)]
pub struct JsonConfigStore {
    dir: PathBuf,
    config: RwLock<ConfigFile>,
    cache: RwLock<BTreeMap<String, CachedVersions>>,
}

impl JsonConfigStore {
    /// Open the store in the default config directory.
    pub fn open_default() -> Result<Self> {
        Self::open(config_dir()?)
    }

    /// Open the store in `dir`, writing built-in defaults when no
    /// `config.json` exists yet.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        ensure_dir(&dir)?;

        let config_path = dir.join(CONFIG_FILENAME);
        let config = if config_path.exists() {
            load_config(&config_path)
        } else {
            info!("Creating default config at {}", config_path.display());
            let config = ConfigFile::default();
            write_json_atomic(&config_path, &config)?;
            config
        };
        let cache = load_cache(&dir.join(CACHE_FILENAME));

        Ok(Self {
            dir,
            config: RwLock::new(config),
            cache: RwLock::new(cache),
        })
    }

    /// Path of `config.json`.
    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CONFIG_FILENAME)
    }

    /// Path of `cache.json`.
    pub fn cache_path(&self) -> PathBuf {
        self.dir.join(CACHE_FILENAME)
    }

    /// Apply `f` to a copy of the config, persist it, then publish it.
    ///
    /// The in-memory state only changes when the write succeeds.
    fn update_config(&self, f: impl FnOnce(&mut ConfigFile) -> Result<()>) -> Result<()> {
        let mut guard = write_lock(&self.config);
        let mut next = guard.clone();
        f(&mut next)?;
        write_json_atomic(&self.config_path(), &next)?;
        *guard = next;
        Ok(())
    }
}

fn load_config(path: &Path) -> ConfigFile {
    let parsed = std::fs::read_to_string(path)
        .map_err(|e| e.to_string())
        .and_then(|s| serde_json::from_str::<ConfigFile>(&s).map_err(|e| e.to_string()));
    match parsed {
        Ok(config) => {
            debug!("Loaded config from {}", path.display());
            config
        }
        Err(e) => {
            warn!("Failed to load {}, using defaults: {}", path.display(), e);
            ConfigFile::default()
        }
    }
}

/// Load the cache, skipping entries that no longer parse.
fn load_cache(path: &Path) -> BTreeMap<String, CachedVersions> {
    let Ok(content) = std::fs::read_to_string(path) else {
        return BTreeMap::new();
    };
    let raw: BTreeMap<String, serde_json::Value> = match serde_json::from_str(&content) {
        Ok(raw) => raw,
        Err(e) => {
            warn!("Ignoring unreadable cache {}: {}", path.display(), e);
            return BTreeMap::new();
        }
    };
    raw.into_iter()
        .filter_map(|(key, value)| match serde_json::from_value(value) {
            Ok(entry) => Some((key, entry)),
            Err(e) => {
                debug!("Dropping cache entry {}: {}", key, e);
                None
            }
        })
        .collect()
}

impl ConfigStore for JsonConfigStore {
    fn settings(&self) -> Settings {
        read_lock(&self.config).settings.clone()
    }

    fn tool_template(&self, tool: &str) -> Option<ToolTemplate> {
        read_lock(&self.config)
            .settings
            .tool_templates
            .get(tool)
            .cloned()
    }

    fn set_tool_root(&self, tool: &str, root: &Path) -> Result<()> {
        let root = normalize_root(&root.to_string_lossy());
        self.update_config(|config| {
            let template = config
                .settings
                .tool_templates
                .get_mut(tool)
                .ok_or_else(|| Error::config(format!("no template configured for {tool}")))?;
            template.tool_root = root.to_string_lossy().into_owned();
            Ok(())
        })
    }

    fn tool_metadata(&self, tool: &str) -> ToolMetadata {
        read_lock(&self.config)
            .tools
            .get(tool)
            .cloned()
            .unwrap_or_default()
    }

    fn save_tool_metadata(&self, tool: &str, metadata: &ToolMetadata) -> Result<()> {
        self.update_config(|config| {
            config.tools.insert(tool.to_string(), metadata.clone());
            Ok(())
        })
    }

    fn cache_get(&self, key: &str) -> Option<CachedVersions> {
        read_lock(&self.cache).get(key).cloned()
    }

    fn cache_set(&self, key: &str, value: CachedVersions) {
        write_lock(&self.cache).insert(key.to_string(), value);
    }

    fn cache_save(&self) -> Result<()> {
        let cache = read_lock(&self.cache);
        write_json_atomic(&self.cache_path(), &*cache)
    }

    fn clear_cache(&self) -> Result<()> {
        info!("Clearing version cache");
        let mut cache = write_lock(&self.cache);
        cache.clear();
        write_json_atomic(&self.cache_path(), &*cache)
    }

    fn data_dir(&self) -> PathBuf {
        self.dir.clone()
    }
}

/// In-memory [`ConfigStore`] for tests and embedding.
#[derive(Debug)]
pub struct MemoryConfigStore {
    data_dir: PathBuf,
    settings: RwLock<Settings>,
    tools: RwLock<BTreeMap<String, ToolMetadata>>,
    cache: RwLock<BTreeMap<String, CachedVersions>>,
    metadata_saves: AtomicUsize,
    fail_metadata_saves: AtomicBool,
}

impl MemoryConfigStore {
    /// Create a store with `settings`, using `data_dir` for downloads.
    pub fn new(settings: Settings, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            settings: RwLock::new(settings),
            tools: RwLock::new(BTreeMap::new()),
            cache: RwLock::new(BTreeMap::new()),
            metadata_saves: AtomicUsize::new(0),
            fail_metadata_saves: AtomicBool::new(false),
        }
    }

    /// Add or replace a tool template.
    pub fn set_template(&self, tool: &str, template: ToolTemplate) {
        write_lock(&self.settings)
            .tool_templates
            .insert(tool.to_string(), template);
    }

    /// Number of `save_tool_metadata` calls so far.
    pub fn metadata_saves(&self) -> usize {
        self.metadata_saves.load(Ordering::SeqCst)
    }

    /// Make every later `save_tool_metadata` call fail while `fail` is set.
    pub fn fail_metadata_saves(&self, fail: bool) {
        self.fail_metadata_saves.store(fail, Ordering::SeqCst);
    }
}

impl ConfigStore for MemoryConfigStore {
    fn settings(&self) -> Settings {
        read_lock(&self.settings).clone()
    }

    fn set_tool_root(&self, tool: &str, root: &Path) -> Result<()> {
        let mut settings = write_lock(&self.settings);
        let template = settings
            .tool_templates
            .get_mut(tool)
            .ok_or_else(|| Error::config(format!("no template configured for {tool}")))?;
        template.tool_root = normalize_root(&root.to_string_lossy())
            .to_string_lossy()
            .into_owned();
        Ok(())
    }

    fn tool_metadata(&self, tool: &str) -> ToolMetadata {
        read_lock(&self.tools).get(tool).cloned().unwrap_or_default()
    }

    fn save_tool_metadata(&self, tool: &str, metadata: &ToolMetadata) -> Result<()> {
        if self.fail_metadata_saves.load(Ordering::SeqCst) {
            return Err(Error::config(format!("metadata for {tool} is read-only")));
        }
        write_lock(&self.tools).insert(tool.to_string(), metadata.clone());
        self.metadata_saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn cache_get(&self, key: &str) -> Option<CachedVersions> {
        read_lock(&self.cache).get(key).cloned()
    }

    fn cache_set(&self, key: &str, value: CachedVersions) {
        write_lock(&self.cache).insert(key.to_string(), value);
    }

    fn cache_save(&self) -> Result<()> {
        Ok(())
    }

    fn clear_cache(&self) -> Result<()> {
        write_lock(&self.cache).clear();
        Ok(())
    }

    fn data_dir(&self) -> PathBuf {
        self.data_dir.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{InstalledVersion, RemoteVersionEntry};
    use crate::versions_cache_key;
    use chrono::Utc;
    use tempfile::tempdir;

    #[test]
    fn test_open_writes_defaults() {
        let dir = tempdir().unwrap();
        let store = JsonConfigStore::open(dir.path()).unwrap();

        assert!(store.config_path().exists());
        assert!(store.tool_template("python").is_some());
        assert_eq!(store.settings().download_retry_count, 3);
        assert!(store.tool_metadata("python").installed_versions.is_empty());
    }

    #[test]
    fn test_metadata_persists_across_reopen() {
        let dir = tempdir().unwrap();
        let store = JsonConfigStore::open(dir.path()).unwrap();

        let mut meta = ToolMetadata::default();
        meta.installed_versions.push(InstalledVersion::new(
            "3.10.4",
            dir.path().join("python3104"),
            Utc::now(),
        ));
        meta.current_version = Some("3.10.4".to_string());
        store.save_tool_metadata("python", &meta).unwrap();

        let reopened = JsonConfigStore::open(dir.path()).unwrap();
        assert_eq!(reopened.tool_metadata("python"), meta);
    }

    #[test]
    fn test_set_tool_root() {
        let dir = tempdir().unwrap();
        let store = JsonConfigStore::open(dir.path()).unwrap();

        store
            .set_tool_root("java", Path::new("/opt/tools/./java"))
            .unwrap();
        let reopened = JsonConfigStore::open(dir.path()).unwrap();
        assert_eq!(
            reopened.tool_template("java").unwrap().root(),
            Some(PathBuf::from("/opt/tools/java"))
        );

        assert!(store.set_tool_root("cobol", Path::new("/opt")).is_err());
    }

    #[test]
    fn test_corrupt_config_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME), "{ not json").unwrap();

        let store = JsonConfigStore::open(dir.path()).unwrap();
        assert!(store.tool_template("node").is_some());
    }

    #[test]
    fn test_cache_roundtrip_and_clear() {
        let dir = tempdir().unwrap();
        let store = JsonConfigStore::open(dir.path()).unwrap();
        let key = versions_cache_key("python");

        store.cache_set(
            &key,
            CachedVersions::now(vec![RemoteVersionEntry {
                version: "3.11.0".to_string(),
                download_url: "https://example.com/3.11.0.zip".to_string(),
                release_date: None,
                lts: None,
            }]),
        );
        store.cache_save().unwrap();

        let reopened = JsonConfigStore::open(dir.path()).unwrap();
        assert_eq!(reopened.cache_get(&key).unwrap().versions.len(), 1);

        reopened.clear_cache().unwrap();
        let reopened = JsonConfigStore::open(dir.path()).unwrap();
        assert!(reopened.cache_get(&key).is_none());
    }

    #[test]
    fn test_bad_cache_entries_are_skipped() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CACHE_FILENAME),
            r#"{"python_versions": 42, "node_versions": {"last_update": "x", "versions": []}}"#,
        )
        .unwrap();

        let store = JsonConfigStore::open(dir.path()).unwrap();
        assert!(store.cache_get("python_versions").is_none());
        assert!(store.cache_get("node_versions").is_some());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryConfigStore::new(Settings::default(), "/tmp/tvm");
        store.set_template("go", ToolTemplate::default());

        assert_eq!(store.tool_names(), vec!["go".to_string()]);
        store.set_tool_root("go", Path::new("/opt/go")).unwrap();
        assert_eq!(
            store.tool_template("go").unwrap().root(),
            Some(PathBuf::from("/opt/go"))
        );

        store
            .save_tool_metadata("go", &ToolMetadata::default())
            .unwrap();
        assert_eq!(store.metadata_saves(), 1);
    }
}
