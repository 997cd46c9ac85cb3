//! Configuration and persisted state for tvm.
//!
//! This crate handles:
//! - Global settings and per-tool templates
//! - Installed-version metadata and the remote-version cache
//! - The [`ConfigStore`] collaborator the toolchain reads and writes through
//! - Default directories and root-path normalisation

pub mod dirs;
pub mod metadata;
pub mod paths;
pub mod settings;
pub mod store;

pub use dirs::{config_dir, ensure_dir, write_atomic, write_json_atomic};
pub use metadata::{CachedVersions, InstalledVersion, RemoteVersionEntry, ToolMetadata};
pub use paths::normalize_root;
pub use settings::{EnvRule, Settings, ToolTemplate, VersionFetchRule};
pub use store::{ConfigStore, JsonConfigStore, MemoryConfigStore};

/// The configuration filename.
pub const CONFIG_FILENAME: &str = "config.json";

/// The remote-version cache filename.
pub const CACHE_FILENAME: &str = "cache.json";

/// Build the cache key for a tool's remote version list.
pub fn versions_cache_key(tool: &str) -> String {
    format!("{tool}_versions")
}
