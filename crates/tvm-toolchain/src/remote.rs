//! Remote version discovery across mirrors.
//!
//! Each mirror is asked for a version list, either by scraping its HTML
//! listing with a regex or by reading a JSON index. The first mirror that
//! yields a non-empty validated list wins and the result is cached.

use crate::error::FetchError;
use crate::http::HttpClients;
use crate::known::KnownTool;
use crate::mirror::MirrorHealth;
use crate::rate_limit::RateLimiter;
use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use tvm_config::{
    CachedVersions, ConfigStore, RemoteVersionEntry, ToolTemplate, VersionFetchRule,
    versions_cache_key,
};

/// A version read from a mirror, before its download URL is built.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListedVersion {
    pub version: String,
    pub lts: Option<bool>,
    pub release_date: Option<String>,
}

impl ListedVersion {
    fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            ..Default::default()
        }
    }
}

/// Fetches and caches remote version lists.
pub struct RemoteFetcher {
    config: Arc<dyn ConfigStore>,
    http: HttpClients,
    limiter: Arc<RateLimiter>,
    health: Arc<MirrorHealth>,
    memory: DashMap<String, CachedVersions>,
}

impl RemoteFetcher {
    /// Create a fetcher sharing the given limiter and mirror health.
    pub fn new(
        config: Arc<dyn ConfigStore>,
        http: HttpClients,
        limiter: Arc<RateLimiter>,
        health: Arc<MirrorHealth>,
    ) -> Self {
        Self {
            config,
            http,
            limiter,
            health,
            memory: DashMap::new(),
        }
    }

    /// Available versions of `tool`.
    ///
    /// With `use_cache`, a cached list younger than the configured expiry is
    /// returned without network access. When every mirror fails, any cached
    /// list is returned regardless of age, else an empty list.
    #[instrument(skip(self))]
    pub async fn get_remote_versions(&self, tool: &str, use_cache: bool) -> Vec<RemoteVersionEntry> {
        let key = versions_cache_key(tool);
        let expiry = self.config.settings().cache_expiry();

        if use_cache && let Some(cached) = self.fresh_cache(&key, expiry) {
            info!("Using cached {} versions", tool);
            return cached.versions;
        }

        let Some(template) = self.config.tool_template(tool) else {
            warn!("No template configured for {}", tool);
            return self.stale_cache(&key);
        };
        if template.mirror_list.is_empty() {
            warn!("No mirrors configured for {}", tool);
            return self.stale_cache(&key);
        }
        let Some(rule) = fetch_rule(tool, &template) else {
            warn!("No version fetch rule for {}", tool);
            return self.stale_cache(&key);
        };

        for mirror in self.health.sorted(&template.mirror_list) {
            info!("Fetching {} versions from {}", tool, mirror);
            match self.fetch_from_mirror(&mirror, &rule).await {
                Ok(versions) => {
                    self.health.record_success(&mirror);
                    info!("Found {} {} versions on {}", versions.len(), tool, mirror);
                    self.store(&key, &versions);
                    return versions;
                }
                Err(e) => {
                    warn!("Fetching {} versions from {} failed: {}", tool, mirror, e);
                    self.health.record_failure(&mirror, e.to_string());
                }
            }
        }

        error!(
            "All mirrors failed for {}: {}",
            tool,
            self.health.failure_summary_for(&template.mirror_list)
        );
        self.stale_cache(&key)
    }

    /// Ask one mirror for its version list.
    pub async fn fetch_from_mirror(
        &self,
        mirror: &str,
        rule: &VersionFetchRule,
    ) -> Result<Vec<RemoteVersionEntry>, FetchError> {
        let listed = if let Some(index_file) = &rule.index_file {
            let url = index_url(mirror, index_file);
            self.limiter.acquire().await;
            debug!("Fetching index {}", url);
            let body = self.http.get_text(&url).await?;
            parse_index(&body, rule)?
        } else if let Some(pattern) = &rule.version_pattern {
            let pattern = Regex::new(pattern)?;
            self.limiter.acquire().await;
            debug!("Fetching listing {}", mirror);
            let body = self.http.get_text(mirror).await?;
            scrape_versions(&body, &pattern)
                .into_iter()
                .map(ListedVersion::new)
                .collect()
        } else {
            return Err(FetchError::NoRule);
        };

        let arch = host_arch(&rule.arch_map);
        let entries: Vec<RemoteVersionEntry> = listed
            .into_iter()
            .map(|listed| RemoteVersionEntry {
                download_url: render_url(&rule.download_url_template, mirror, &listed.version, &arch),
                version: listed.version,
                release_date: listed.release_date,
                lts: listed.lts,
            })
            .collect();

        let total = entries.len();
        let valid: Vec<_> = entries.into_iter().filter(|e| e.is_valid()).collect();
        if valid.len() != total {
            warn!("Dropped {} invalid entries from {}", total - valid.len(), mirror);
        }
        if valid.is_empty() {
            return Err(FetchError::Empty);
        }
        Ok(valid)
    }

    fn fresh_cache(&self, key: &str, expiry: Duration) -> Option<CachedVersions> {
        if let Some(cached) = self.memory.get(key)
            && cached.is_fresh(expiry)
        {
            return Some(cached.value().clone());
        }
        let cached = self.config.cache_get(key).filter(|c| c.is_fresh(expiry))?;
        self.memory.insert(key.to_string(), cached.clone());
        Some(cached)
    }

    fn stale_cache(&self, key: &str) -> Vec<RemoteVersionEntry> {
        if let Some(cached) = self.memory.get(key) {
            info!("Falling back to cached versions for {}", key);
            return cached.versions.clone();
        }
        match self.config.cache_get(key) {
            Some(cached) => {
                info!("Falling back to cached versions for {}", key);
                self.memory.insert(key.to_string(), cached.clone());
                cached.versions
            }
            None => Vec::new(),
        }
    }

    fn store(&self, key: &str, versions: &[RemoteVersionEntry]) {
        let cached = CachedVersions::now(versions.to_vec());
        self.memory.insert(key.to_string(), cached.clone());
        self.config.cache_set(key, cached);
        if let Err(e) = self.config.cache_save() {
            warn!("Failed to persist version cache: {}", e);
        }
    }

    /// Drop cached lists, in memory and on disk.
    pub fn clear_cache(&self) -> bool {
        self.memory.clear();
        match self.config.clear_cache() {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to clear version cache: {}", e);
                false
            }
        }
    }
}

/// The fetch rule for `tool`: the template's own, else the built-in one.
pub fn fetch_rule(tool: &str, template: &ToolTemplate) -> Option<VersionFetchRule> {
    template
        .version_fetch_config
        .clone()
        .or_else(|| KnownTool::from_name(tool).map(KnownTool::fetch_rule))
}

/// URL of an index file on a mirror.
pub fn index_url(mirror: &str, index_file: &str) -> String {
    format!("{}/{}", mirror.trim_end_matches('/'), index_file)
}

/// Versions matched by `pattern` in `body`, deduplicated by first occurrence.
///
/// The first capture group is used when the pattern has one, else the whole
/// match.
pub fn scrape_versions(body: &str, pattern: &Regex) -> Vec<String> {
    let mut seen = HashSet::new();
    pattern
        .captures_iter(body)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(0)))
        .map(|m| m.as_str().to_string())
        .filter(|v| !v.is_empty() && seen.insert(v.clone()))
        .collect()
}

/// Parse a JSON index: a bare array, an object with a `versions` array, or a
/// single object.
pub fn parse_index(body: &str, rule: &VersionFetchRule) -> Result<Vec<ListedVersion>, FetchError> {
    let data: Value = serde_json::from_str(body).map_err(|e| FetchError::Index(e.to_string()))?;
    let items: Vec<Value> = match data {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("versions") {
            Some(Value::Array(items)) => items,
            Some(_) => return Err(FetchError::Index("`versions` is not an array".into())),
            None => vec![Value::Object(obj)],
        },
        other => {
            return Err(FetchError::Index(format!("unsupported index shape: {}", other)));
        }
    };

    Ok(items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(|item| {
            let version = match item.get(&rule.version_field)? {
                Value::String(s) => s.trim_start_matches('v').to_string(),
                Value::Number(n) => n.to_string(),
                _ => return None,
            };
            if version.is_empty() {
                return None;
            }
            let lts = rule
                .lts_field
                .as_ref()
                .and_then(|field| item.get(field))
                .map(truthy);
            let release_date = item.get("date").and_then(Value::as_str).map(str::to_string);
            Some(ListedVersion {
                version,
                lts,
                release_date,
            })
        })
        .collect())
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Architecture name for the host, mapped through `arch_map`.
pub fn host_arch(arch_map: &BTreeMap<String, String>) -> String {
    let key = if cfg!(target_pointer_width = "64") { "x64" } else { "x86" };
    arch_map
        .get(key)
        .cloned()
        .unwrap_or_else(|| key.to_string())
}

/// Substitute `{mirror}`, `{version}`, `{arch}`, `{major}`, `{minor}` and
/// `{patch}` in `template`.
pub fn render_url(template: &str, mirror: &str, version: &str, arch: &str) -> String {
    let mut parts = version.split('.');
    let major = parts.next().unwrap_or_default();
    let minor = parts.next().unwrap_or_default();
    let patch = parts.next().unwrap_or_default();
    template
        .replace("{mirror}", mirror)
        .replace("{version}", version)
        .replace("{arch}", arch)
        .replace("{major}", major)
        .replace("{minor}", minor)
        .replace("{patch}", patch)
}
