//! Global settings and per-tool templates.
//!
//! Settings live under the `settings` key of `config.json`:
//!
//! ```json
//! {
//!   "settings": {
//!     "tool_templates": {
//!       "python": {
//!         "tool_root": "/opt/tools/python",
//!         "mirror_list": ["https://www.python.org/ftp/python/"],
//!         "version_cmd": "python --version",
//!         "env_rule": { "home_var": "PYTHON_HOME", "path_entries": ["", "Scripts"] }
//!       }
//!     },
//!     "cache_expire_time": 86400,
//!     "request_rate_limit": 10,
//!     "download_retry_count": 3,
//!     "download_speed_limit": 0
//!   }
//! }
//! ```

use crate::paths::normalize_root;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Global settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Per-tool templates, keyed by tool name.
    #[serde(default)]
    pub tool_templates: BTreeMap<String, ToolTemplate>,
    /// Remote version cache lifetime in seconds.
    #[serde(default = "default_cache_expire_time")]
    pub cache_expire_time: u64,
    /// Outbound mirror requests per second.
    #[serde(default = "default_request_rate_limit")]
    pub request_rate_limit: f64,
    /// Additional attempts for transient download failures.
    #[serde(default = "default_download_retry_count")]
    pub download_retry_count: u32,
    /// Download throughput cap in bytes per second (0 = unlimited).
    #[serde(default)]
    pub download_speed_limit: u64,
}

fn default_cache_expire_time() -> u64 {
    86_400
}

fn default_request_rate_limit() -> f64 {
    10.0
}

fn default_download_retry_count() -> u32 {
    3
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tool_templates: BTreeMap::new(),
            cache_expire_time: default_cache_expire_time(),
            request_rate_limit: default_request_rate_limit(),
            download_retry_count: default_download_retry_count(),
            download_speed_limit: 0,
        }
    }
}

impl Settings {
    /// Settings with the built-in tool templates.
    pub fn builtin() -> Self {
        Self {
            tool_templates: builtin_templates(),
            ..Default::default()
        }
    }

    /// Cache lifetime as a [`Duration`].
    pub fn cache_expiry(&self) -> Duration {
        Duration::from_secs(self.cache_expire_time)
    }
}

/// Per-tool configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolTemplate {
    /// Directory holding one subdirectory per installed version. Empty when
    /// not configured.
    #[serde(default)]
    pub tool_root: String,
    /// Ordered mirror base URLs.
    #[serde(default)]
    pub mirror_list: Vec<String>,
    /// Command printing the tool's version, e.g. `python --version`.
    #[serde(default)]
    pub version_cmd: String,
    /// How switching a version rewrites the environment.
    #[serde(default)]
    pub env_rule: Option<EnvRule>,
    /// How remote versions are discovered.
    #[serde(default)]
    pub version_fetch_config: Option<VersionFetchRule>,
}

impl ToolTemplate {
    /// The normalised install root, or `None` when unset.
    pub fn root(&self) -> Option<PathBuf> {
        if self.tool_root.trim().is_empty() {
            None
        } else {
            Some(normalize_root(&self.tool_root))
        }
    }
}

/// Environment variables a tool version is activated through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvRule {
    /// Variable pointing at the active install, e.g. `JAVA_HOME`.
    pub home_var: String,
    /// Sub-entries of the home directory added to `PATH`. An empty string
    /// stands for the home directory itself.
    #[serde(default = "default_path_entries")]
    pub path_entries: Vec<String>,
}

fn default_path_entries() -> Vec<String> {
    vec![String::new()]
}

impl EnvRule {
    /// The conventional rule for a tool: `{TOOL}_HOME` added to `PATH` as is.
    pub fn for_tool(tool: &str) -> Self {
        Self {
            home_var: format!("{}_HOME", tool.to_uppercase()),
            path_entries: default_path_entries(),
        }
    }

    fn with_entries(home_var: &str, entries: &[&str]) -> Self {
        Self {
            home_var: home_var.to_string(),
            path_entries: entries.iter().map(|e| e.to_string()).collect(),
        }
    }
}

/// Remote version discovery rule.
///
/// Exactly one of `version_pattern` (HTML listing scrape) or `index_file`
/// (JSON index) is expected. When both are set the index wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionFetchRule {
    /// Regex whose first capture group is a version, applied to a mirror's
    /// HTML listing.
    #[serde(default)]
    pub version_pattern: Option<String>,
    /// JSON index filename relative to the mirror, e.g. `index.json`.
    #[serde(default)]
    pub index_file: Option<String>,
    /// Template using `{mirror}`, `{version}`, `{arch}`, `{major}`,
    /// `{minor}` and `{patch}`.
    pub download_url_template: String,
    /// Maps `x64`/`x86` to the distribution's architecture names.
    #[serde(default)]
    pub arch_map: BTreeMap<String, String>,
    /// Field of each index entry holding the version.
    #[serde(default = "default_version_field")]
    pub version_field: String,
    /// Field of each index entry holding the LTS marker.
    #[serde(default)]
    pub lts_field: Option<String>,
}

fn default_version_field() -> String {
    "version".to_string()
}

impl VersionFetchRule {
    /// A rule scraping an HTML listing.
    pub fn html(pattern: &str, template: &str) -> Self {
        Self {
            version_pattern: Some(pattern.to_string()),
            download_url_template: template.to_string(),
            version_field: default_version_field(),
            ..Default::default()
        }
    }

    /// A rule reading a JSON index.
    pub fn index(index_file: &str, template: &str) -> Self {
        Self {
            index_file: Some(index_file.to_string()),
            download_url_template: template.to_string(),
            version_field: default_version_field(),
            ..Default::default()
        }
    }

    /// Set the architecture map.
    pub fn with_arch(mut self, x64: &str, x86: &str) -> Self {
        self.arch_map.insert("x64".to_string(), x64.to_string());
        self.arch_map.insert("x86".to_string(), x86.to_string());
        self
    }

    /// Set the LTS field.
    pub fn with_lts_field(mut self, field: &str) -> Self {
        self.lts_field = Some(field.to_string());
        self
    }
}

fn template(mirrors: &[&str], version_cmd: &str, env_rule: EnvRule) -> ToolTemplate {
    ToolTemplate {
        tool_root: String::new(),
        mirror_list: mirrors.iter().map(|m| m.to_string()).collect(),
        version_cmd: version_cmd.to_string(),
        env_rule: Some(env_rule),
        version_fetch_config: None,
    }
}

/// Built-in templates written to a fresh `config.json`.
///
/// Fetch rules are left unset so the built-in rule for each known tool
/// applies.
pub fn builtin_templates() -> BTreeMap<String, ToolTemplate> {
    let python_entries: &[&str] = if cfg!(windows) { &["", "Scripts"] } else { &["bin"] };
    let node_entries: &[&str] = if cfg!(windows) { &[""] } else { &["bin"] };

    BTreeMap::from([
        (
            "python".to_string(),
            template(
                &[
                    "https://www.python.org/ftp/python/",
                    "https://mirrors.huaweicloud.com/python/",
                    "https://mirrors.aliyun.com/python/",
                ],
                "python --version",
                EnvRule::with_entries("PYTHON_HOME", python_entries),
            ),
        ),
        (
            "java".to_string(),
            template(
                &["https://mirrors.huaweicloud.com/openjdk/"],
                "java -version",
                EnvRule::with_entries("JAVA_HOME", &["bin"]),
            ),
        ),
        (
            "node".to_string(),
            template(
                &[
                    "https://nodejs.org/dist/",
                    "https://mirrors.huaweicloud.com/nodejs/",
                ],
                "node -v",
                EnvRule::with_entries("NODE_HOME", node_entries),
            ),
        ),
        (
            "maven".to_string(),
            template(
                &[
                    "https://repo.maven.apache.org/maven2/org/apache/maven/apache-maven/",
                    "https://mirrors.huaweicloud.com/repository/maven/org/apache/maven/apache-maven/",
                ],
                "mvn -version",
                EnvRule::with_entries("MAVEN_HOME", &["bin"]),
            ),
        ),
        (
            "gradle".to_string(),
            template(
                &["https://mirrors.cloud.tencent.com/gradle/"],
                "gradle -version",
                EnvRule::with_entries("GRADLE_HOME", &["bin"]),
            ),
        ),
    ])
}
