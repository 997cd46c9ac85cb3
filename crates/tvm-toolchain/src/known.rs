//! Conventions for the tools tvm knows out of the box.

use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tvm_config::VersionFetchRule;

/// A tool with built-in install, detection and discovery conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownTool {
    Python,
    Java,
    Node,
    Maven,
    Gradle,
}

macro_rules! lazy_regex {
    ($re:expr) => {{
        static RE: LazyLock<Regex> = LazyLock::new(|| Regex::new($re).expect("valid regex"));
        &*RE
    }};
}

impl KnownTool {
    /// All known tools.
    pub const ALL: [KnownTool; 5] = [
        KnownTool::Python,
        KnownTool::Java,
        KnownTool::Node,
        KnownTool::Maven,
        KnownTool::Gradle,
    ];

    /// Look up a tool by name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Canonical tool name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Python => "python",
            Self::Java => "java",
            Self::Node => "node",
            Self::Maven => "maven",
            Self::Gradle => "gradle",
        }
    }

    /// Executable whose presence marks a valid install, relative to the
    /// install directory.
    pub fn marker(self) -> &'static str {
        if cfg!(windows) {
            match self {
                Self::Python => "python.exe",
                Self::Java => "bin/java.exe",
                Self::Node => "node.exe",
                Self::Maven => "bin/mvn.cmd",
                Self::Gradle => "bin/gradle.bat",
            }
        } else {
            match self {
                Self::Python => "bin/python3",
                Self::Java => "bin/java",
                Self::Node => "bin/node",
                Self::Maven => "bin/mvn",
                Self::Gradle => "bin/gradle",
            }
        }
    }

    /// Path of the marker executable inside `install_dir`.
    pub fn executable(self, install_dir: &Path) -> PathBuf {
        self.marker()
            .split('/')
            .fold(install_dir.to_path_buf(), |path, part| path.join(part))
    }

    /// Arguments that make the executable print its version.
    pub fn version_args(self) -> &'static [&'static str] {
        match self {
            Self::Python => &["--version"],
            Self::Node => &["-v"],
            Self::Java | Self::Maven | Self::Gradle => &["-version"],
        }
    }

    /// Pattern extracting the version from the version command's output.
    pub fn output_pattern(self) -> &'static Regex {
        match self {
            Self::Python => lazy_regex!(r"(?i)Python (\d+\.\d+\.\d+)"),
            Self::Java => lazy_regex!(r#"(?i)version "?(\d+\.?\d*\.?\d*)"#),
            Self::Node => lazy_regex!(r"(?i)v?(\d+\.\d+\.\d+)"),
            Self::Maven => lazy_regex!(r"(?i)Apache Maven (\d+\.\d+\.\d+)"),
            Self::Gradle => lazy_regex!(r"(?i)Gradle (\d+\.\d+(?:\.\d+)?)"),
        }
    }

    /// Pattern extracting the version from an install directory name.
    pub fn folder_pattern(self) -> &'static Regex {
        match self {
            Self::Python => lazy_regex!(r"(?i)python(\d+(?:\.\d+)*)"),
            Self::Java => lazy_regex!(r"(?i)jdk[-_]?(\d+\.?\d*\.?\d*)"),
            Self::Node => lazy_regex!(r"(?i)node[-_]?v?(\d+\.?\d*\.?\d*)"),
            Self::Maven => lazy_regex!(r"(?i)apache-maven[-_]?(\d+\.?\d*\.?\d*)"),
            Self::Gradle => lazy_regex!(r"(?i)gradle[-_]?(\d+\.?\d*\.?\d*)"),
        }
    }

    /// Normalise a version captured from a folder name.
    ///
    /// Python folders use compact names such as `python310`, read as `3.10`.
    pub fn normalize_folder_version(self, raw: &str) -> String {
        if self == Self::Python && !raw.contains('.') && raw.len() >= 2 {
            let (major, minor) = raw.split_at(1);
            return format!("{major}.{minor}");
        }
        raw.to_string()
    }

    /// Install directory name for `version`.
    pub fn install_dir_name(self, version: &str) -> String {
        match self {
            Self::Python => format!("python{}", version.replace('.', "")),
            Self::Java => format!("jdk{version}"),
            Self::Node => format!("node-v{version}"),
            Self::Maven => format!("apache-maven-{version}"),
            Self::Gradle => format!("gradle-{version}"),
        }
    }

    /// Discovery rule used when a template configures none.
    pub fn fetch_rule(self) -> VersionFetchRule {
        let archive = if cfg!(windows) { "zip" } else { "tar.gz" };
        match self {
            Self::Python => VersionFetchRule::html(
                r#"href="(\d+\.\d+\.\d+)/""#,
                "{mirror}{version}/python-{version}-embed-{arch}.zip",
            )
            .with_arch("amd64", "win32"),
            Self::Java => {
                let platform = if cfg!(windows) {
                    "windows"
                } else if cfg!(target_os = "macos") {
                    "macos"
                } else {
                    "linux"
                };
                VersionFetchRule::html(
                    r#"href="(\d+(?:\.\d+)*)/""#,
                    &format!("{{mirror}}{{version}}/openjdk-{{version}}_{platform}-x64_bin.{archive}"),
                )
            }
            Self::Node => {
                let (platform, archive) = if cfg!(windows) {
                    ("win", "zip")
                } else if cfg!(target_os = "macos") {
                    ("darwin", "tar.gz")
                } else {
                    ("linux", "tar.xz")
                };
                VersionFetchRule::index(
                    "index.json",
                    &format!("{{mirror}}v{{version}}/node-v{{version}}-{platform}-{{arch}}.{archive}"),
                )
                .with_arch("x64", "x86")
                .with_lts_field("lts")
            }
            Self::Maven => VersionFetchRule::html(
                r#"href="(\d+\.\d+\.\d+)/""#,
                &format!("{{mirror}}{{version}}/apache-maven-{{version}}-bin.{archive}"),
            ),
            Self::Gradle => VersionFetchRule::html(
                r#"href="gradle-(\d+\.\d+(?:\.\d+)?)-bin\.zip""#,
                "{mirror}gradle-{version}-bin.zip",
            ),
        }
    }
}

impl std::fmt::Display for KnownTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Folder-name pattern for tools without built-in conventions.
pub fn generic_folder_pattern() -> &'static Regex {
    lazy_regex!(r"(\d+\.?\d*\.?\d*)")
}

/// Version-output pattern for tools without built-in conventions.
pub fn generic_output_pattern() -> &'static Regex {
    lazy_regex!(r"(\d+\.\d+(?:\.\d+)*)")
}

/// Install directory name for any tool.
pub fn install_dir_name(tool: &str, version: &str) -> String {
    match KnownTool::from_name(tool) {
        Some(known) => known.install_dir_name(version),
        None => format!("{tool}-{version}"),
    }
}

/// Extract a version from an install directory name.
///
/// Returns `None` unless the result contains at least one digit.
pub fn version_from_folder(tool: &str, folder: &str) -> Option<String> {
    let known = KnownTool::from_name(tool);
    let pattern = known.map_or_else(generic_folder_pattern, |k| k.folder_pattern());
    let raw = pattern.captures(folder)?.get(1)?.as_str();
    let version = match known {
        Some(k) => k.normalize_folder_version(raw),
        None => raw.to_string(),
    };
    version
        .chars()
        .any(|c| c.is_ascii_digit())
        .then_some(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_name() {
        assert_eq!(KnownTool::from_name("node"), Some(KnownTool::Node));
        assert_eq!(KnownTool::from_name("Node"), None);
        assert_eq!(KnownTool::from_name("go"), None);
    }

    #[test]
    fn test_install_dir_names() {
        assert_eq!(install_dir_name("python", "3.10.4"), "python3104");
        assert_eq!(install_dir_name("java", "21.0.2"), "jdk21.0.2");
        assert_eq!(install_dir_name("node", "20.11.0"), "node-v20.11.0");
        assert_eq!(install_dir_name("maven", "3.9.6"), "apache-maven-3.9.6");
        assert_eq!(install_dir_name("gradle", "8.5"), "gradle-8.5");
        assert_eq!(install_dir_name("go", "1.22.0"), "go-1.22.0");
    }

    #[test]
    fn test_version_from_folder() {
        assert_eq!(version_from_folder("python", "python310").as_deref(), Some("3.10"));
        assert_eq!(version_from_folder("python", "Python3.12.1").as_deref(), Some("3.12.1"));
        assert_eq!(version_from_folder("python", "python3").as_deref(), Some("3"));
        assert_eq!(version_from_folder("java", "jdk-17.0.2").as_deref(), Some("17.0.2"));
        assert_eq!(version_from_folder("node", "node-v20.11.0").as_deref(), Some("20.11.0"));
        assert_eq!(version_from_folder("maven", "apache-maven-3.9.6").as_deref(), Some("3.9.6"));
        assert_eq!(version_from_folder("gradle", "gradle-8.5").as_deref(), Some("8.5"));
        assert_eq!(version_from_folder("go", "go1.22.0").as_deref(), Some("1.22.0"));
        assert_eq!(version_from_folder("python", "scripts"), None);
        assert_eq!(version_from_folder("go", "docs"), None);
    }

    #[test]
    fn test_output_patterns() {
        let capture = |tool: KnownTool, output: &str| {
            tool.output_pattern()
                .captures(output)
                .map(|c| c[1].to_string())
        };
        assert_eq!(capture(KnownTool::Python, "Python 3.11.7\n").as_deref(), Some("3.11.7"));
        assert_eq!(
            capture(KnownTool::Java, "openjdk version \"17.0.2\" 2022-01-18\n").as_deref(),
            Some("17.0.2")
        );
        assert_eq!(capture(KnownTool::Node, "v20.11.0\n").as_deref(), Some("20.11.0"));
        assert_eq!(
            capture(KnownTool::Maven, "Apache Maven 3.9.6 (bc0240f3)").as_deref(),
            Some("3.9.6")
        );
        assert_eq!(capture(KnownTool::Gradle, "\nGradle 8.5\n").as_deref(), Some("8.5"));
    }

    #[test]
    fn test_executable_path() {
        let exe = KnownTool::Java.executable(Path::new("/opt/jdk17"));
        assert!(exe.starts_with("/opt/jdk17/bin"));
    }

    #[test]
    fn test_fetch_rules() {
        for tool in KnownTool::ALL {
            let rule = tool.fetch_rule();
            assert!(rule.download_url_template.starts_with("{mirror}"));
            assert!(rule.version_pattern.is_some() || rule.index_file.is_some());
        }
        assert_eq!(KnownTool::Node.fetch_rule().lts_field.as_deref(), Some("lts"));
    }
}
