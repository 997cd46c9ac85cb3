//! Input validation for identifiers that reach the filesystem or network.
//!
//! Every public orchestrator operation validates its inputs here before any
//! I/O happens.

use crate::error::{Error, Result};
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

/// Maximum length of a tool name.
pub const MAX_TOOL_NAME_LENGTH: usize = 50;

/// Maximum length of a version string.
pub const MAX_VERSION_LENGTH: usize = 100;

/// Maximum length of a path.
pub const MAX_PATH_LENGTH: usize = 1024;

static TOOL_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

static VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._-]+$").expect("valid regex"));

/// Validate a tool name such as `python` or `node`.
pub fn tool_name(tool: &str) -> Result<()> {
    let tool = tool.trim();
    if tool.is_empty() {
        return Err(Error::validation("tool name", "must not be empty"));
    }
    if tool.len() > MAX_TOOL_NAME_LENGTH {
        return Err(Error::validation(
            "tool name",
            format!("must not exceed {} characters", MAX_TOOL_NAME_LENGTH),
        ));
    }
    if !TOOL_NAME.is_match(tool) {
        return Err(Error::validation(
            "tool name",
            format!("{tool:?} may only contain letters, digits, '_' and '-'"),
        ));
    }
    Ok(())
}

/// Validate a version string such as `3.12.1` or `21.0.2_13`.
pub fn version(version: &str) -> Result<()> {
    let version = version.trim();
    if version.is_empty() {
        return Err(Error::validation("version", "must not be empty"));
    }
    if version.len() > MAX_VERSION_LENGTH {
        return Err(Error::validation(
            "version",
            format!("must not exceed {} characters", MAX_VERSION_LENGTH),
        ));
    }
    if !VERSION.is_match(version) {
        return Err(Error::validation(
            "version",
            format!("{version:?} is not a valid version string"),
        ));
    }
    Ok(())
}

/// Validate a filesystem path supplied by a caller.
pub fn path(path: &str) -> Result<()> {
    if path.len() > MAX_PATH_LENGTH {
        return Err(Error::validation(
            "path",
            format!("must not exceed {} characters", MAX_PATH_LENGTH),
        ));
    }
    if path.contains("..") {
        return Err(Error::validation("path", "must not contain '..'"));
    }
    Ok(())
}

/// Validate an absolute http(s) URL with a host.
pub fn url(url: &str) -> Result<()> {
    let parsed =
        Url::parse(url.trim()).map_err(|e| Error::validation("url", format!("{url:?} does not parse: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::validation(
            "url",
            format!("{url:?} must use http or https, not {}", parsed.scheme()),
        ));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(Error::validation("url", format!("{url:?} has no host")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_name() {
        assert!(tool_name("python").is_ok());
        assert!(tool_name("graal_vm-ce").is_ok());
        assert!(tool_name("").is_err());
        assert!(tool_name("   ").is_err());
        assert!(tool_name("../etc").is_err());
        assert!(tool_name("node js").is_err());
        assert!(tool_name(&"a".repeat(51)).is_err());
    }

    #[test]
    fn test_version() {
        assert!(version("3.10.4").is_ok());
        assert!(version("21.0.2_13").is_ok());
        assert!(version("8u402-b06").is_ok());
        assert!(version("").is_err());
        assert!(version("3.10/../..").is_err());
        assert!(version("3.10 4").is_err());
        assert!(version(&"1".repeat(101)).is_err());
    }

    #[test]
    fn test_path() {
        assert!(path("/opt/tools/python").is_ok());
        assert!(path("/opt/tools/../etc").is_err());
        assert!(path(&"a".repeat(1025)).is_err());
    }

    #[test]
    fn test_url() {
        assert!(url("https://www.python.org/ftp/python/").is_ok());
        assert!(url("http://127.0.0.1:8080/dist/").is_ok());
        assert!(url("http://localhost:1234").is_ok());
        assert!(url("https://[::1]/node-v20.11.0.tar.gz").is_ok());
        assert!(url("http://mirror:8080/").is_ok());
        assert!(url("http://999.999.999.999/").is_err());
        assert!(url("ftp://mirror.example.com/").is_err());
        assert!(url("file:///opt/mirror/").is_err());
        assert!(url("/relative/path").is_err());
        assert!(url("not a url").is_err());
    }
}
