//! Directory resolution and atomic file writes.

use directories::ProjectDirs;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;
use tvm_core::{EnvVars, Error, Result};

/// Get the tvm config directory.
///
/// `TVM_CONFIG_DIR` takes precedence. Otherwise:
/// - Linux: `~/.config/tvm`
/// - macOS: `~/Library/Application Support/io.tvm.tvm`
/// - Windows: `%APPDATA%\tvm\tvm\config`
pub fn config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(EnvVars::TVM_CONFIG_DIR).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let dirs = ProjectDirs::from("io", "tvm", "tvm")
        .ok_or_else(|| Error::config("could not determine home directory for config"))?;
    Ok(dirs.config_dir().to_path_buf())
}

/// Ensure a directory exists.
pub fn ensure_dir(path: &Path) -> Result<()> {
    if !path.exists() {
        debug!("Creating directory: {}", path.display());
        std::fs::create_dir_all(path).map_err(|e| {
            Error::io(
                format!("failed to create directory: {}", path.display()),
                path,
                e,
            )
        })?;
    }
    Ok(())
}

/// Serialize `value` as pretty JSON and atomically replace `path` with it.
///
/// The content is written to a temporary file in the same directory and
/// renamed over the target, so readers never observe a partial file.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::config_at(format!("failed to serialize: {e}"), path))?;
    write_atomic(path, &content)
}

/// Replace `path` with `content` through a synced temporary file in the
/// same directory, so readers see either the old or the new file.
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    ensure_dir(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .map_err(|e| Error::io("failed to create temporary file", parent, e))?;
    tmp.write_all(content)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| Error::io("failed to write temporary file", tmp.path(), e))?;
    tmp.persist(path)
        .map_err(|e| Error::io("failed to replace file", path, e.error))?;

    debug!("Wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("env.sh");
        std::fs::write(&path, "old content that is longer than the new one\n").unwrap();

        write_atomic(&path, b"new\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new\n");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_write_json_atomic_creates_parent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        write_json_atomic(&path, &vec!["a", "b"]).unwrap();
        let loaded: Vec<String> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, vec!["a", "b"]);
    }

    #[test]
    fn test_write_json_atomic_replaces() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        write_json_atomic(&path, &1).unwrap();
        write_json_atomic(&path, &2).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "2");

        // No temp files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
