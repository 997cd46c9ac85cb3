//! Root-path normalisation.

use std::path::{Component, Path, PathBuf};

/// Normalise a user-supplied root path.
///
/// Expands a leading `~` to the home directory and lexically resolves `.`
/// and `..` components without touching the filesystem.
pub fn normalize_root(raw: &str) -> PathBuf {
    let raw = raw.trim();
    let expanded = match raw.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with(['/', '\\']) => {
            match tvm_core::env::home_dir() {
                Some(home) => home.join(rest.trim_start_matches(['/', '\\'])),
                None => PathBuf::from(raw),
            }
        }
        _ => PathBuf::from(raw),
    };
    normalize_lexically(&expanded)
}

/// Resolve `.` and `..` components lexically.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                ) && out.pop();
                if !popped && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Compare two paths the way system-version detection does: lexically
/// normalised, separator-agnostic and case-insensitive.
pub fn same_path_loose(a: &Path, b: &Path) -> bool {
    fn key(p: &Path) -> String {
        normalize_lexically(p)
            .to_string_lossy()
            .replace('\\', "/")
            .trim_end_matches('/')
            .to_lowercase()
    }
    key(a) == key(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_dots() {
        assert_eq!(
            normalize_root("/opt/tools/./python/../java"),
            PathBuf::from("/opt/tools/java")
        );
        assert_eq!(normalize_root("/../opt"), PathBuf::from("/opt"));
        assert_eq!(normalize_root("a/../../b"), PathBuf::from("../b"));
    }

    #[test]
    fn test_normalize_tilde() {
        if let Some(home) = tvm_core::env::home_dir() {
            assert_eq!(normalize_root("~/tools"), home.join("tools"));
        }
        assert_eq!(normalize_root("~user/x"), PathBuf::from("~user/x"));
    }

    #[test]
    fn test_same_path_loose() {
        assert!(same_path_loose(
            Path::new("/Opt/Tools/Python310/"),
            Path::new("/opt/tools/python310")
        ));
        assert!(same_path_loose(
            Path::new("/opt/tools/x/../python310"),
            Path::new("/opt/tools/python310")
        ));
        assert!(!same_path_loose(
            Path::new("/opt/tools/python311"),
            Path::new("/opt/tools/python310")
        ));
    }
}
