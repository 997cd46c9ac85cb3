//! The environment collaborator: variables and `PATH` entries that activate
//! a tool version.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};
use tvm_config::{write_atomic, write_json_atomic};
use tvm_core::{Error, Result};

/// Reads and mutates persistent environment state.
pub trait Environment: Send + Sync {
    /// Value of a variable.
    fn get_var(&self, name: &str) -> Option<String>;

    /// Set a variable.
    fn set_var(&self, name: &str, value: &str) -> Result<()>;

    /// Remove a variable.
    fn delete_var(&self, name: &str) -> Result<()>;

    /// Managed `PATH` entries, in order.
    fn path_entries(&self) -> Vec<String>;

    /// Prepend `entry` to `PATH`. Returns `false` when already present.
    fn add_to_path(&self, entry: &str) -> Result<bool>;

    /// Remove `entry` from `PATH`. Returns `false` when absent.
    fn remove_from_path(&self, entry: &str) -> Result<bool>;

    /// Notify the system that the environment changed.
    fn broadcast_change(&self) -> Result<()>;

    /// Whether `PATH` contains `entry`, ignoring case and trailing separators.
    fn path_contains(&self, entry: &str) -> bool {
        self.path_entries()
            .iter()
            .any(|existing| same_path_entry(existing, entry))
    }

    /// Point `home_var` at `home` and make sure each of `path_entries`
    /// (relative to `home_var`) is on `PATH`.
    fn setup_tool_env(&self, home_var: &str, home: &Path, path_entries: &[String]) -> Result<()> {
        self.set_var(home_var, &home.to_string_lossy())?;
        for entry in path_entries {
            let reference = path_reference(home_var, entry);
            if self.path_contains(&reference) {
                debug!("PATH already contains {}", reference);
                continue;
            }
            self.add_to_path(&reference)?;
        }
        self.broadcast_change()
    }
}

/// A `PATH` entry that refers to `home_var`, e.g. `${JAVA_HOME}/bin`.
pub fn path_reference(home_var: &str, entry: &str) -> String {
    let entry = entry.trim_matches(['/', '\\']);
    if cfg!(windows) {
        if entry.is_empty() {
            format!("%{home_var}%")
        } else {
            format!("%{home_var}%\\{entry}")
        }
    } else if entry.is_empty() {
        format!("${{{home_var}}}")
    } else {
        format!("${{{home_var}}}/{entry}")
    }
}

/// Compare `PATH` entries ignoring case and trailing separators.
pub fn same_path_entry(a: &str, b: &str) -> bool {
    let norm = |s: &str| s.trim().trim_end_matches(['/', '\\']).to_lowercase();
    norm(a) == norm(b)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct EnvState {
    #[serde(default)]
    vars: BTreeMap<String, String>,
    #[serde(default)]
    path: Vec<String>,
}

impl EnvState {
    fn add_to_path(&mut self, entry: &str) -> bool {
        if self.path.iter().any(|e| same_path_entry(e, entry)) {
            return false;
        }
        self.path.insert(0, entry.to_string());
        true
    }

    fn remove_from_path(&mut self, entry: &str) -> bool {
        let before = self.path.len();
        self.path.retain(|e| !same_path_entry(e, entry));
        self.path.len() != before
    }
}

/// In-memory environment for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryEnvironment {
    state: Mutex<EnvState>,
    broadcasts: Mutex<usize>,
}

impl MemoryEnvironment {
    /// Create an empty environment.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of change notifications sent.
    pub fn broadcasts(&self) -> usize {
        *lock(&self.broadcasts)
    }
}

impl Environment for MemoryEnvironment {
    fn get_var(&self, name: &str) -> Option<String> {
        lock(&self.state).vars.get(name).cloned()
    }

    fn set_var(&self, name: &str, value: &str) -> Result<()> {
        lock(&self.state)
            .vars
            .insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn delete_var(&self, name: &str) -> Result<()> {
        lock(&self.state).vars.remove(name);
        Ok(())
    }

    fn path_entries(&self) -> Vec<String> {
        lock(&self.state).path.clone()
    }

    fn add_to_path(&self, entry: &str) -> Result<bool> {
        Ok(lock(&self.state).add_to_path(entry))
    }

    fn remove_from_path(&self, entry: &str) -> Result<bool> {
        Ok(lock(&self.state).remove_from_path(entry))
    }

    fn broadcast_change(&self) -> Result<()> {
        *lock(&self.broadcasts) += 1;
        Ok(())
    }
}

/// Environment persisted as `env.json` and rendered to a POSIX `env.sh`
/// that the user's shell profile sources.
///
/// Variables not managed here fall back to the process environment on read.
#[derive(Debug)]
pub struct ProfileEnvironment {
    dir: PathBuf,
    state: Mutex<EnvState>,
}

impl ProfileEnvironment {
    /// State file name.
    pub const STATE_FILE: &'static str = "env.json";

    /// Generated script name.
    pub const SCRIPT_FILE: &'static str = "env.sh";

    /// Open the environment stored in `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let state_path = dir.join(Self::STATE_FILE);
        let state = if state_path.exists() {
            let content = std::fs::read_to_string(&state_path)
                .map_err(|e| Error::io("failed to read environment state", &state_path, e))?;
            serde_json::from_str(&content).map_err(|e| {
                Error::config_at(format!("invalid environment state: {}", e), &state_path)
            })?
        } else {
            EnvState::default()
        };
        Ok(Self {
            dir,
            state: Mutex::new(state),
        })
    }

    /// Path of the generated shell script.
    pub fn script_path(&self) -> PathBuf {
        self.dir.join(Self::SCRIPT_FILE)
    }

    /// Apply `f` and persist the result. State only changes if the write
    /// succeeds.
    fn update<T>(&self, f: impl FnOnce(&mut EnvState) -> T) -> Result<T> {
        let mut state = lock(&self.state);
        let mut next = state.clone();
        let out = f(&mut next);
        if next != *state {
            write_json_atomic(&self.dir.join(Self::STATE_FILE), &next)?;
            *state = next;
        }
        Ok(out)
    }

    fn render(state: &EnvState) -> String {
        let mut script = String::from("# Generated by tvm. Source this file from your shell profile.\n");
        for (name, value) in &state.vars {
            let _ = writeln!(script, "export {}='{}'", name, value.replace('\'', r"'\''"));
        }
        if !state.path.is_empty() {
            let entries: Vec<String> = state
                .path
                .iter()
                .map(|e| e.replace(['"', '`', '\\'], ""))
                .collect();
            let _ = writeln!(script, "export PATH=\"{}:$PATH\"", entries.join(":"));
        }
        script
    }
}

impl Environment for ProfileEnvironment {
    fn get_var(&self, name: &str) -> Option<String> {
        if let Some(value) = lock(&self.state).vars.get(name) {
            return Some(value.clone());
        }
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }

    fn set_var(&self, name: &str, value: &str) -> Result<()> {
        self.update(|state| {
            state.vars.insert(name.to_string(), value.to_string());
        })
    }

    fn delete_var(&self, name: &str) -> Result<()> {
        self.update(|state| {
            state.vars.remove(name);
        })
    }

    fn path_entries(&self) -> Vec<String> {
        lock(&self.state).path.clone()
    }

    fn add_to_path(&self, entry: &str) -> Result<bool> {
        self.update(|state| state.add_to_path(entry))
    }

    fn remove_from_path(&self, entry: &str) -> Result<bool> {
        self.update(|state| state.remove_from_path(entry))
    }

    fn broadcast_change(&self) -> Result<()> {
        let script = Self::render(&lock(&self.state));
        let path = self.script_path();
        write_atomic(&path, script.as_bytes())?;
        info!("Updated {}; open a new shell to pick up the change", path.display());
        Ok(())
    }
}
