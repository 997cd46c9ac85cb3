//! Environment variable constants for tvm.
//!
//! This module defines all environment variables that tvm recognizes,
//! providing a single source of truth for environment configuration.

/// Environment variable names used by tvm.
pub struct EnvVars;

impl EnvVars {
    // ─── Global Settings ─────────────────────────────────────────────────────

    /// Directory holding config.json, cache.json and download history.
    pub const TVM_CONFIG_DIR: &'static str = "TVM_CONFIG_DIR";

    /// Enable JSON log output.
    pub const TVM_LOG_JSON: &'static str = "TVM_LOG_JSON";

    /// Enable verbose output.
    pub const TVM_VERBOSE: &'static str = "TVM_VERBOSE";

    // ─── Standard Environment Variables ──────────────────────────────────────

    /// Standard PATH environment variable.
    pub const PATH: &'static str = "PATH";

    /// Standard HOME environment variable.
    pub const HOME: &'static str = "HOME";

    /// Windows user profile directory.
    pub const USERPROFILE: &'static str = "USERPROFILE";
}

/// Look up the user's home directory from the environment.
pub fn home_dir() -> Option<std::path::PathBuf> {
    std::env::var_os(EnvVars::HOME)
        .or_else(|| std::env::var_os(EnvVars::USERPROFILE))
        .filter(|v| !v.is_empty())
        .map(std::path::PathBuf::from)
}

/// Check if verbose output was requested through the environment.
pub fn verbose() -> bool {
    std::env::var(EnvVars::TVM_VERBOSE)
        .map(|v| v != "0" && !v.is_empty())
        .unwrap_or(false)
}
