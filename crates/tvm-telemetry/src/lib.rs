//! Telemetry and tracing for tvm.
//!
//! This crate provides:
//! - Subscriber setup driven by `RUST_LOG`, the verbose flag and `TVM_LOG_JSON`
//! - Operation timing through [`TimingGuard`] and the [`time!`] macro

use std::time::{Duration, Instant};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    prelude::*,
    util::TryInitError,
};
use tvm_core::EnvVars;

/// Crates whose events are shown by default.
const CRATES: [&str; 4] = ["tvm_core", "tvm_config", "tvm_toolchain", "tvm_telemetry"];

/// Default filter directives for the given verbosity.
pub fn default_directives(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "warn" };
    CRATES
        .iter()
        .map(|krate| format!("{krate}={level}"))
        .collect::<Vec<_>>()
        .join(",")
}

fn filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)))
}

/// Whether JSON output was requested through the environment.
pub fn json_requested() -> bool {
    std::env::var_os(EnvVars::TVM_LOG_JSON).is_some_and(|v| !v.is_empty())
}

/// Install the global subscriber.
///
/// `RUST_LOG` overrides the default filter. Output is JSON with span close
/// events when `TVM_LOG_JSON` is set, compact text otherwise.
pub fn try_init(verbose: bool) -> Result<(), TryInitError> {
    let json = json_requested();
    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_file(true)
            .with_line_number(true)
    });
    let text_layer = (!json).then(|| fmt::layer().compact().with_target(false).without_time());

    tracing_subscriber::registry()
        .with(filter(verbose))
        .with(json_layer)
        .with(text_layer)
        .try_init()
}

/// Install the global subscriber, ignoring a subscriber that is already set.
pub fn init(verbose: bool) {
    if let Err(e) = try_init(verbose) {
        tracing::debug!("Tracing already initialised: {}", e);
    }
}

/// Install the global subscriber with verbosity taken from `TVM_VERBOSE`.
pub fn init_from_env() {
    init(tvm_core::env::verbose());
}

/// Logs how long an operation took when dropped.
#[derive(Debug)]
pub struct TimingGuard {
    name: String,
    start: Instant,
}

impl TimingGuard {
    /// Start timing `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start: Instant::now(),
        }
    }

    /// The operation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Time since the guard was created.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for TimingGuard {
    fn drop(&mut self) {
        tracing::debug!(
            operation = %self.name,
            duration_ms = self.elapsed().as_millis() as u64,
            "Operation completed"
        );
    }
}

/// Time a block, logging its duration under `$name`.
#[macro_export]
macro_rules! time {
    ($name:expr, $block:expr) => {{
        let _guard = $crate::TimingGuard::new($name);
        $block
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directives() {
        assert_eq!(
            default_directives(false),
            "tvm_core=warn,tvm_config=warn,tvm_toolchain=warn,tvm_telemetry=warn"
        );
        assert!(default_directives(true).contains("tvm_toolchain=debug"));
    }

    #[test]
    fn test_directives_parse() {
        for verbose in [false, true] {
            assert!(EnvFilter::try_new(default_directives(verbose)).is_ok());
        }
    }

    #[test]
    fn test_timing_guard() {
        let guard = TimingGuard::new("scan python");
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(guard.name(), "scan python");
        assert!(guard.elapsed() >= Duration::from_millis(5));
    }

    #[test]
    fn test_time_macro_returns_block_value() {
        let value = time!("sum", { (1..=4).sum::<u32>() });
        assert_eq!(value, 10);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(false);
        init(true);
        init_from_env();
        assert!(try_init(false).is_err());
    }
}
