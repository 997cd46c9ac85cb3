//! Running a tool's version command.
//!
//! Version probes are short-lived and untrusted: stdin is closed, both
//! streams are captured, and a probe that outlives its timeout is killed.

use std::ffi::{OsStr, OsString};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Captured result of a finished child process.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stdout followed by stderr. `java -version` writes to stderr.
    pub fn combined(&self) -> String {
        let mut text = String::with_capacity(self.stdout.len() + self.stderr.len());
        text.push_str(&self.stdout);
        text.push_str(&self.stderr);
        text
    }
}

#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill any child that runs longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub async fn run(
        &self,
        program: impl AsRef<OsStr>,
        args: impl IntoIterator<Item = impl AsRef<OsStr>>,
    ) -> Result<CommandOutput> {
        let program = program.as_ref();
        let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_os_string()).collect();
        let label = describe(program, &args);
        debug!(command = %label, "spawning");

        let mut cmd = Command::new(program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let output = match self.timeout {
            None => cmd.output().await,
            // The child is owned by the output future; dropping it on
            // expiry kills the process.
            Some(limit) => tokio::time::timeout(limit, cmd.output()).await.map_err(|_| {
                warn!(command = %label, "killed after {}s", limit.as_secs());
                Error::Timeout {
                    command: label.clone(),
                    seconds: limit.as_secs(),
                }
            })?,
        }
        .map_err(|e| Error::from_spawn(&program.to_string_lossy(), e))?;

        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            elapsed: started.elapsed(),
        };
        debug!(
            command = %label,
            status = ?result.status,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "finished"
        );
        Ok(result)
    }
}

fn describe(program: &OsStr, args: &[OsString]) -> String {
    let mut label = program.to_string_lossy().into_owned();
    for arg in args {
        label.push(' ');
        label.push_str(&arg.to_string_lossy());
    }
    label
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    #[tokio::test]
    async fn missing_program_is_reported() {
        let err = CommandRunner::new()
            .run("tvm-no-such-program", ["--version"])
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ProgramMissing);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn both_streams_are_captured() {
        let output = CommandRunner::new()
            .run("sh", ["-c", "echo 1.2.3; echo warn 1>&2; exit 2"])
            .await
            .unwrap();
        assert!(!output.success());
        assert_eq!(output.status, Some(2));
        assert_eq!(output.combined(), "1.2.3\nwarn\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_probe_is_killed() {
        let started = Instant::now();
        let err = CommandRunner::new()
            .with_timeout(Duration::from_millis(200))
            .run("sleep", ["5"])
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert!(err.to_string().starts_with("`sleep 5`"));
        assert!(started.elapsed() < Duration::from_secs(4));
    }
}
