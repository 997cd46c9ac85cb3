//! Error types shared by the tvm crates.

use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ProgramMissing,
    Config,
    Validation,
    Io,
    Timeout,
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A version command named a program that is not on disk or on `PATH`.
    #[error("`{program}` could not be found")]
    ProgramMissing {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Missing template, unreadable state file, client construction failure.
    ///
    /// `hint` carries a short remediation the caller may show to a user.
    #[error("configuration error: {message}")]
    Config {
        message: String,
        path: Option<PathBuf>,
        hint: Option<String>,
    },

    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("{message} ({})", path.display())]
    Io {
        message: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A child process failed to start for a reason other than a missing binary.
    #[error("could not start `{program}`")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` did not finish within {seconds}s")]
    Timeout { command: String, seconds: u64 },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::ProgramMissing { .. } => ErrorCode::ProgramMissing,
            Self::Config { .. } => ErrorCode::Config,
            Self::Validation { .. } => ErrorCode::Validation,
            Self::Io { .. } | Self::Spawn { .. } => ErrorCode::Io,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Other(_) => ErrorCode::Internal,
        }
    }

    /// Remediation text attached to a configuration error, if any.
    pub fn hint(&self) -> Option<&str> {
        match self {
            Self::Config { hint, .. } => hint.as_deref(),
            _ => None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            path: None,
            hint: None,
        }
    }

    pub fn config_at(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self::Config {
            message: message.into(),
            path: Some(path.into()),
            hint: None,
        }
    }

    /// Attach a remediation hint. No-op for non-configuration errors.
    pub fn with_hint(mut self, text: impl Into<String>) -> Self {
        if let Self::Config { hint, .. } = &mut self {
            *hint = Some(text.into());
        }
        self
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    pub fn io(message: impl Into<String>, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            path: path.into(),
            source,
        }
    }

    /// Classify a failure to launch `program`.
    pub(crate) fn from_spawn(program: &str, source: std::io::Error) -> Self {
        let program = program.to_string();
        if source.kind() == std::io::ErrorKind::NotFound {
            Self::ProgramMissing { program, source }
        } else {
            Self::Spawn { program, source }
        }
    }
}
