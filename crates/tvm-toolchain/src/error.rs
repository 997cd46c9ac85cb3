//! Error types for downloads, extraction and installation.

use crate::retry::Retryable;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// A failed mirror request.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("transfer from {url} interrupted: {message}")]
    Body { url: String, message: String },

    #[error("invalid request to {url}: {message}")]
    Request { url: String, message: String },
}

impl NetworkError {
    /// Classify a reqwest error.
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        let url = url.to_string();
        if err.is_timeout() {
            Self::Timeout { url }
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
                url,
            }
        } else if err.is_connect() || err.is_request() {
            Self::Connect {
                url,
                message: err.to_string(),
            }
        } else if err.is_body() || err.is_decode() {
            Self::Body {
                url,
                message: err.to_string(),
            }
        } else {
            Self::Request {
                url,
                message: err.to_string(),
            }
        }
    }

    /// The HTTP status, if the server answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl Retryable for NetworkError {
    /// Timeouts, connection failures, interrupted transfers, 5xx, 408 and 429
    /// are worth another attempt. Everything else fails fast.
    fn is_transient(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connect { .. } | Self::Body { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::Request { .. } => false,
        }
    }
}

/// A failed version listing from one mirror.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error("invalid version pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("invalid version index: {0}")]
    Index(String),

    #[error("no fetch rule configured")]
    NoRule,

    #[error("mirror returned no valid versions")]
    Empty,
}

/// A failed or refused archive extraction.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("unsafe path in archive: {0}")]
    UnsafePath(String),

    #[error("archive entry {0} resolves outside the target directory")]
    Escape(String),

    #[error("corrupt archive {path}: {message}")]
    Archive { path: PathBuf, message: String },

    #[error("unrecognised archive format: {0}")]
    UnknownFormat(PathBuf),

    #[error("{message}: {path}: {source}")]
    Io {
        message: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ExtractError {
    pub(crate) fn io(message: impl Into<String>, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            path: path.into(),
            source,
        }
    }
}

/// A failed install attempt against one mirror.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("{message}: {path}: {source}")]
    Io {
        message: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{0}")]
    Config(String),

    #[error("cancelled")]
    Cancelled,
}

impl InstallError {
    pub(crate) fn io(message: impl Into<String>, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            message: message.into(),
            path: path.into(),
            source,
        }
    }
}

impl From<tvm_core::Error> for InstallError {
    fn from(err: tvm_core::Error) -> Self {
        Self::Config(err.to_string())
    }
}

impl Retryable for InstallError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Network(e) => e.is_transient(),
            _ => false,
        }
    }
}
