//! Version discovery, installation and switching for tvm.
//!
//! This crate handles:
//! - Comparing, sorting and grouping loosely formatted version strings
//! - Throttling and retrying mirror requests, tracking mirror health
//! - Discovering remote versions from HTML listings or JSON indexes
//! - Scanning and reconciling locally installed versions
//! - Resumable downloads with traversal-safe extraction
//! - Switching, locking and deleting versions through [`VersionManager`]

pub mod download;
pub mod environment;
pub mod error;
pub mod extract;
pub mod history;
pub mod http;
pub mod known;
pub mod local;
pub mod lock;
pub mod manager;
pub mod mirror;
pub mod rate_limit;
pub mod remote;
pub mod retry;
pub mod speed;
pub mod version;

pub use download::{DownloadEvent, DownloadOptions, Installer};
pub use environment::{Environment, MemoryEnvironment, ProfileEnvironment};
pub use error::{ExtractError, FetchError, InstallError, NetworkError};
pub use history::{DownloadHistory, DownloadRecord, DownloadStatus};
pub use http::HttpClients;
pub use known::KnownTool;
pub use local::{LocalScanner, SystemVersion};
pub use lock::MetadataLocks;
pub use manager::VersionManager;
pub use mirror::{MirrorHealth, MirrorHealthRecord};
pub use rate_limit::RateLimiter;
pub use remote::RemoteFetcher;
pub use retry::{RetryPolicy, Retryable};
pub use speed::SpeedLimiter;
pub use version::{VersionGroup, VersionLike, group_by_major, parse_key, sort_desc};
