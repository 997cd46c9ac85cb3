//! Resumable download and install across mirrors.
//!
//! Each attempt probes for a partial download, streams the archive into a
//! deterministic `.part` file, extracts it into the tool's root and records
//! the install. Failures move on to the next mirror.

use crate::error::{ExtractError, InstallError, NetworkError};
use crate::extract::extract_archive;
use crate::history::{DownloadHistory, DownloadStatus};
use crate::http::{HttpClients, check_status};
use crate::known::install_dir_name;
use crate::lock::MetadataLocks;
use crate::mirror::MirrorHealth;
use crate::rate_limit::RateLimiter;
use crate::remote::{fetch_rule, host_arch, render_url};
use crate::retry::RetryPolicy;
use crate::speed::SpeedLimiter;
use chrono::Utc;
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, HeaderMap, RANGE};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tvm_config::{ConfigStore, RemoteVersionEntry, ToolTemplate};
use tvm_telemetry::TimingGuard;

/// Bytes handed to the writer per step.
pub const CHUNK_SIZE: usize = 8192;

/// Directory under the data dir holding partial downloads.
pub const TEMP_DIR: &str = "temp_downloads";

/// Progress reported while a download runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    /// Cumulative bytes on disk and the expected total.
    Progress { downloaded: u64, total: u64 },
    /// A human-readable stage change.
    Status(String),
}

/// Options for a single download.
#[derive(Debug, Clone, Default)]
pub struct DownloadOptions {
    /// A remote entry whose `download_url` is used instead of building one.
    pub version_info: Option<RemoteVersionEntry>,
    /// Where progress and status events go.
    pub events: Option<UnboundedSender<DownloadEvent>>,
    /// Checked between chunks and between mirrors.
    pub cancel: CancellationToken,
}

impl DownloadOptions {
    fn emit(&self, event: DownloadEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }

    fn status(&self, message: impl Into<String>) {
        self.emit(DownloadEvent::Status(message.into()));
    }
}

/// Downloads and installs tool versions.
pub struct Installer {
    config: Arc<dyn ConfigStore>,
    http: HttpClients,
    limiter: Arc<RateLimiter>,
    health: Arc<MirrorHealth>,
    locks: Arc<MetadataLocks>,
    history: Arc<DownloadHistory>,
}

/// Where a single attempt fetches from.
struct Attempt<'a> {
    tool: &'a str,
    version: &'a str,
    url: String,
    temp: PathBuf,
    target: PathBuf,
}

impl Installer {
    /// Create an installer. Retry count and speed limit are read from the
    /// settings at the start of every download.
    pub fn new(
        config: Arc<dyn ConfigStore>,
        http: HttpClients,
        limiter: Arc<RateLimiter>,
        health: Arc<MirrorHealth>,
        locks: Arc<MetadataLocks>,
        history: Arc<DownloadHistory>,
    ) -> Self {
        Self {
            config,
            http,
            limiter,
            health,
            locks,
            history,
        }
    }

    /// Partial download path for `tool` `version`.
    pub fn temp_path(&self, tool: &str, version: &str) -> PathBuf {
        self.config
            .data_dir()
            .join(TEMP_DIR)
            .join(format!("{tool}_{version}.zip.part"))
    }

    /// Download, extract and record `version` of `tool`.
    ///
    /// Returns `true` once one mirror succeeded. Every outcome is written to
    /// the download history.
    #[instrument(skip(self, options))]
    pub async fn download_version(&self, tool: &str, version: &str, options: &DownloadOptions) -> bool {
        let _timing = TimingGuard::new(format!("download {tool} {version}"));
        let Some(template) = self.config.tool_template(tool) else {
            error!("No template configured for {}", tool);
            return false;
        };
        if template.mirror_list.is_empty() {
            error!("No mirrors configured for {}", tool);
            return false;
        }
        let Some(root) = template.root() else {
            error!("No install root configured for {}", tool);
            return false;
        };
        if let Err(e) = tokio::fs::create_dir_all(&root).await {
            error!("Failed to create {}: {}", root.display(), e);
            return false;
        }

        let target = root.join(install_dir_name(tool, version));
        let temp = self.temp_path(tool, version);
        let explicit = options
            .version_info
            .as_ref()
            .map(|info| info.download_url.trim())
            .filter(|url| !url.is_empty());
        let mirrors = match explicit.and_then(|url| mirror_for_url(url, &template.mirror_list)) {
            Some(mirror) => vec![mirror],
            None => self.health.sorted(&template.mirror_list),
        };

        let mut errors = Vec::new();
        for mirror in &mirrors {
            if options.cancel.is_cancelled() {
                return self.cancelled(tool, version);
            }

            let url = match explicit {
                Some(url) => url.to_string(),
                None => match build_url(tool, version, &template, mirror) {
                    Some(url) => url,
                    None => {
                        let reason = format!("cannot build a download URL for {tool} {version}");
                        warn!("Mirror {} skipped: {}", mirror, reason);
                        self.health.record_failure(mirror, reason.clone());
                        errors.push(format!("{mirror}: {reason}"));
                        continue;
                    }
                },
            };

            info!("Downloading {} {} from {}", tool, version, url);
            options.status(format!("Downloading {tool} {version} from {mirror}"));
            let attempt = Attempt {
                tool,
                version,
                url,
                temp: temp.clone(),
                target: target.clone(),
            };
            match self.attempt(&attempt, options).await {
                Ok(()) => {
                    self.health.record_success(mirror);
                    self.history.add_record(
                        tool,
                        version,
                        DownloadStatus::Success,
                        None,
                        Some(attempt.url.clone()),
                    );
                    info!("Installed {} {} into {}", tool, version, target.display());
                    options.status(format!("Installed {tool} {version}"));
                    return true;
                }
                Err(InstallError::Cancelled) => return self.cancelled(tool, version),
                Err(e) => {
                    warn!("Mirror {} failed for {} {}: {}", mirror, tool, version, e);
                    self.health.record_failure(mirror, e.to_string());
                    errors.push(format!("{mirror}: {e}"));
                    options.status(format!("Mirror {mirror} failed: {e}"));
                }
            }
        }

        let summary = self.health.failure_summary_for(&mirrors);
        error!(
            "All mirrors failed for {} {}: {} ({} attempts)",
            tool,
            version,
            summary,
            errors.len()
        );
        self.history.add_record(
            tool,
            version,
            DownloadStatus::Failed,
            Some(format!("all mirrors failed: {summary}")),
            None,
        );
        false
    }

    fn cancelled(&self, tool: &str, version: &str) -> bool {
        info!("Download of {} {} cancelled", tool, version);
        self.history
            .add_record(tool, version, DownloadStatus::Failed, Some("cancelled".to_string()), None);
        false
    }

    async fn attempt(&self, attempt: &Attempt<'_>, options: &DownloadOptions) -> Result<(), InstallError> {
        let url = attempt.url.as_str();
        if let Some(parent) = attempt.temp.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| InstallError::io("Failed to create download directory", parent, e))?;
        }

        let (mut offset, mut total) = self.probe(url, &attempt.temp).await?;

        let settings = self.config.settings();
        let retry = RetryPolicy::with_max_retries(settings.download_retry_count);
        let client = self.http.download();
        let limiter = &self.limiter;
        let resume_from = offset;
        let response = retry
            .execute(|| async move {
                limiter.acquire().await;
                let mut request = client.get(url);
                if resume_from > 0 {
                    request = request.header(RANGE, format!("bytes={resume_from}-"));
                }
                let response = request
                    .send()
                    .await
                    .map_err(|e| NetworkError::from_reqwest(url, e))?;
                check_status(url, response)
            })
            .await?;

        if offset > 0 && response.status() != StatusCode::PARTIAL_CONTENT {
            info!("{} ignored the range request, restarting", url);
            offset = 0;
            total = 0;
        }
        if total == 0 {
            total = range_total(response.headers())
                .or_else(|| response.content_length().map(|len| len + offset))
                .unwrap_or(0);
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(offset > 0)
            .truncate(offset == 0)
            .open(&attempt.temp)
            .await
            .map_err(|e| InstallError::io("Failed to open download file", &attempt.temp, e))?;

        let mut speed = SpeedLimiter::new(settings.download_speed_limit);
        let mut downloaded = offset;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| NetworkError::from_reqwest(url, e))?;
            for piece in chunk.chunks(CHUNK_SIZE) {
                if options.cancel.is_cancelled() {
                    file.flush()
                        .await
                        .map_err(|e| InstallError::io("Failed to flush download", &attempt.temp, e))?;
                    return Err(InstallError::Cancelled);
                }
                speed
                    .write(&mut file, piece)
                    .await
                    .map_err(|e| InstallError::io("Failed to write download", &attempt.temp, e))?;
                downloaded += piece.len() as u64;
                if total > 0 {
                    options.emit(DownloadEvent::Progress { downloaded, total });
                }
            }
        }
        file.flush()
            .await
            .map_err(|e| InstallError::io("Failed to flush download", &attempt.temp, e))?;
        drop(file);
        debug!("Downloaded {} bytes to {}", downloaded, attempt.temp.display());

        options.status("Extracting...");
        if let Err(e) = extract(&attempt.temp, &attempt.target).await {
            // A corrupt archive must not be resumed from.
            let _ = tokio::fs::remove_file(&attempt.temp).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::remove_file(&attempt.temp).await {
            debug!("Failed to remove {}: {}", attempt.temp.display(), e);
        }

        let _guard = self.locks.lock(attempt.tool).await;
        let mut metadata = self.config.tool_metadata(attempt.tool);
        metadata.upsert(attempt.version, attempt.target.clone(), Utc::now());
        self.config.save_tool_metadata(attempt.tool, &metadata)?;
        Ok(())
    }

    /// Size of any partial download and the expected total, if the server
    /// reports one.
    ///
    /// A 206 answer keeps the partial file; a 200 answer means the server
    /// ignores ranges and the download restarts from zero.
    async fn probe(&self, url: &str, temp: &Path) -> Result<(u64, u64), NetworkError> {
        let mut offset = match tokio::fs::metadata(temp).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => 0,
        };
        if offset > 0 {
            info!("Found partial download of {} bytes", offset);
        }

        self.limiter.acquire().await;
        let mut request = self.http.metadata().head(url);
        if offset > 0 {
            request = request.header(RANGE, format!("bytes={offset}-"));
        }
        let response = request
            .send()
            .await
            .map_err(|e| NetworkError::from_reqwest(url, e))?;

        let headers = response.headers();
        let total = match response.status() {
            StatusCode::PARTIAL_CONTENT if offset > 0 => {
                info!("Resuming from byte {}", offset);
                range_total(headers).unwrap_or(0)
            }
            StatusCode::OK if offset > 0 => {
                info!("Server does not support resume, restarting");
                offset = 0;
                header_length(headers).unwrap_or(0)
            }
            StatusCode::RANGE_NOT_SATISFIABLE if offset > 0 => {
                info!("Partial download is not resumable, restarting");
                offset = 0;
                0
            }
            status if status.is_success() => header_length(headers).unwrap_or(0),
            status => {
                debug!("Probe of {} answered {}", url, status);
                0
            }
        };
        Ok((offset, total))
    }
}

async fn extract(archive: &Path, target: &Path) -> Result<(), ExtractError> {
    let (archive, target) = (archive.to_path_buf(), target.to_path_buf());
    let path = archive.clone();
    tokio::task::spawn_blocking(move || extract_archive(&archive, &target))
        .await
        .map_err(|e| ExtractError::Archive {
            path,
            message: e.to_string(),
        })?
}

/// Total size from a `Content-Range: bytes a-b/total` header.
fn range_total(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(CONTENT_RANGE)?
        .to_str()
        .ok()?
        .rsplit('/')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// Size from a `Content-Length` header.
fn header_length(headers: &HeaderMap) -> Option<u64> {
    headers.get(CONTENT_LENGTH)?.to_str().ok()?.trim().parse().ok()
}

/// The configured mirror a download URL belongs to.
pub fn mirror_for_url(url: &str, mirrors: &[String]) -> Option<String> {
    mirrors.iter().find(|m| url.starts_with(m.as_str())).cloned()
}

/// Build the archive URL for `version` on `mirror`.
pub fn build_url(tool: &str, version: &str, template: &ToolTemplate, mirror: &str) -> Option<String> {
    let rule = fetch_rule(tool, template)?;
    if rule.download_url_template.trim().is_empty() {
        return None;
    }
    let arch = host_arch(&rule.arch_map);
    Some(render_url(&rule.download_url_template, mirror, version, &arch))
}
