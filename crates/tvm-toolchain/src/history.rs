//! Bounded download history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{info, warn};
use tvm_config::write_json_atomic;

/// History filename inside the data directory.
pub const HISTORY_FILENAME: &str = "download_history.json";

/// Maximum number of records kept.
pub const MAX_RECORDS: usize = 100;

/// Outcome of a download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Success,
    Failed,
}

/// One download attempt across all mirrors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub tool: String,
    pub version: String,
    pub status: DownloadStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
}

/// Most-recent-first download log persisted as JSON.
#[derive(Debug)]
pub struct DownloadHistory {
    path: PathBuf,
    records: Mutex<Vec<DownloadRecord>>,
}

impl DownloadHistory {
    /// Load the history kept in `dir`. A missing or unreadable file starts
    /// an empty history.
    pub fn open(dir: &Path) -> Self {
        let path = dir.join(HISTORY_FILENAME);
        let records = match std::fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring unreadable download history {}: {}", path.display(), e);
                Vec::new()
            }),
            Err(_) => Vec::new(),
        };
        Self {
            path,
            records: Mutex::new(records),
        }
    }

    /// Where the history is persisted.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Prepend a record, trimming to [`MAX_RECORDS`].
    pub fn add_record(
        &self,
        tool: &str,
        version: &str,
        status: DownloadStatus,
        error_message: Option<String>,
        download_url: Option<String>,
    ) {
        let record = DownloadRecord {
            tool: tool.to_string(),
            version: version.to_string(),
            status,
            timestamp: Utc::now(),
            error_message,
            download_url,
        };
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.insert(0, record);
        records.truncate(MAX_RECORDS);
        self.save(&records);
        info!("Recorded download history: {} {} - {:?}", tool, version, status);
    }

    /// Up to `limit` records, newest first, optionally for one tool.
    pub fn records(&self, tool: Option<&str>, limit: usize) -> Vec<DownloadRecord> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records
            .iter()
            .filter(|r| tool.is_none_or(|t| r.tool == t))
            .take(limit)
            .cloned()
            .collect()
    }

    /// Drop every record.
    pub fn clear(&self) {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        records.clear();
        self.save(&records);
        info!("Cleared download history");
    }

    fn save(&self, records: &[DownloadRecord]) {
        if let Err(e) = write_json_atomic(&self.path, records) {
            warn!("Failed to save download history: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_newest_first_and_filtered() {
        let dir = tempdir().unwrap();
        let history = DownloadHistory::open(dir.path());
        history.add_record("python", "3.10.4", DownloadStatus::Success, None, Some("u1".into()));
        history.add_record("node", "20.11.0", DownloadStatus::Failed, Some("boom".into()), None);
        history.add_record("python", "3.11.0", DownloadStatus::Success, None, None);

        let all = history.records(None, 10);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].version, "3.11.0");

        let python = history.records(Some("python"), 10);
        assert_eq!(python.len(), 2);
        assert_eq!(python[1].download_url.as_deref(), Some("u1"));

        assert_eq!(history.records(None, 1).len(), 1);
    }

    #[test]
    fn test_capped_and_persisted() {
        let dir = tempdir().unwrap();
        let history = DownloadHistory::open(dir.path());
        for i in 0..(MAX_RECORDS + 5) {
            history.add_record("java", &format!("17.0.{i}"), DownloadStatus::Success, None, None);
        }

        let reopened = DownloadHistory::open(dir.path());
        let records = reopened.records(None, usize::MAX);
        assert_eq!(records.len(), MAX_RECORDS);
        assert_eq!(records[0].version, format!("17.0.{}", MAX_RECORDS + 4));
    }

    #[test]
    fn test_status_serialises_lowercase() {
        let json = serde_json::to_string(&DownloadStatus::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
    }

    #[test]
    fn test_clear() {
        let dir = tempdir().unwrap();
        let history = DownloadHistory::open(dir.path());
        history.add_record("maven", "3.9.6", DownloadStatus::Success, None, None);
        history.clear();
        assert!(DownloadHistory::open(dir.path()).records(None, 10).is_empty());
    }
}
