//! Per-mirror success and failure bookkeeping.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// Health of one mirror.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorHealthRecord {
    /// When the mirror last served a request.
    pub last_success: Option<DateTime<Utc>>,
    /// When the mirror last failed, cleared by a success.
    pub last_failure: Option<DateTime<Utc>>,
    /// Why it last failed.
    pub failure_reason: Option<String>,
    /// Failures since the last success.
    pub consecutive_failures: u32,
}

/// Mirror health shared by the fetcher and the installer.
///
/// Records live for the process lifetime only.
#[derive(Debug, Default)]
pub struct MirrorHealth {
    records: Mutex<HashMap<String, MirrorHealthRecord>>,
}

impl MirrorHealth {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, MirrorHealthRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a successful request, clearing the failure streak.
    pub fn record_success(&self, mirror: &str) {
        debug!(mirror, "Mirror succeeded");
        self.records().insert(
            mirror.to_string(),
            MirrorHealthRecord {
                last_success: Some(Utc::now()),
                ..Default::default()
            },
        );
    }

    /// Record a failed request.
    pub fn record_failure(&self, mirror: &str, reason: impl Into<String>) {
        let reason = reason.into();
        debug!(mirror, %reason, "Mirror failed");
        let mut records = self.records();
        let record = records.entry(mirror.to_string()).or_default();
        record.last_failure = Some(Utc::now());
        record.failure_reason = Some(reason);
        record.consecutive_failures += 1;
    }

    /// A snapshot of one mirror's record.
    pub fn record(&self, mirror: &str) -> Option<MirrorHealthRecord> {
        self.records().get(mirror).cloned()
    }

    /// Order `mirrors` by preference.
    ///
    /// Mirrors that have ever succeeded come first, then fewer consecutive
    /// failures, then the most recent success. Ties keep the given order.
    pub fn sorted(&self, mirrors: &[String]) -> Vec<String> {
        let records = self.records();
        let mut sorted = mirrors.to_vec();
        sorted.sort_by_cached_key(|mirror| {
            let record = records.get(mirror);
            let last_success = record.and_then(|r| r.last_success);
            let failures = record.map(|r| r.consecutive_failures).unwrap_or(0);
            (last_success.is_none(), failures, Reverse(last_success))
        });
        sorted
    }

    /// Describe every mirror with an outstanding failure.
    pub fn failure_summary(&self) -> String {
        let records = self.records();
        let mut mirrors: Vec<&String> = records.keys().collect();
        mirrors.sort();
        summarize(mirrors.into_iter().filter_map(|m| records.get(m).map(|r| (m.as_str(), r))))
    }

    /// Describe outstanding failures of `mirrors` only, in the given order.
    pub fn failure_summary_for(&self, mirrors: &[String]) -> String {
        let records = self.records();
        summarize(
            mirrors
                .iter()
                .filter_map(|m| records.get(m).map(|r| (m.as_str(), r))),
        )
    }
}

fn summarize<'a>(records: impl Iterator<Item = (&'a str, &'a MirrorHealthRecord)>) -> String {
    let parts: Vec<String> = records
        .filter(|(_, r)| r.last_failure.is_some())
        .map(|(mirror, r)| {
            format!(
                "{}: {} (consecutive failures: {})",
                mirror,
                r.failure_reason.as_deref().unwrap_or("unknown error"),
                r.consecutive_failures
            )
        })
        .collect();
    if parts.is_empty() {
        "no mirror failures recorded".to_string()
    } else {
        parts.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mirrors(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_fewer_failures_first() {
        let health = MirrorHealth::new();
        health.record_failure("B", "timeout");
        health.record_failure("B", "timeout");
        health.record_failure("A", "503");

        assert_eq!(health.sorted(&mirrors(&["B", "A"])), mirrors(&["A", "B"]));
    }

    #[test]
    fn test_success_tier_first() {
        let health = MirrorHealth::new();
        health.record_failure("A", "503");
        health.record_success("A");

        assert_eq!(
            health.sorted(&mirrors(&["C", "B", "A"])),
            mirrors(&["A", "C", "B"])
        );
        assert_eq!(health.record("A").unwrap().consecutive_failures, 0);
    }

    #[test]
    fn test_success_tier_prefers_recent() {
        let health = MirrorHealth::new();
        health.record_success("old");
        std::thread::sleep(std::time::Duration::from_millis(5));
        health.record_success("new");

        assert_eq!(
            health.sorted(&mirrors(&["old", "new"])),
            mirrors(&["new", "old"])
        );
    }

    #[test]
    fn test_untracked_keep_order() {
        let health = MirrorHealth::new();
        assert_eq!(
            health.sorted(&mirrors(&["x", "y", "z"])),
            mirrors(&["x", "y", "z"])
        );
    }

    #[test]
    fn test_failure_summary() {
        let health = MirrorHealth::new();
        assert_eq!(health.failure_summary(), "no mirror failures recorded");

        health.record_failure("https://b/", "HTTP 404");
        health.record_failure("https://a/", "timed out");
        health.record_failure("https://a/", "timed out");
        health.record_success("https://c/");

        assert_eq!(
            health.failure_summary(),
            "https://a/: timed out (consecutive failures: 2); https://b/: HTTP 404 (consecutive failures: 1)"
        );
        assert_eq!(
            health.failure_summary_for(&mirrors(&["https://b/", "https://c/"])),
            "https://b/: HTTP 404 (consecutive failures: 1)"
        );
    }
}
