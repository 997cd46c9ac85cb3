//! Per-tool single-writer discipline for persisted metadata.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// One async mutex per tool name.
///
/// Every read-modify-write of a tool's metadata runs while holding that
/// tool's guard. Different tools never contend.
#[derive(Debug, Default)]
pub struct MetadataLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl MetadataLocks {
    /// Create an empty lock table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `tool`'s metadata.
    pub async fn lock(&self, tool: &str) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(tool.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        trace!("Waiting for {} metadata lock", tool);
        mutex.lock_owned().await
    }
}
