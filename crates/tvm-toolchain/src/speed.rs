//! Download throughput cap.

use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::{Instant, sleep};

/// Bounds write throughput to a byte rate.
///
/// Throttling is per chunk: after each write the limiter sleeps for however
/// long that chunk should have taken, then starts measuring afresh. Bursts
/// between checks are not compensated, so the achieved rate is approximate.
#[derive(Debug)]
pub struct SpeedLimiter {
    bytes_per_sec: u64,
    pending: u64,
    since: Instant,
}

impl SpeedLimiter {
    /// Create a limiter. `0` disables limiting.
    pub fn new(bytes_per_sec: u64) -> Self {
        Self {
            bytes_per_sec,
            pending: 0,
            since: Instant::now(),
        }
    }

    /// Whether a limit is in effect.
    pub fn is_enabled(&self) -> bool {
        self.bytes_per_sec > 0
    }

    /// Write `chunk` to `sink`, then sleep if it went out faster than the limit.
    pub async fn write<W>(&mut self, sink: &mut W, chunk: &[u8]) -> std::io::Result<usize>
    where
        W: AsyncWrite + Unpin,
    {
        sink.write_all(chunk).await?;
        if !self.is_enabled() {
            return Ok(chunk.len());
        }

        self.pending += chunk.len() as u64;
        let expected = Duration::from_secs_f64(self.pending as f64 / self.bytes_per_sec as f64);
        let elapsed = self.since.elapsed();
        if elapsed < expected {
            sleep(expected - elapsed).await;
        }
        self.pending = 0;
        self.since = Instant::now();
        Ok(chunk.len())
    }
}
