//! Throttle for outbound mirror requests.

use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::trace;

#[derive(Debug, Clone, Copy)]
enum Mode {
    /// No throttling.
    Unlimited,
    /// At least this long between successive permits.
    MinInterval(Duration),
    /// Bucket of `capacity` tokens refilled at `rate` tokens per second.
    TokenBucket { rate: f64, capacity: f64 },
}

#[derive(Debug)]
struct State {
    last_permit: Option<Instant>,
    tokens: f64,
    refilled_at: Instant,
}

/// A rate limiter shared by every request to mirrors.
///
/// The state lock is held while waiting, so concurrent callers are served
/// one at a time in lock order.
#[derive(Debug)]
pub struct RateLimiter {
    mode: Mode,
    state: Mutex<State>,
}

impl RateLimiter {
    fn with_mode(mode: Mode) -> Self {
        let tokens = match mode {
            Mode::TokenBucket { capacity, .. } => capacity,
            _ => 0.0,
        };
        Self {
            mode,
            state: Mutex::new(State {
                last_permit: None,
                tokens,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// A token bucket holding `rate` tokens, refilled at `rate` per second.
    ///
    /// A non-positive rate disables throttling.
    pub fn per_second(rate: f64) -> Self {
        if rate.is_finite() && rate > 0.0 {
            Self::with_mode(Mode::TokenBucket {
                rate,
                capacity: rate.max(1.0),
            })
        } else {
            Self::unlimited()
        }
    }

    /// Enforce a minimum interval between permits.
    pub fn min_interval(interval: Duration) -> Self {
        Self::with_mode(Mode::MinInterval(interval))
    }

    /// A limiter that never waits.
    pub fn unlimited() -> Self {
        Self::with_mode(Mode::Unlimited)
    }

    /// Wait until a request may proceed.
    pub async fn acquire(&self) {
        match self.mode {
            Mode::Unlimited => {}
            Mode::MinInterval(interval) => {
                let mut state = self.state.lock().await;
                if let Some(last) = state.last_permit {
                    let next = last + interval;
                    if Instant::now() < next {
                        trace!("Rate limited for {:?}", next - Instant::now());
                        sleep_until(next).await;
                    }
                }
                state.last_permit = Some(Instant::now());
            }
            Mode::TokenBucket { rate, capacity } => {
                let mut state = self.state.lock().await;
                loop {
                    let now = Instant::now();
                    let elapsed = now.duration_since(state.refilled_at).as_secs_f64();
                    state.tokens = (state.tokens + elapsed * rate).min(capacity);
                    state.refilled_at = now;

                    if state.tokens >= 1.0 {
                        state.tokens -= 1.0;
                        state.last_permit = Some(now);
                        return;
                    }

                    let wait = Duration::from_secs_f64((1.0 - state.tokens) / rate);
                    trace!("Rate limited for {:?}", wait);
                    sleep(wait).await;
                }
            }
        }
    }

    /// Refill the bucket and forget the last permit.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.last_permit = None;
        state.refilled_at = Instant::now();
        if let Mode::TokenBucket { capacity, .. } = self.mode {
            state.tokens = capacity;
        }
    }
}
