//! Rate pacing, rate-limit tracking, and retry with backoff.
//!
//! One pacing gate serializes request starts process-wide; the HTTP
//! requests themselves may still overlap. When the hourly remaining quota
//! drops below the low-water mark the gate slows down until the quota
//! recovers past the high-water mark.

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use serde::Serialize;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

/// Minimum delay between request starts under normal quota.
pub const BASE_DELAY: Duration = Duration::from_millis(100);

/// Minimum delay once the hourly quota runs low.
pub const RAISED_DELAY: Duration = Duration::from_secs(1);

/// Hourly-remaining threshold below which pacing slows down.
pub const LOW_WATER: i64 = 10;

/// Hourly-remaining threshold above which pacing recovers.
pub const HIGH_WATER: i64 = 100;

/// Most recently observed rate-limit headers, as an owned snapshot.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimits {
    pub hourly_limit: i64,
    pub hourly_remaining: i64,
    pub daily_limit: i64,
    pub daily_remaining: i64,
}

struct PaceState {
    current_delay: Duration,
    limits: Option<RateLimits>,
}

pub(crate) struct RatePacer {
    base_delay: Duration,
    raised_delay: Duration,
    /// Next instant a request may start.
    gate: AsyncMutex<Option<Instant>>,
    state: RwLock<PaceState>,
}

impl RatePacer {
    pub fn new(base_delay: Duration, raised_delay: Duration) -> Self {
        Self {
            base_delay,
            raised_delay,
            gate: AsyncMutex::new(None),
            state: RwLock::new(PaceState {
                current_delay: base_delay,
                limits: None,
            }),
        }
    }

    /// Claim the next request slot, sleeping until it opens. The sleep is
    /// preempted by cancellation.
    pub async fn wait_turn(&self, cancel: &CancelToken) -> Result<()> {
        cancel.check()?;

        let wait = {
            let mut next = self.gate.lock().await;
            let now = Instant::now();
            let delay = self.state.read().unwrap().current_delay;

            let start = match *next {
                Some(t) if t > now => t,
                _ => now,
            };
            *next = Some(start + delay);
            start.saturating_duration_since(now)
        };

        if !wait.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }

        Ok(())
    }

    /// Digest the rate-limit headers of a response and adjust pacing.
    pub fn observe(&self, headers: &reqwest::header::HeaderMap) {
        let header = |name: &str| -> Option<i64> {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse().ok())
        };

        let Some(hourly_remaining) = header("hourly-remaining") else {
            return;
        };

        let limits = RateLimits {
            hourly_limit: header("hourly-limit").unwrap_or_default(),
            hourly_remaining,
            daily_limit: header("daily-limit").unwrap_or_default(),
            daily_remaining: header("daily-remaining").unwrap_or_default(),
        };

        let mut state = self.state.write().unwrap();
        state.limits = Some(limits);

        if hourly_remaining < LOW_WATER && state.current_delay < self.raised_delay {
            tracing::warn!(
                hourly_remaining,
                "hourly quota low, raising request pacing to {:?}",
                self.raised_delay
            );
            state.current_delay = self.raised_delay;
        } else if hourly_remaining > HIGH_WATER && state.current_delay > self.base_delay {
            tracing::info!(hourly_remaining, "hourly quota recovered, restoring base pacing");
            state.current_delay = self.base_delay;
        }
    }

    pub fn limits(&self) -> Option<RateLimits> {
        self.state.read().unwrap().limits
    }

    pub fn current_delay(&self) -> Duration {
        self.state.read().unwrap().current_delay
    }
}

/// Retry policy for transient upstream failures. Delays double from the
/// initial value up to the cap, with the same 85-115% jitter the download
/// retry loop uses.
pub(crate) struct RetryPolicy {
    pub max_retries: u32,
    pub initial: Duration,
    pub max: Duration,
}

impl RetryPolicy {
    pub async fn run<T, F, Fut>(&self, cancel: &CancelToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;

        loop {
            cancel.check()?;

            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    let doubled = self.initial.saturating_mul(1 << (attempt - 1)).min(self.max);
                    let jitter = rand::random::<f64>() * 0.3 + 0.85;
                    let delay = doubled.mul_f64(jitter).min(self.max);

                    tracing::warn!(
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "transient registry failure: {}, retrying",
                        e
                    );

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(Error::Cancelled),
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
