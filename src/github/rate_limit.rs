//! Request budget for GitHub calls.
//!
//! A token bucket sized to the hourly quota paces outgoing requests; calls
//! that fail with a retryable error (rate limit, 5xx, transport) are retried
//! after a fixed delay until the retry budget runs out, then the error is
//! surfaced.

use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::error::{DevlogError, Result};
use crate::storage::RateLimitConfig;

const HOUR: Duration = Duration::from_secs(3600);

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
    /// No calls before this instant after the server pushed back.
    backoff_until: Option<Instant>,
    consecutive_hits: u32,
}

#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    per_second: f64,
    retry_delay: Duration,
    max_retries: u32,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        let capacity = f64::from(config.requests_per_hour.max(1));
        Self {
            capacity,
            per_second: capacity / HOUR.as_secs_f64(),
            retry_delay: Duration::from_millis(config.retry_delay_ms),
            max_retries: config.max_retries,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
                backoff_until: None,
                consecutive_hits: 0,
            }),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut BucketState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.per_second).min(self.capacity);
        state.last_refill = now;
    }

    /// Whole tokens currently available.
    pub fn remaining(&self) -> u32 {
        self.with_state(|state| {
            self.refill(state);
            state.tokens.floor() as u32
        })
    }

    /// Rate-limit responses since the last successful call.
    pub fn consecutive_hits(&self) -> u32 {
        self.with_state(|state| state.consecutive_hits)
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        loop {
            let wait = self.with_state(|state| {
                self.refill(state);
                let now = Instant::now();
                if let Some(until) = state.backoff_until {
                    if now < until {
                        return Some(until - now);
                    }
                    state.backoff_until = None;
                }
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(Duration::from_secs_f64((1.0 - state.tokens) / self.per_second))
                }
            });
            match wait {
                None => return,
                Some(delay) => {
                    tracing::debug!(wait_ms = delay.as_millis() as u64, "GitHub request budget exhausted, waiting");
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    fn record_rate_limit(&self) {
        self.with_state(|state| {
            state.consecutive_hits += 1;
            state.backoff_until = Some(Instant::now() + self.retry_delay);
        });
    }

    fn record_success(&self) {
        self.with_state(|state| {
            state.consecutive_hits = 0;
            state.backoff_until = None;
        });
    }

    /// Run `call` under the budget, retrying rate-limit and server errors
    /// up to `max_retries` times with the fixed retry delay.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            self.acquire().await;
            match call().await {
                Ok(value) => {
                    self.record_success();
                    return Ok(value);
                }
                Err(err) if attempt < self.max_retries && err.is_retryable() => {
                    attempt += 1;
                    if matches!(err, DevlogError::RateLimited { .. }) {
                        self.record_rate_limit();
                    }
                    tracing::warn!(
                        operation,
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "GitHub call failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(err) => {
                    if matches!(err, DevlogError::RateLimited { .. }) {
                        tracing::warn!(
                            operation,
                            attempts = attempt + 1,
                            hits = self.consecutive_hits(),
                            "GitHub rate limit retries exhausted"
                        );
                    }
                    return Err(err);
                }
            }
        }
    }
}
