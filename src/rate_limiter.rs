//! Token-bucket admission control for the producer.
//!
//! Budget refills continuously at `rate` units per second up to a burst of
//! one second's worth (at least one unit). The producer spends one unit per
//! emitted batch, so the point-level rate is `rate × batch_size`.

use crate::cancel::CancelToken;
use crate::error::{BenchError, BenchResult};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    /// Units per second; `None` admits everything immediately
    rate: Option<f64>,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Limiter refilling at `rate_per_sec`; non-positive or non-finite rates mean unlimited.
    pub fn new(rate_per_sec: f64) -> Self {
        if !(rate_per_sec.is_finite() && rate_per_sec > 0.0) {
            return Self::unlimited();
        }
        let burst = rate_per_sec.floor().max(1.0);
        Self {
            rate: Some(rate_per_sec),
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Limiter that never blocks.
    pub fn unlimited() -> Self {
        Self {
            rate: None,
            burst: f64::INFINITY,
            bucket: Mutex::new(Bucket {
                tokens: 0.0,
                last_refill: Instant::now(),
            }),
        }
    }

    /// From an optional rate (see [`WorkloadConfig::aggregate_rate`](crate::config::WorkloadConfig::aggregate_rate)).
    pub fn from_rate(rate: Option<f64>) -> Self {
        rate.map_or_else(Self::unlimited, Self::new)
    }

    /// Configured rate, `None` when unlimited.
    pub fn rate(&self) -> Option<f64> {
        self.rate
    }

    /// Maximum number of units that can be admitted back to back.
    pub fn burst(&self) -> f64 {
        self.burst
    }

    /// Time to refill one unit.
    pub fn period(&self) -> Option<Duration> {
        self.rate.map(|r| Duration::from_secs_f64(1.0 / r))
    }

    /// Take one unit if available, otherwise report how long until one is.
    fn try_acquire(&self) -> Option<Duration> {
        let rate = self.rate?;
        let mut bucket = self.bucket.lock().unwrap_or_else(|e| e.into_inner());

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * rate).min(self.burst);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            None
        } else {
            Some(Duration::from_secs_f64((1.0 - bucket.tokens) / rate))
        }
    }

    /// Wait until one unit of budget is available and consume it.
    ///
    /// Returns [`BenchError::RateLimited`] promptly once `cancel` fires,
    /// whether the caller was already waiting or not.
    pub async fn admit(&self, cancel: &CancelToken) -> BenchResult<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(BenchError::RateLimited);
            }
            let Some(wait) = self.try_acquire() else {
                return Ok(());
            };
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = cancel.cancelled() => return Err(BenchError::RateLimited),
            }
        }
    }
}
