//! Retry with exponential backoff and bounded jitter.
//!
//! Attempt `n` (0-based) that fails waits `initial_backoff * 2^n` plus a
//! uniformly random share of `max_jitter` before attempt `n + 1`. The clock
//! and the random source are injected so the policy can be tested without
//! real sleeps.

use anyhow::Result;
use async_trait::async_trait;
use pairguard_types::{Existence, RetryConfig};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Async sleep abstraction.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real sleeps on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Source of jitter fractions in `[0, 1)`.
pub trait JitterSource: Send + Sync {
    fn unit(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngJitter;

impl JitterSource for ThreadRngJitter {
    fn unit(&self) -> f64 {
        rand::thread_rng().gen::<f64>()
    }
}

/// Constant jitter fraction (clamped to `[0, 1]`).
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn unit(&self) -> f64 {
        self.0.clamp(0.0, 1.0)
    }
}

/// Result of a retried point query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOutcome {
    pub existence: Existence,
    /// Attempts actually made (1 + retries used).
    pub attempts: usize,
}

#[derive(Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
    jitter: Arc<dyn JitterSource>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy").field("config", &self.config).finish()
    }
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            sleeper: Arc::new(TokioSleeper),
            jitter: Arc::new(ThreadRngJitter),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay after failed attempt `attempt` for a given jitter fraction.
    pub fn backoff(&self, attempt: usize, jitter_unit: f64) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.config
            .initial_backoff
            .saturating_mul(factor)
            .saturating_add(self.config.max_jitter.mul_f64(jitter_unit.clamp(0.0, 1.0)))
    }

    /// Run `query` until it answers, retrying timeouts and errors.
    ///
    /// `Ok(true)` / `Ok(false)` are final answers. Errors and per-attempt
    /// timeouts are retried up to `config.retries` more times, after which
    /// the verdict is `Unknown`.
    pub async fn run<F, Fut>(&self, label: &str, mut query: F) -> RetryOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let mut attempt = 0usize;
        loop {
            match tokio::time::timeout(self.config.attempt_timeout, query()).await {
                Ok(Ok(found)) => {
                    return RetryOutcome {
                        existence: if found { Existence::Present } else { Existence::Absent },
                        attempts: attempt + 1,
                    };
                }
                Ok(Err(e)) => debug!(object = label, attempt, "point query failed: {:#}", e),
                Err(_) => debug!(
                    object = label,
                    attempt,
                    timeout_ms = self.config.attempt_timeout.as_millis() as u64,
                    "point query timed out"
                ),
            }
            if attempt >= self.config.retries {
                return RetryOutcome {
                    existence: Existence::Unknown,
                    attempts: attempt + 1,
                };
            }
            let delay = self.backoff(attempt, self.jitter.unit());
            self.sleeper.sleep(delay).await;
            attempt += 1;
        }
    }
}
