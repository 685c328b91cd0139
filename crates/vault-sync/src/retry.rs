//! Bounded retry with exponential backoff.
//!
//! The combinator is independent of the operation it retries and sleeps
//! through a [`Sleeper`], so tests can substitute a recording clock.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;

/// Configuration for push retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Multiplier applied to the delay after each further failure
    pub backoff_factor: f64,
    /// Upper bound for any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.powi(attempt.saturating_sub(1) as i32);
        let nanos = (self.base_delay.as_nanos() as f64 * factor).round();

        Duration::from_nanos(nanos.clamp(0.0, u64::MAX as f64) as u64).min(self.max_delay)
    }
}

/// Source of delays between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Real delays on the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// The last error after every attempt failed.
#[derive(Debug, Clone)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last_error: E,
}

/// Run `op` until it succeeds or `policy.max_attempts` attempts have failed.
///
/// `op` receives the 1-based attempt number. On success the number of
/// attempts used is returned alongside the value.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    sleeper: &dyn Sleeper,
    mut op: F,
) -> Result<(T, u32), RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok((value, attempt)),
            Err(e) if attempt >= max_attempts => {
                return Err(RetryError {
                    attempts: attempt,
                    last_error: e,
                });
            }
            Err(e) => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    "Attempt {}/{} failed: {}. Retrying in {}ms",
                    attempt,
                    max_attempts,
                    e,
                    delay.as_millis()
                );
                sleeper.sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
