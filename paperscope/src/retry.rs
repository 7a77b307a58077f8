use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// Bounded retry with exponential backoff: after failed attempt `n` (1-based) the
/// caller waits `base_delay * 2^(n-1)`, so a 1s base gives 1s, 2s, 4s...
/// There is no sleep after the final attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

/// The last error seen once every attempt has been used (or a non-retryable error hit).
#[derive(Debug)]
pub struct RetryError<E> {
    pub attempts: u32,
    pub last: E,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_millis(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self::new(max_attempts, Duration::from_millis(base_delay_ms))
    }

    /// Pause that follows failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }

    /// Retry `op` on every error.
    pub async fn run<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, RetryError<E>>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_if(label, op, |_| true).await
    }

    /// Retry `op` while `retryable` says the error is worth another attempt.
    pub async fn run_if<T, E, F, Fut, P>(
        &self,
        label: &str,
        mut op: F,
        retryable: P,
    ) -> Result<T, RetryError<E>>
    where
        E: Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(attempt, "{} succeeded after retry", label);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    if attempt >= self.max_attempts || !retryable(&e) {
                        warn!(attempt, max_attempts = self.max_attempts, "{} failed: {}", label, e);
                        return Err(RetryError { attempts: attempt, last: e });
                    }
                    let delay = self.delay_for(attempt);
                    warn!(
                        "{} attempt {}/{} failed: {}, retrying in {:?}",
                        label, attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
