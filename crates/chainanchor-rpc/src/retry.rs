//! Exponential backoff retry policy.

use std::future::Future;
use std::time::Duration;

/// Configuration for the retry policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff: Duration,
    /// Maximum backoff delay (caps exponential growth).
    pub max_backoff: Duration,
    /// Multiplier applied to backoff on each retry.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    /// Per-block fetch defaults: 5 attempts, 500ms doubling up to 2s.
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

/// Stateless retry policy: the delay depends only on the attempt number.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Delay to wait after the `attempt`-th failure (1-based).
    /// Returns `None` once the attempt budget is spent.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt >= self.config.max_attempts {
            return None;
        }
        let base_ms = self.config.initial_backoff.as_millis() as f64
            * self.config.multiplier.powi((attempt - 1) as i32);
        let cap_ms = self.config.max_backoff.as_millis() as f64;
        Some(Duration::from_millis(base_ms.min(cap_ms) as u64))
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    /// The last error is returned.
    pub async fn retry<T, E, F, Fut>(&self, label: &str, op: F) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.retry_if(label, op, |_| true).await
    }

    /// Like [`retry`](Self::retry), but an error for which `retryable`
    /// returns `false` is returned at once.
    pub async fn retry_if<T, E, F, Fut, P>(&self, label: &str, mut op: F, retryable: P) -> Result<T, E>
    where
        E: std::fmt::Display,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if !retryable(&err) => return Err(err),
                Err(err) => match self.next_delay(attempt) {
                    Some(delay) => {
                        tracing::debug!(
                            op = label,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            error = %err,
                            "retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    None => return Err(err),
                },
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
