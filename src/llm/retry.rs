//! Exponential Backoff Retry
//!
//! Transient LLM failures (rate limits, timeouts, 5xx) are retried with
//! doubling delays. Non-retryable errors fail immediately and a
//! Retry-After header, when present, overrides the computed delay.

use crate::llm::LlmError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Retry policy for one logical LLM call
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first (minimum 1)
    pub max_attempts: usize,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create a custom retry policy
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempt` (0-indexed): base * 2^attempt,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let millis = (self.base_delay.as_millis() as u64)
            .saturating_mul(2u64.saturating_pow(attempt as u32));
        Duration::from_millis(millis.min(self.max_delay.as_millis() as u64))
    }
}

/// Run `operation` until it succeeds, the error is non-retryable, or the
/// attempt budget is exhausted.
pub async fn call_with_retry<F, Fut, T>(mut operation: F, config: &RetryConfig) -> Result<T, LlmError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LlmError>>,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_retryable() || attempt + 1 >= config.max_attempts {
                    return Err(err);
                }

                let delay = match &err {
                    LlmError::RateLimited { retry_after: Some(d) } => *d,
                    _ => config.delay_for(attempt),
                };
                debug!(attempt, ?delay, error = %err, "retrying llm call");
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_config(max_attempts: usize) -> RetryConfig {
        RetryConfig::new(max_attempts, Duration::from_millis(1), Duration::from_millis(8))
    }

    // ==========================================
    // Delay Schedule Tests
    // ==========================================

    #[test]
    fn test_delays_double_and_cap() {
        let config = RetryConfig::new(5, Duration::from_secs(1), Duration::from_secs(4));
        assert_eq!(config.delay_for(0), Duration::from_secs(1));
        assert_eq!(config.delay_for(1), Duration::from_secs(2));
        assert_eq!(config.delay_for(2), Duration::from_secs(4));
        assert_eq!(config.delay_for(5), Duration::from_secs(4)); // capped
    }

    #[test]
    fn test_at_least_one_attempt() {
        let config = RetryConfig::new(0, Duration::from_secs(1), Duration::from_secs(1));
        assert_eq!(config.max_attempts, 1);
    }

    #[test]
    fn test_default_matches_policy() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.base_delay, Duration::from_secs(1));
    }

    // ==========================================
    // call_with_retry Tests
    // ==========================================

    #[tokio::test]
    async fn test_success_first_attempt() {
        let result = call_with_retry(|| async { Ok::<_, LlmError>(7) }, &fast_config(3)).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = call_with_retry(
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(LlmError::Timeout)
                    } else {
                        Ok("recovered")
                    }
                }
            },
            &fast_config(3),
        )
        .await;

        assert_eq!(result.unwrap(), "recovered");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempt_budget_exhausted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = call_with_retry(
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(LlmError::NetworkError("down".into()))
                }
            },
            &fast_config(3),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = call_with_retry(
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(LlmError::ApiError { status: 400, message: "bad request".into() })
                }
            },
            &fast_config(5),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_after_overrides_backoff() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let start = std::time::Instant::now();

        let result = call_with_retry(
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(LlmError::RateLimited {
                            retry_after: Some(Duration::from_millis(20)),
                        })
                    } else {
                        Ok("ok")
                    }
                }
            },
            &RetryConfig::new(2, Duration::from_millis(500), Duration::from_secs(1)),
        )
        .await;

        assert!(result.is_ok());
        // Waited the header's 20ms, not the configured 500ms base.
        assert!(start.elapsed() < Duration::from_millis(400));
    }
}
