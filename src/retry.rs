//! Retry utilities with exponential backoff.
//!
//! The provider adapters use these to absorb transient failures (connection
//! resets, 429s, 5xx responses) before a turn-fatal provider error is
//! allowed to propagate out of the agent loop.

use crate::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,

    /// Delay before the first retry
    pub initial_delay: Duration,

    /// Ceiling on the delay between retries
    pub max_delay: Duration,

    /// Multiplier applied to the delay after each attempt
    pub backoff_multiplier: f64,

    /// Random jitter fraction (0.0 to 1.0) spread around each delay
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum number of attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set initial delay
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Set jitter factor (clamped to 0.0..=1.0)
    pub fn with_jitter_factor(mut self, jitter: f64) -> Self {
        self.jitter_factor = jitter.clamp(0.0, 1.0);
        self
    }

    /// Delay for a given attempt: exponential growth capped at `max_delay`,
    /// then scaled by a random factor in `1.0 ± jitter_factor/2` so
    /// concurrent retries spread out instead of marching in lockstep.
    fn calculate_delay(&self, attempt: u32) -> Duration {
        let backoff = self
            .initial_delay
            .mul_f64(self.backoff_multiplier.powi(attempt as i32))
            .min(self.max_delay);
        let spread = 1.0 + (rand::random::<f64>() - 0.5) * self.jitter_factor;
        backoff.mul_f64(spread.max(0.0))
    }
}

/// Whether an error is worth retrying.
///
/// Transport failures, timeouts and provider-side 429/5xx responses are
/// transient; everything else (policy, configuration, bad input) is not.
pub fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::Http(_) => true,
        Error::Timeout => true,
        Error::Provider(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("504")
        }
        _ => false,
    }
}

/// Retry an async operation, sleeping with exponential backoff between
/// attempts, but only while the error is retryable.
///
/// Non-retryable errors return immediately; exhausting all attempts returns
/// the last error seen.
pub async fn retry_with_backoff<F, Fut, T>(config: RetryConfig, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                if !is_retryable_error(&err) {
                    return Err(err);
                }
                last_error = Some(err);
                if attempt < config.max_attempts - 1 {
                    sleep(config.calculate_delay(attempt)).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or_else(|| Error::other("retry exhausted with no error")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_retry_config_builder() {
        let config = RetryConfig::new()
            .with_max_attempts(5)
            .with_initial_delay(Duration::from_millis(200))
            .with_max_delay(Duration::from_secs(10))
            .with_backoff_multiplier(1.5)
            .with_jitter_factor(0.2);

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.initial_delay, Duration::from_millis(200));
        assert_eq!(config.backoff_multiplier, 1.5);
    }

    #[test]
    fn test_calculate_delay_grows() {
        let config = RetryConfig::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0)
            .with_jitter_factor(0.0);

        assert!(config.calculate_delay(1) > config.calculate_delay(0));
        assert!(config.calculate_delay(2) > config.calculate_delay(1));
    }

    #[test]
    fn test_is_retryable_error() {
        assert!(is_retryable_error(&Error::timeout()));
        assert!(is_retryable_error(&Error::provider("API error 429")));
        assert!(is_retryable_error(&Error::provider("API error 503")));
        assert!(!is_retryable_error(&Error::provider("API error 401")));
        assert!(!is_retryable_error(&Error::config("missing key")));
        assert!(!is_retryable_error(&Error::invalid_input("bad")));
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let config = RetryConfig::new()
            .with_max_attempts(3)
            .with_initial_delay(Duration::from_millis(1));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result = retry_with_backoff(config, move || {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err(Error::timeout())
                } else {
                    Ok::<_, Error>(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_returns_immediately() {
        let config = RetryConfig::new()
            .with_max_attempts(5)
            .with_initial_delay(Duration::from_millis(1));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<i32> = retry_with_backoff(config, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::config("fatal")) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let config = RetryConfig::new()
            .with_max_attempts(2)
            .with_initial_delay(Duration::from_millis(1));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let result: Result<i32> = retry_with_backoff(config, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::timeout()) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
