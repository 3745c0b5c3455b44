//! Retry with exponential backoff for connection establishment.
//!
//! The driver's own retries are disabled; this module is the only place a
//! failed operation is attempted again, and only transient errors qualify.

use crate::constants::{CONNECT_BACKOFF_BASE, CONNECT_BACKOFF_CAP, MAX_CONNECT_ATTEMPTS};
use crate::error::ServerError;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `initial_delay * multiplier^n`.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Backoff multiplier (for exponential backoff).
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::connection()
    }
}

impl RetryConfig {
    /// Create a retry config with no retries (just execute once).
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Backoff used for the initial connect: 5 attempts, waiting 2s, 4s, 8s
    /// and 16s between them, never more than 30s.
    pub fn connection() -> Self {
        Self {
            max_attempts: MAX_CONNECT_ATTEMPTS,
            initial_delay: CONNECT_BACKOFF_BASE,
            max_delay: CONNECT_BACKOFF_CAP,
            multiplier: 2.0,
        }
    }

    /// Calculate the delay before a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_delay_ms =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let capped_delay_ms = base_delay_ms.min(self.max_delay.as_millis() as f64);

        Duration::from_millis(capped_delay_ms as u64)
    }
}

/// Result of a retry operation.
#[derive(Debug)]
pub struct RetryResult<T> {
    /// The successful result, if any.
    pub value: Option<T>,
    /// Number of attempts made.
    pub attempts: u32,
    /// Total time spent (including delays).
    pub total_duration: Duration,
    /// The last error, if the operation failed.
    pub last_error: Option<ServerError>,
}

impl<T> RetryResult<T> {
    /// Check if the operation succeeded.
    pub fn is_success(&self) -> bool {
        self.value.is_some()
    }

    /// Convert to a standard Result.
    pub fn into_result(self) -> Result<T, ServerError> {
        match self.value {
            Some(v) => Ok(v),
            None => Err(self
                .last_error
                .unwrap_or_else(|| ServerError::internal("Retry failed with no error captured"))),
        }
    }
}

/// Execute an async operation with retry logic.
///
/// The operation will be retried if it returns an error and the error
/// is considered transient (according to `ServerError::is_transient()`).
///
/// # Example
///
/// ```ignore
/// let config = RetryConfig::connection();
/// let store = retry_async(&config, || connector.connect(&uri, &options, observer.clone())).await;
/// ```
pub async fn retry_async<F, Fut, T>(config: &RetryConfig, operation: F) -> RetryResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ServerError>>,
{
    let start = Instant::now();
    let mut last_error = None;

    for attempt in 0..config.max_attempts {
        if attempt > 0 {
            let delay = config.delay_for_attempt(attempt);
            debug!("Retry attempt {} after {:?} delay", attempt + 1, delay);
            sleep(delay).await;
        }

        match operation().await {
            Ok(value) => {
                return RetryResult {
                    value: Some(value),
                    attempts: attempt + 1,
                    total_duration: start.elapsed(),
                    last_error: None,
                };
            }
            Err(e) => {
                if !e.is_transient() {
                    debug!("Non-transient error, not retrying: {}", e);
                    return RetryResult {
                        value: None,
                        attempts: attempt + 1,
                        total_duration: start.elapsed(),
                        last_error: Some(e),
                    };
                }

                if attempt + 1 < config.max_attempts {
                    warn!(
                        "Connection attempt {}/{} failed, retrying in {:?}: {}",
                        attempt + 1,
                        config.max_attempts,
                        config.delay_for_attempt(attempt + 1),
                        e
                    );
                }
                last_error = Some(e);
            }
        }
    }

    RetryResult {
        value: None,
        attempts: config.max_attempts,
        total_duration: start.elapsed(),
        last_error,
    }
}

/// Simple retry wrapper that returns Result.
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: F) -> Result<T, ServerError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ServerError>>,
{
    retry_async(config, operation).await.into_result()
}
