//! Retry logic for BLE operations.
//!
//! [`ConnectionManager::connect`](crate::ConnectionManager::connect) makes a
//! single attempt. Callers that want to ride out transient radio failures
//! wrap it with [`with_retry`].
//!
//! # Example
//!
//! ```
//! use hygrolink_core::{ConnectError, RetryConfig, with_retry};
//!
//! # async fn example() -> Result<(), ConnectError> {
//! let config = RetryConfig::new(3);
//! let value = with_retry(&config, "connect", || async {
//!     // Your BLE operation here
//!     Ok::<_, ConnectError>(42)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{ConnectError, Error, PlatformError};

/// Backoff policy for [`with_retry`].
///
/// The delay before retry `n` (counting from 0) is
/// `initial_delay * backoff_multiplier^n`, capped at `max_delay`, plus up
/// to a quarter more when `jitter` is set.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts after the first one. 0 disables retrying.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl RetryConfig {
    /// Short backoff (100ms doubling up to 5s) with `max_retries` retries.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// A single attempt.
    pub fn none() -> Self {
        Self::new(0)
    }

    /// Backoff for connecting: starts at one second, capped at ten.
    ///
    /// A sensor may be busy with another central or slow to wake.
    pub fn for_connect(max_retries: u32) -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            ..Self::new(max_retries)
        }
    }

    /// Enable or disable jitter.
    #[must_use]
    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    fn backoff(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let delay = self
            .initial_delay
            .mul_f64(self.backoff_multiplier.powi(exponent).min(f64::from(u32::MAX)))
            .min(self.max_delay);
        if self.jitter {
            delay.mul_f64(rand::rng().random_range(1.0..1.25))
        } else {
            delay
        }
    }
}

/// Errors that know whether trying again could help.
pub trait Retryable {
    /// Whether the failed operation may succeed on another attempt.
    fn is_retryable(&self) -> bool;
}

impl Retryable for PlatformError {
    fn is_retryable(&self) -> bool {
        match self {
            PlatformError::Timeout { .. } | PlatformError::Stack(_) => true,
            PlatformError::AdapterUnavailable | PlatformError::PermissionDenied => false,
        }
    }
}

impl Retryable for ConnectError {
    fn is_retryable(&self) -> bool {
        match self {
            // The device may simply not have been in range yet.
            ConnectError::NoDevice { .. } => true,
            ConnectError::Platform { cause, .. } => cause.is_retryable(),
        }
    }
}

impl Retryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Connect(e) => e.is_retryable(),
            Error::Platform(e) => e.is_retryable(),
            Error::InvalidState { .. } | Error::UnknownIndex(_) => false,
        }
    }
}

/// Execute an async operation with retry logic.
///
/// Non-retryable errors are returned immediately. Otherwise the operation
/// runs up to `config.max_retries + 1` times and the last error is returned.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if !e.is_retryable() || attempt >= config.max_retries => return Err(e),
            Err(e) => {
                let delay = config.backoff(attempt);
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    operation_name,
                    attempt + 1,
                    config.max_retries + 1,
                    e,
                    delay
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hygrolink_types::BleAddress;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> ConnectError {
        ConnectError::Platform {
            address: BleAddress::new(1),
            cause: PlatformError::Stack("transient error".to_string()),
        }
    }

    #[test]
    fn test_retry_config_presets() {
        let config = RetryConfig::new(3);
        assert_eq!(config.max_retries, 3);
        assert!(config.jitter);

        assert_eq!(RetryConfig::none().max_retries, 0);

        let config = RetryConfig::for_connect(2);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.initial_delay, Duration::from_secs(1));
    }

    #[test]
    fn test_delay_calculation() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            jitter: false,
            max_retries: 5,
        };

        assert_eq!(config.backoff(0), Duration::from_millis(100));
        assert_eq!(config.backoff(1), Duration::from_millis(200));
        assert_eq!(config.backoff(2), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig::for_connect(10).jitter(false);
        assert_eq!(config.backoff(8), Duration::from_secs(10));
        assert_eq!(config.backoff(u32::MAX), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_a_quarter() {
        let config = RetryConfig::for_connect(3);
        for _ in 0..50 {
            let delay = config.backoff(0);
            assert!(delay >= Duration::from_secs(1));
            assert!(delay < Duration::from_millis(1250));
        }
    }

    #[test]
    fn test_is_retryable() {
        assert!(transient().is_retryable());
        assert!(
            ConnectError::NoDevice {
                address: BleAddress::new(1)
            }
            .is_retryable()
        );
        assert!(!PlatformError::AdapterUnavailable.is_retryable());
        assert!(!PlatformError::PermissionDenied.is_retryable());
        assert!(!Error::UnknownIndex(3).is_retryable());
        assert!(!Error::invalid_state("start scanning", "Stopped").is_retryable());
        assert!(Error::Connect(transient()).is_retryable());
    }

    #[tokio::test]
    async fn test_with_retry_immediate_success() {
        let config = RetryConfig::new(3);
        let result = with_retry(&config, "test", || async { Ok::<_, ConnectError>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_eventual_success() {
        let config = RetryConfig::new(3).jitter(false);
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result = with_retry(&config, "test", || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_all_fail() {
        let config = RetryConfig::new(2).jitter(false);
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result: Result<i32, _> = with_retry(&config, "test", || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            }
        })
        .await;

        assert_eq!(result.unwrap_err(), transient());
        assert_eq!(attempts.load(Ordering::SeqCst), 3); // 1 initial + 2 retries
    }

    #[tokio::test]
    async fn test_with_retry_non_retryable_error() {
        let config = RetryConfig::new(3);
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result: Result<i32, _> = with_retry(&config, "test", || {
            let attempts = Arc::clone(&attempts_clone);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(PlatformError::AdapterUnavailable)
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1); // No retries
    }
}
