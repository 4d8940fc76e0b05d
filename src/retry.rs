//! Retry logic with exponential backoff
//!
//! Two shapes are provided:
//! - [`with_retry`] runs a short operation (opening or finalizing an upload session) to
//!   completion, sleeping between attempts.
//! - [`backoff_delay`] computes the delay for a given retry number so callers that keep
//!   explicit retry state (see [`UploadSession`](crate::upload::UploadSession)) can schedule
//!   the next attempt themselves.
//!
//! # Example
//!
//! ```no_run
//! use torrent_drive::retry::{IsRetryable, with_retry};
//! use torrent_drive::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{self:?}")
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! with_retry(&config, || async {
//!     // Your operation here
//!     Ok::<_, MyError>(())
//! }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, TransferError, UploadError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, rate limits, 5xx responses) should return `true`.
/// Permanent failures (invalid credentials, quota exceeded) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for UploadError {
    fn is_retryable(&self) -> bool {
        match self {
            UploadError::Retryable(_) | UploadError::Timeout(_) => true,
            UploadError::Permanent(_) => false,
        }
    }
}

impl IsRetryable for TransferError {
    fn is_retryable(&self) -> bool {
        match self {
            TransferError::Unavailable(_) | TransferError::Timeout(_) => true,
            TransferError::UnknownJob(_) | TransferError::Rejected(_) => false,
        }
    }
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Upload(e) => e.is_retryable(),
            Error::Transfer(e) => e.is_retryable(),
            // I/O errors can be retryable in some cases
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
            ),
            // Recorded failures are never auto-retried
            Error::MetadataUnavailable { .. } => false,
            Error::Database(_) | Error::Sqlx(_) => false,
            Error::Config { .. } => false,
            Error::InvalidSource(_) | Error::Job(_) => false,
            Error::ShuttingDown => false,
            Error::Serialization(_) => false,
            Error::Other(_) => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// The operation runs at most `1 + config.max_retries` times. Non-retryable errors are
/// returned immediately.
pub async fn with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut retries = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if retries > 0 {
                    tracing::info!(attempts = retries + 1, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && retries < config.max_retries => {
                retries += 1;
                let delay = backoff_delay(config, retries);

                tracing::warn!(
                    error = %e,
                    attempt = retries,
                    max_retries = config.max_retries,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = retries + 1,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Delay before retry number `retry` (1-based)
///
/// `initial_delay * backoff_multiplier^(retry - 1)`, capped at `max_delay`, then jittered
/// into `[d, 2d]` when enabled.
pub fn backoff_delay(config: &RetryConfig, retry: u32) -> Duration {
    let exponent = i32::try_from(retry.saturating_sub(1)).unwrap_or(i32::MAX);
    let secs = config.initial_delay.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    let delay = if secs.is_finite() && secs < config.max_delay.as_secs_f64() {
        Duration::from_secs_f64(secs)
    } else {
        config.max_delay
    };

    if config.jitter {
        add_jitter(delay)
    } else {
        delay
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay, so the result lies
/// between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
