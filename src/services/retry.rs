use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::domain::models::RetryConfig;

/// Bounded retry policy for provider calls that are safe to repeat
///
/// The operation receives the zero-based attempt number so it can do extra
/// work before a retry (for example re-fetching the server status first).
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Extra attempts after the first failure
    max_retries: u32,
    /// Pause before each retry
    backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub const fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    pub const fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_retries, Duration::from_millis(config.backoff_ms))
    }

    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Run `operation` until it succeeds or the retries are used up
    ///
    /// # Returns
    /// * `Ok(T)` - Some attempt succeeded
    /// * `Err(E)` - The error of the last attempt
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;

        loop {
            match operation(attempt).await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!("Operation succeeded after {} retries", attempt);
                    }
                    return Ok(result);
                }
                Err(err) if attempt < self.max_retries => {
                    warn!(
                        "Attempt {} failed: {}. Retrying in {:?}...",
                        attempt + 1,
                        err,
                        self.backoff
                    );
                    if !self.backoff.is_zero() {
                        sleep(self.backoff).await;
                    }
                    attempt += 1;
                }
                Err(err) => {
                    warn!("Operation failed after {} attempts: {}", attempt + 1, err);
                    return Err(err);
                }
            }
        }
    }
}
