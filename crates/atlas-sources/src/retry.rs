//! Backoff between attempts at one upstream GET.
//!
//! Whether a failure is worth another attempt is decided by
//! [`SourceError::is_retryable`]. This module only decides when: delays
//! double from `base_delay` up to `max_delay`, and no attempt is started
//! that would begin after the ingestion deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::SourceError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Attempts after the first one
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Single attempt
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO, Duration::ZERO)
    }

    /// Pause before retry number `retry` (0-based)
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Run `attempt` until it succeeds, fails with a non-retryable error, runs
/// out of retries, or the next try would start past `deadline`. The last
/// error is returned as is.
pub async fn with_retry<T, F, Fut>(
    config: &RetryConfig,
    deadline: Option<Instant>,
    mut attempt: F,
) -> Result<T, SourceError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, SourceError>>,
{
    let mut retries = 0;
    loop {
        let err = match attempt().await {
            Ok(value) => {
                if retries > 0 {
                    debug!(retries, "Upstream request recovered");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if retries >= config.max_retries || !err.is_retryable() {
            return Err(err);
        }

        let delay = config.backoff(retries);
        if deadline.is_some_and(|deadline| Instant::now() + delay >= deadline) {
            debug!(error = %err, ?delay, "Deadline too close for another attempt");
            return Err(err);
        }

        retries += 1;
        warn!(retry = retries, max = config.max_retries, ?delay, error = %err, "Retrying upstream request");
        tokio::time::sleep(delay).await;
    }
}
