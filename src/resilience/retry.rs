//! Bounded exponential backoff for rate-limited calls.

use super::ApiError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry limits for rate-limited remote calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based): `base_delay * 2^attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.base_delay.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or
/// exhausts the policy.
///
/// Backoff sleeps race `cancel`; cancellation returns [`ApiError::Cancelled`]
/// at once. The operation itself is expected to observe `cancel` too.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut op: F,
) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        if !err.is_retryable() {
            return Err(err);
        }
        if attempt >= policy.max_retries {
            warn!(attempts = attempt + 1, error = %err, "Giving up after rate limiting");
            return Err(err);
        }

        let delay = policy.delay_for(attempt);
        debug!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Rate limited, backing off");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ApiError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}
