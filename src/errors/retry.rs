use std::future::Future;
use std::time::Duration;
use rand::Rng;
use tracing::{debug, warn};

use super::types::WardenError;

/// Backoff policy for provider calls.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Single attempt. Fallback chains in tests use this to switch provider immediately.
    pub fn disabled() -> Self {
        Self { max_retries: 0, ..Default::default() }
    }

    /// Wait before retry number `attempt` (0-based).
    ///
    /// Rate limits back off linearly in steps of ten base delays, since the
    /// provider window rarely clears in under a few seconds. Everything else
    /// doubles from `base_delay` with up to 25% jitter. Both are capped at
    /// `max_delay`.
    pub fn delay_for(&self, error: &WardenError, attempt: u32) -> Duration {
        let delay = match error {
            WardenError::RateLimit(_) => self.base_delay.saturating_mul(10 * (attempt + 1)),
            _ => {
                let doubled = self.base_delay.saturating_mul(1u32 << attempt.min(16));
                let jitter = rand::thread_rng().gen_range(0.0..=0.25);
                doubled.mul_f64(1.0 + jitter)
            }
        };
        delay.min(self.max_delay)
    }
}

/// Run `factory` until it succeeds, returns a non-retryable error, or the
/// retry budget is spent. The last error is returned as-is.
pub async fn with_retry<F, Fut, T>(
    operation: &str,
    config: &RetryConfig,
    mut factory: F,
) -> Result<T, WardenError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, WardenError>>,
{
    let mut attempt = 0;
    loop {
        let error = match factory().await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };

        let class = error.classify();
        if !class.retryable {
            debug!(operation, error_type = class.error_type, "Not retrying");
            return Err(error);
        }
        if attempt >= config.max_retries {
            warn!(operation, attempts = attempt + 1, error = %error, "Retry budget spent");
            return Err(error);
        }

        let delay = config.delay_for(&error, attempt);
        warn!(
            operation,
            attempt = attempt + 1,
            error_type = class.error_type,
            delay_ms = delay.as_millis() as u64,
            error = %error,
            "Provider call failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
