//! Automatic retry with backoff for rate-limit and overload failures.
//!
//! Only [`ErrorKind::RateLimited`] and [`ErrorKind::Overloaded`] are retried.
//! Everything else is returned on the first failure. When the attempts run
//! out, the caller gets [`SessionError::RetriesExhausted`] with a message
//! that names the failure kind and suggests switching models.

use crate::error::{ErrorKind, ProviderError, SessionError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `attempt * base_delay`.
    Linear,
    /// `base_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    Exponential { multiplier: f64, max_delay: Duration },
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first (values below 1 behave as 1).
    pub max_retries: u32,
    /// Delay unit between attempts.
    pub base_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(2000),
            backoff: Backoff::Linear,
        }
    }
}

impl RetryConfig {
    /// Create a config with the given number of attempts. Uses linear backoff.
    pub fn with_retries(retries: u32) -> Self {
        Self {
            max_retries: retries,
            ..Default::default()
        }
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delay after the given failed attempt (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self.backoff {
            Backoff::Linear => self.base_delay.saturating_mul(attempt),
            Backoff::Exponential {
                multiplier,
                max_delay,
            } => {
                let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
                let secs = self.base_delay.as_secs_f64() * multiplier.powi(exponent);
                // Negative or NaN products fall back to the cap.
                Duration::try_from_secs_f64(secs.min(max_delay.as_secs_f64()))
                    .unwrap_or(max_delay)
            }
        }
    }

    fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Run `call` until it succeeds, fails with a non-transient error, or the
/// attempts run out.
///
/// `on_retry(attempt, delay, kind)` fires before each sleep.
pub async fn retry_api_call<T, F, Fut>(
    config: &RetryConfig,
    mut on_retry: impl FnMut(u32, Duration, ErrorKind),
    mut call: F,
) -> Result<T, SessionError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let attempts = config.attempts();
    let mut attempt = 1;
    loop {
        match call(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) => {
                let kind = e.kind();
                if !kind.is_transient() {
                    return Err(SessionError::Provider(e));
                }
                if attempt >= attempts {
                    warn!("Giving up after {attempt} attempts ({kind}): {e}");
                    return Err(SessionError::RetriesExhausted { kind, attempts });
                }
                let delay = config.delay_for_attempt(attempt);
                warn!("Transient API error (attempt {attempt}/{attempts}, {kind}): {e}. Retrying in {delay:?}...");
                on_retry(attempt, delay, kind);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
