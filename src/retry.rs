use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use tracing::warn;

use crate::config::RetryConfig;
use crate::error::{GmailError, Result};

/// Attempt cap plus exponential delay schedule for transient failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub randomization_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            randomization_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts; for tests
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            randomization_factor: 0.0,
        }
    }

    fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_delay)
            .with_multiplier(2.0)
            .with_randomization_factor(self.randomization_factor)
            .with_max_interval(self.max_delay)
            .with_max_elapsed_time(None)
            .build()
    }

    /// Delay before the next attempt. A provider-requested `Retry-After`
    /// wins over the schedule but never exceeds `max_delay`.
    fn delay_for(&self, schedule: &mut ExponentialBackoff, error: &GmailError) -> Duration {
        let scheduled = schedule.next_backoff().unwrap_or(self.max_delay);
        match error {
            GmailError::RateLimitExceeded { retry_after, .. } => scheduled
                .max(Duration::from_secs(*retry_after))
                .min(self.max_delay),
            _ => scheduled,
        }
    }
}

/// Execute an async operation, retrying transient failures with
/// exponential backoff until the attempt cap is reached.
///
/// Permanent errors return immediately. On exhaustion the last error is
/// returned unchanged, so a rate limit surfaces as `RateLimitExceeded`.
pub async fn with_retry<T, F, Fut>(operation_name: &str, policy: &RetryPolicy, operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    with_retry_when(operation_name, policy, GmailError::is_transient, operation).await
}

/// [`with_retry`] with a caller-chosen retry predicate, for requests where
/// only some transient failures are safe to repeat
pub async fn with_retry_when<T, F, Fut>(
    operation_name: &str,
    policy: &RetryPolicy,
    retryable: fn(&GmailError) -> bool,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut schedule = policy.schedule();
    let mut attempts = 0;

    loop {
        attempts += 1;
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if retryable(&e) && attempts < policy.max_attempts => {
                let delay = policy.delay_for(&mut schedule, &e);
                warn!(
                    "{} failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, attempts, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
