use std::future::Future;
use std::time::Duration;

use metrics::counter;

use super::AdapterError;

/// Bounded exponential backoff for transient adapter failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: u32,
    pub max_delay: Duration,
    /// Deadline for a single adapter call; exceeding it counts as `Network`.
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            backoff_factor: 2,
            max_delay: Duration::from_secs(30),
            call_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn delay_for(&self, attempt: u32, error: &AdapterError) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let backoff = self
            .base_delay
            .saturating_mul(self.backoff_factor.saturating_pow(exponent));

        let delay = match error {
            AdapterError::RateLimited {
                retry_after: Some(hint),
            } => backoff.max(*hint),
            _ => backoff,
        };

        delay.min(self.max_delay)
    }
}

/// Run `call` under the policy's timeout, retrying retryable errors.
///
/// `op` names the call in logs. Terminal errors and the last retryable error
/// after `max_attempts` are returned unchanged.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op: &str, call: F) -> Result<T, AdapterError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, AdapterError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = match tokio::time::timeout(policy.call_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(AdapterError::Network(format!(
                "{op} timed out after {}ms",
                policy.call_timeout.as_millis()
            ))),
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(op, attempts = attempt, "Adapter call succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = policy.delay_for(attempt, &e);
                tracing::warn!(
                    op,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retryable adapter error, backing off"
                );
                counter!("adapter_retries").increment(1);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(op, attempts = attempt, error = %e, "Adapter retries exhausted");
                } else {
                    tracing::warn!(op, error = %e, "Terminal adapter error");
                }
                return Err(e);
            }
        }
    }
}
