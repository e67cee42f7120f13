//! Per-attempt timeout and retry with exponential backoff for provider fetches.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::CourtStatusProvider;
use crate::domain::{CourtStatusSnapshot, ProviderError};

/// How a single case's fetch is bounded and retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first (1 = no retries).
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles on each further attempt.
    pub backoff_base: Duration,
    /// Wall-clock limit for one attempt. Exceeding it counts as transient.
    pub per_attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff_base: Duration::from_millis(500),
            per_attempt_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.backoff_base.saturating_mul(factor)
    }
}

/// A fetch that eventually succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSuccess {
    pub snapshot: CourtStatusSnapshot,
    pub attempts: u32,
}

/// A fetch that gave up: permanent error, or transient errors until attempts ran out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fetch failed after {attempts} attempt(s): {error}")]
pub struct FetchFailure {
    pub error: ProviderError,
    pub attempts: u32,
}

/// Fetch `cnr_number` through `provider` under `policy`.
///
/// Permanent errors return immediately. Transient errors and timeouts are
/// retried until `max_attempts` is reached, sleeping
/// `backoff_base * 2^(attempt-1)` between attempts.
pub async fn fetch_with_retry(
    provider: &dyn CourtStatusProvider,
    cnr_number: &str,
    policy: &RetryPolicy,
) -> Result<FetchSuccess, FetchFailure> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let result = tokio::time::timeout(policy.per_attempt_timeout, provider.fetch(cnr_number))
            .await
            .unwrap_or_else(|_elapsed| {
                Err(ProviderError::Transient(format!(
                    "timed out after {}ms",
                    policy.per_attempt_timeout.as_millis()
                )))
            });

        match result {
            Ok(snapshot) => {
                return Ok(FetchSuccess {
                    snapshot,
                    attempts: attempt,
                })
            }
            Err(error @ ProviderError::Permanent(_)) => {
                return Err(FetchFailure {
                    error,
                    attempts: attempt,
                })
            }
            Err(error) if attempt >= max_attempts => {
                warn!(cnr = %cnr_number, attempts = attempt, error = %error, "retries exhausted");
                return Err(FetchFailure {
                    error,
                    attempts: attempt,
                });
            }
            Err(error) => {
                let delay = policy.backoff_after(attempt);
                debug!(
                    cnr = %cnr_number,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "transient fetch failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
