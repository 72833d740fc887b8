//! Retry executor with exponential backoff
//!
//! Wraps a single fallible asynchronous operation with backoff-driven
//! re-attempts. Failure classification is a pure function over
//! [`FailureCause`], so the retry table is testable without a network stack.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::error::{FailureCause, RetryError};

/// Bounds for one retry loop. Immutable; constructed once per call site or
/// defaulted.
///
/// Invariant: `base_delay <= max_delay` (checked by the config loader).
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Re-attempts after the first try; the operation runs at most
    /// `max_retries + 1` times.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
        }
    }
}

/// Verdict of the failure classifier for one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryVerdict {
    Retry,
    Stop,
}

/// Classify a failed attempt.
///
/// Transport failures and attempt timeouts are retryable; upstream statuses
/// of 429 or >= 500 are retryable; any other 4xx fails fast. Once the
/// attempt index reaches `max_retries` the verdict is `Stop` regardless of
/// cause.
pub fn classify(cause: &FailureCause, attempt: u32, max_retries: u32) -> RetryVerdict {
    if attempt >= max_retries {
        return RetryVerdict::Stop;
    }
    match cause {
        FailureCause::Transport(_) | FailureCause::Timeout { .. } => RetryVerdict::Retry,
        FailureCause::HttpStatus { status, .. } => match *status {
            429 => RetryVerdict::Retry,
            s if s >= 500 => RetryVerdict::Retry,
            _ => RetryVerdict::Stop,
        },
    }
}

/// Backoff delay for a 0-based attempt index:
/// `min(base_delay * 2^i + jitter, max_delay)` with jitter drawn uniformly
/// from `[0, 0.1 * base_delay * 2^i)`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    use rand::Rng;
    let exponential = policy
        .base_delay
        .saturating_mul(2_u32.saturating_pow(attempt));
    let jitter = exponential.mul_f64(rand::thread_rng().gen_range(0.0..0.1));
    exponential.saturating_add(jitter).min(policy.max_delay)
}

/// Run `operation` until it succeeds, the classifier says stop, or the
/// attempt budget runs out. Sleeps between attempts; performs no I/O beyond
/// invoking the operation itself.
pub async fn execute_with_retry<F, Fut, T>(
    mut operation: F,
    policy: &RetryPolicy,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FailureCause>>,
{
    let mut attempt: u32 = 0;
    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(attempts = attempt + 1, "operation succeeded after retries");
                }
                return Ok(value);
            }
            Err(cause) => match classify(&cause, attempt, policy.max_retries) {
                RetryVerdict::Stop if attempt >= policy.max_retries => {
                    warn!(
                        attempts = attempt + 1,
                        %cause,
                        "retry budget exhausted"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt + 1,
                        last: cause,
                    });
                }
                RetryVerdict::Stop => {
                    debug!(%cause, "non-retryable failure, failing fast");
                    return Err(RetryError::Fatal(cause));
                }
                RetryVerdict::Retry => {
                    let delay = backoff_delay(policy, attempt);
                    warn!(
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        %cause,
                        "attempt failed, backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
            },
        }
    }
}
