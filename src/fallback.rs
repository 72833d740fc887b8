//! Latency-aware generation calls
//!
//! Composes the retry executor with the latency targets: every attempt runs
//! under a deadline derived from [`LatencyTargets::recommended_timeout`], a
//! blown deadline is classified like any other retryable failure, and an
//! attempt that ran past its p95 makes the next attempt use degraded
//! parameters instead of just waiting longer.

use std::future::Future;
use std::time::Instant;

use tokio::time::{sleep, timeout};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::{decoded_message, FailureCause, PipelineError};
use crate::latency::{GenerationParams, LatencyTargets, OperationKind};
use crate::retry::{backoff_delay, classify, RetryPolicy, RetryVerdict};

/// Drive `invoke` to completion with retry, per-attempt deadlines, and
/// latency-triggered parameter degradation.
///
/// Attempts are strictly sequential; no attempt starts before the previous
/// one's failure is classified and the backoff delay elapses. Dropping the
/// returned future cancels whichever attempt is in flight without issuing
/// another.
///
/// Terminal outcomes are the success value, a fatal
/// [`PipelineError::UpstreamClient`], or [`PipelineError::Exhausted`]
/// carrying the last cause and the original-to-final parameter diff.
pub async fn run_with_fallback<F, Fut, T>(
    kind: OperationKind,
    initial_params: GenerationParams,
    mut invoke: F,
    policy: &RetryPolicy,
    targets: &LatencyTargets,
) -> Result<T, PipelineError>
where
    F: FnMut(GenerationParams) -> Fut,
    Fut: Future<Output = Result<T, FailureCause>>,
{
    let request_id = Uuid::new_v4();
    let span = info_span!("generation", %request_id, operation = %kind);
    async move {
        let original = initial_params.clone();
        let mut params = initial_params;
        let mut attempt: u32 = 0;
        loop {
            let deadline = targets.recommended_timeout(kind, &params);
            let started = Instant::now();
            let outcome = match timeout(deadline, invoke(params.clone())).await {
                Ok(result) => result,
                Err(_) => Err(FailureCause::Timeout {
                    elapsed: started.elapsed(),
                }),
            };
            let elapsed = started.elapsed();

            let cause = match outcome {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempts = attempt + 1, "generation succeeded after retries");
                    }
                    return Ok(value);
                }
                Err(cause) => cause,
            };

            match classify(&cause, attempt, policy.max_retries) {
                RetryVerdict::Stop => {
                    return Err(terminal_error(
                        attempt,
                        policy.max_retries,
                        cause,
                        &original,
                        params,
                    ));
                }
                RetryVerdict::Retry => {
                    if targets.should_degrade(elapsed, kind) {
                        let lighter = params.degraded();
                        info!(
                            elapsed_ms = elapsed.as_millis() as u64,
                            changes = %params.diff(&lighter),
                            "attempt ran past p95, degrading parameters"
                        );
                        params = lighter;
                    }
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
            }
        }
    }
    .instrument(span)
    .await
}

fn terminal_error(
    attempt: u32,
    max_retries: u32,
    cause: FailureCause,
    original: &GenerationParams,
    final_params: GenerationParams,
) -> PipelineError {
    // A stop verdict before the budget ran out can only be a non-retryable
    // upstream status.
    if attempt < max_retries {
        if let FailureCause::HttpStatus { status, body } = &cause {
            return PipelineError::UpstreamClient {
                status: *status,
                message: decoded_message(body),
            };
        }
    }
    PipelineError::Exhausted {
        attempts: attempt + 1,
        params_diff: original.diff(&final_params),
        final_params,
        last_cause: cause,
    }
}
