//! Error types for the resilience layer
//!
//! Classification and backoff stay internal; only terminal outcomes cross
//! the component boundary. Callers must not retry a `RateLimited` or
//! `UpstreamClient` error themselves.

use std::time::Duration;

use thiserror::Error;

use crate::latency::GenerationParams;

/// Result type alias for pipeline calls.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// The raw cause of a failed attempt, as fed to the retry classifier.
///
/// A distinct variant per failure channel keeps the classification table
/// testable independent of any networking stack.
#[derive(Debug, Clone, Error)]
pub enum FailureCause {
    /// Connectivity-level failure before any upstream response.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Upstream responded with an HTTP-like status code.
    #[error("upstream returned status {status}: {}", decoded_message(.body))]
    HttpStatus { status: u16, body: Option<String> },

    /// The attempt exceeded its deadline and was cancelled.
    #[error("attempt timed out after {elapsed:?}")]
    Timeout { elapsed: Duration },
}

/// Terminal outcome of a plain retry loop.
#[derive(Debug, Error)]
pub enum RetryError {
    /// Every attempt failed with a retryable cause.
    #[error("operation failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: FailureCause },

    /// A non-retryable cause ended the loop before the budget ran out.
    #[error("{0}")]
    Fatal(FailureCause),
}

/// Terminal outcome of a rate-limited, latency-aware generation call.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Local admission denial. Distinct from an upstream 429, which is an
    /// overload report during an already-admitted call and is retryable.
    #[error("rate limited: retry after {reset_after:?}")]
    RateLimited { reset_after: Duration },

    /// Upstream rejected the request outright (4xx other than 429).
    #[error("upstream rejected the request with status {status}: {message}")]
    UpstreamClient { status: u16, message: String },

    /// All attempts, including degraded ones, failed.
    #[error("generation failed after {attempts} attempts ({params_diff}): {last_cause}")]
    Exhausted {
        attempts: u32,
        last_cause: FailureCause,
        final_params: GenerationParams,
        /// Original-to-final parameter diff, for observability.
        params_diff: String,
    },
}

/// Best-effort extraction of a human-readable message from an upstream error
/// body. Tries the common JSON envelopes before falling back to raw text.
pub(crate) fn decoded_message(body: &Option<String>) -> String {
    let Some(body) = body else {
        return "no response body".to_string();
    };
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        let message = value
            .get("error")
            .and_then(|e| e.get("message"))
            .and_then(serde_json::Value::as_str)
            .or_else(|| value.get("message").and_then(serde_json::Value::as_str))
            .or_else(|| value.get("error").and_then(serde_json::Value::as_str));
        if let Some(message) = message {
            return message.to_string();
        }
    }
    body.trim().to_string()
}
