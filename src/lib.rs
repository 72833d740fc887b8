//! # draftgate
//!
//! A request-resilience layer for a document-generation pipeline: retry with
//! exponential backoff, latency-aware parameter degradation, and per-caller
//! admission control for calls whose upstream latency is long and
//! unpredictable.
//!
//! ## Core Concepts
//!
//! - **Retry executor**: re-attempts a fallible asynchronous operation with
//!   jittered exponential backoff, classifying each failure as retryable or
//!   fatal via a pure function over [`FailureCause`].
//! - **Latency targets**: per-operation p50/p95 targets. An attempt that
//!   runs past its p95 makes the next attempt use a degraded
//!   [`GenerationParams`] (less depth, simpler format, lower temperature)
//!   instead of just waiting longer.
//! - **Rate limiter**: fixed-window admission control keyed by caller
//!   identity, checked before any retry logic runs.
//!
//! The three components share no mutable state and compose through
//! [`run_with_fallback`]; tower layers in [`resilience`] expose the same
//! policies as middleware.
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use draftgate::{
//!     run_with_fallback, FailureCause, GenerationParams, LatencyTargets,
//!     OperationKind, RateLimitConfig, RateLimiter, RetryPolicy,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//! let limiter = Arc::new(RateLimiter::new(RateLimitConfig::default()));
//! let decision = limiter.check("203.0.113.7");
//! if !decision.allowed {
//!     return Err("rate limited".into());
//! }
//!
//! let plan = run_with_fallback(
//!     OperationKind::Plan,
//!     GenerationParams::default(),
//!     |params| async move {
//!         // Call the generation backend with `params` here.
//!         Ok::<_, FailureCause>(format!("plan at depth {:?}", params.depth))
//!     },
//!     &RetryPolicy::default(),
//!     &LatencyTargets::default(),
//! )
//! .await?;
//!
//! println!("{plan}");
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod fallback;
pub mod latency;
pub mod rate_limit;
pub mod resilience;
pub mod retry;

pub use config::{from_env, from_file, ConfigBuilder, ConfigError, PipelineConfig};
pub use error::{FailureCause, PipelineError, Result, RetryError};
pub use fallback::run_with_fallback;
pub use latency::{
    Depth, GenerationParams, LatencyStatus, LatencyTarget, LatencyTargets, OperationKind,
    OutputFormat, BASELINE_PROMPT_VERSION, TEMPERATURE_FLOOR,
};
pub use rate_limit::{
    client_identity, spawn_sweeper, RateLimitConfig, RateLimitDecision, RateLimiter,
    SweeperHandle, UNKNOWN_IDENTITY,
};
pub use resilience::{AdmissionLayer, DeadlineLayer};
pub use retry::{backoff_delay, classify, execute_with_retry, RetryPolicy, RetryVerdict};
