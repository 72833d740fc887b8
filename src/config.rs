//! Configuration for the resilience layer
//!
//! Aggregates retry, admission, and latency settings with sensible defaults,
//! a builder, environment overrides, and a TOML file loader.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::latency::{LatencyTarget, LatencyTargets, OperationKind};
use crate::rate_limit::RateLimitConfig;
use crate::retry::RetryPolicy;

/// Top-level configuration, constructed once at startup.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitConfig,
    pub latency: LatencyTargets,
}

/// Configuration loading or validation failure.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl PipelineConfig {
    /// Check the cross-field invariants the types cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.base_delay > self.retry.max_delay {
            return Err(ConfigError::Invalid(format!(
                "retry base_delay {:?} exceeds max_delay {:?}",
                self.retry.base_delay, self.retry.max_delay
            )));
        }
        for kind in [OperationKind::Plan, OperationKind::Ux, OperationKind::Deploy] {
            let target = self.latency.target(kind);
            if target.p50 > target.p95 {
                return Err(ConfigError::Invalid(format!(
                    "latency target for {kind}: p50 {:?} exceeds p95 {:?}",
                    target.p50, target.p95
                )));
            }
        }
        if self.rate_limit.window.is_zero() {
            return Err(ConfigError::Invalid(
                "rate limit window must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: PipelineConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.retry.max_retries = retries;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.retry.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.retry.max_delay = delay;
        self
    }

    pub fn rate_limit(mut self, limit: u32, window: Duration) -> Self {
        self.config.rate_limit = RateLimitConfig { limit, window };
        self
    }

    pub fn target(mut self, kind: OperationKind, p50: Duration, p95: Duration) -> Self {
        let target = LatencyTarget { p50, p95 };
        match kind {
            OperationKind::Plan => self.config.latency.plan = target,
            OperationKind::Ux => self.config.latency.ux = target,
            OperationKind::Deploy => self.config.latency.deploy = target,
        }
        self
    }

    pub fn max_timeout(mut self, timeout: Duration) -> Self {
        self.config.latency.max_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<PipelineConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Load defaults with environment overrides. Unparseable values are ignored
/// in favor of the default.
///
/// Recognized variables: `DRAFTGATE_MAX_RETRIES`,
/// `DRAFTGATE_BASE_DELAY_MS`, `DRAFTGATE_MAX_DELAY_MS`,
/// `DRAFTGATE_RATE_LIMIT`, `DRAFTGATE_RATE_WINDOW_SECS`,
/// `DRAFTGATE_MAX_TIMEOUT_SECS`.
pub fn from_env() -> PipelineConfig {
    let mut config = PipelineConfig::default();

    if let Some(retries) = env_parse::<u32>("DRAFTGATE_MAX_RETRIES") {
        config.retry.max_retries = retries;
    }
    if let Some(ms) = env_parse::<u64>("DRAFTGATE_BASE_DELAY_MS") {
        config.retry.base_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = env_parse::<u64>("DRAFTGATE_MAX_DELAY_MS") {
        config.retry.max_delay = Duration::from_millis(ms);
    }
    if let Some(limit) = env_parse::<u32>("DRAFTGATE_RATE_LIMIT") {
        config.rate_limit.limit = limit;
    }
    if let Some(secs) = env_parse::<u64>("DRAFTGATE_RATE_WINDOW_SECS") {
        config.rate_limit.window = Duration::from_secs(secs);
    }
    if let Some(secs) = env_parse::<u64>("DRAFTGATE_MAX_TIMEOUT_SECS") {
        config.latency.max_timeout = Duration::from_secs(secs);
    }

    config
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Load and validate configuration from a TOML file.
pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<PipelineConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_toml(&contents)
}

fn parse_toml(contents: &str) -> Result<PipelineConfig, ConfigError> {
    let config: PipelineConfig = toml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}
