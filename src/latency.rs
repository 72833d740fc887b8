//! Latency targets and parameter degradation
//!
//! Tracks how long a generation call has been running against per-operation
//! latency targets and, when a call overruns its p95, derives a lighter
//! parameter set for the next attempt instead of waiting longer.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Prompt version pinned on degradation so the fallback attempt exercises a
/// known-fast prompt rather than whatever experimental version was in effect.
pub const BASELINE_PROMPT_VERSION: &str = "baseline-v1";

/// Temperature never degrades below this.
pub const TEMPERATURE_FLOOR: f32 = 0.3;

const TEMPERATURE_STEP: f32 = 0.1;

/// The pipeline stages this layer fronts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Planning document generation.
    Plan,
    /// UX design document generation.
    Ux,
    /// Deployment trigger.
    Deploy,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Plan => "plan",
            OperationKind::Ux => "ux",
            OperationKind::Deploy => "deploy",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service-level latency targets for one operation kind.
///
/// `p50` is informational only (status reporting); `p95` is the sole
/// degradation trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatencyTarget {
    pub p50: Duration,
    pub p95: Duration,
}

/// Static target table keyed by operation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LatencyTargets {
    pub plan: LatencyTarget,
    pub ux: LatencyTarget,
    pub deploy: LatencyTarget,
    /// Hard cap on any recommended per-attempt timeout.
    pub max_timeout: Duration,
}

impl Default for LatencyTargets {
    fn default() -> Self {
        Self {
            plan: LatencyTarget {
                p50: Duration::from_secs(12),
                p95: Duration::from_secs(30),
            },
            ux: LatencyTarget {
                p50: Duration::from_secs(15),
                p95: Duration::from_secs(40),
            },
            deploy: LatencyTarget {
                p50: Duration::from_secs(2),
                p95: Duration::from_secs(8),
            },
            max_timeout: Duration::from_secs(120),
        }
    }
}

/// Where a running call sits relative to its targets. Informational only;
/// `Critical` coincides with the degradation trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyStatus {
    OnTrack,
    /// Past p50 but within p95.
    Slow,
    /// Past p95.
    Critical,
}

impl LatencyTargets {
    pub fn target(&self, kind: OperationKind) -> LatencyTarget {
        match kind {
            OperationKind::Plan => self.plan,
            OperationKind::Ux => self.ux,
            OperationKind::Deploy => self.deploy,
        }
    }

    /// True iff the elapsed time strictly exceeds the operation's p95.
    pub fn should_degrade(&self, elapsed: Duration, kind: OperationKind) -> bool {
        elapsed > self.target(kind).p95
    }

    pub fn status(&self, elapsed: Duration, kind: OperationKind) -> LatencyStatus {
        let target = self.target(kind);
        if elapsed > target.p95 {
            LatencyStatus::Critical
        } else if elapsed > target.p50 {
            LatencyStatus::Slow
        } else {
            LatencyStatus::OnTrack
        }
    }

    /// Advisory per-attempt deadline: `2 x p95`, scaled up for heavier
    /// parameter sets and capped at `max_timeout`. The caller owns the
    /// actual timer.
    pub fn recommended_timeout(&self, kind: OperationKind, params: &GenerationParams) -> Duration {
        let mut factor = 1.0_f64;
        factor += match params.depth {
            Depth::Deep => 0.5,
            Depth::Standard => 0.2,
            Depth::Brief => 0.0,
        };
        if params.format == OutputFormat::Markdown {
            factor += 0.1;
        }
        if params.revision_notes.as_deref().is_some_and(|n| !n.is_empty()) {
            factor += 0.3;
        }
        let base = self.target(kind).p95 * 2;
        base.mul_f64(factor).min(self.max_timeout)
    }
}

/// How much detail the generated document carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Depth {
    Brief,
    Standard,
    Deep,
}

impl Depth {
    /// One step down the ladder; `Brief` is the floor.
    fn degraded(self) -> Depth {
        match self {
            Depth::Deep => Depth::Standard,
            Depth::Standard | Depth::Brief => Depth::Brief,
        }
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Depth::Brief => "brief",
            Depth::Standard => "standard",
            Depth::Deep => "deep",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Markdown,
    Bulleted,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OutputFormat::Markdown => "markdown",
            OutputFormat::Bulleted => "bulleted",
        })
    }
}

/// Knobs handed to the generation backend for one attempt.
///
/// Degradation never mutates in place; it derives a strictly lighter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature in `[0, 1]`.
    pub temperature: f32,
    pub depth: Depth,
    pub format: OutputFormat,
    /// Caller-supplied revision guidance; cleared once degraded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision_notes: Option<String>,
    /// Prompt variant in effect; pinned to [`BASELINE_PROMPT_VERSION`] on
    /// degradation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_version: Option<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            depth: Depth::Standard,
            format: OutputFormat::Markdown,
            revision_notes: None,
            prompt_version: None,
        }
    }
}

impl GenerationParams {
    /// One step down the degradation ladder: depth deep -> standard -> brief,
    /// temperature down by 0.1 to a floor of 0.3, markdown -> bulleted
    /// (one-way), revision notes dropped, prompt version pinned to the
    /// baseline. Idempotent at the floor apart from the prompt pin.
    pub fn degraded(&self) -> GenerationParams {
        let temperature = if self.temperature <= TEMPERATURE_FLOOR {
            self.temperature
        } else {
            (self.temperature - TEMPERATURE_STEP).max(TEMPERATURE_FLOOR)
        };
        GenerationParams {
            temperature,
            depth: self.depth.degraded(),
            format: OutputFormat::Bulleted,
            revision_notes: None,
            prompt_version: Some(BASELINE_PROMPT_VERSION.to_string()),
        }
    }

    /// Human-readable field-by-field diff against a later value, for
    /// exhaustion reporting.
    pub fn diff(&self, later: &GenerationParams) -> String {
        let mut parts = Vec::new();
        if self.depth != later.depth {
            parts.push(format!("depth {} -> {}", self.depth, later.depth));
        }
        if (self.temperature - later.temperature).abs() > f32::EPSILON {
            parts.push(format!(
                "temperature {:.2} -> {:.2}",
                self.temperature, later.temperature
            ));
        }
        if self.format != later.format {
            parts.push(format!("format {} -> {}", self.format, later.format));
        }
        if self.revision_notes != later.revision_notes {
            parts.push(match (&self.revision_notes, &later.revision_notes) {
                (Some(_), None) => "revision notes cleared".to_string(),
                (None, Some(_)) => "revision notes added".to_string(),
                _ => "revision notes changed".to_string(),
            });
        }
        if self.prompt_version != later.prompt_version {
            parts.push(format!(
                "prompt version {} -> {}",
                self.prompt_version.as_deref().unwrap_or("default"),
                later.prompt_version.as_deref().unwrap_or("default")
            ));
        }
        if parts.is_empty() {
            "unchanged".to_string()
        } else {
            parts.join(", ")
        }
    }
}
