//! Token usage and latency tracking.
//!
//! [`Usage`] and [`Metrics`] are accumulated at turn boundaries by the
//! event loop and rolled up per node by the orchestrators. Both are
//! additive; accumulated totals only ever grow.

use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Token usage statistics from a model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Number of tokens in the input/prompt.
    #[serde(default)]
    pub input_tokens: u32,

    /// Number of tokens in the output/completion.
    #[serde(default)]
    pub output_tokens: u32,

    /// Total tokens used (input + output).
    #[serde(default)]
    pub total_tokens: u32,
}

impl Usage {
    /// Create a new usage record.
    #[must_use]
    pub const fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Create an empty usage record.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
        }
    }

    /// Check if no tokens were used.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.total_tokens == 0
    }
}

impl Add for Usage {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            input_tokens: self.input_tokens + rhs.input_tokens,
            output_tokens: self.output_tokens + rhs.output_tokens,
            total_tokens: self.total_tokens + rhs.total_tokens,
        }
    }
}

impl AddAssign for Usage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Latency metrics from a model call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metrics {
    /// Wall-clock latency of the call in milliseconds.
    #[serde(default)]
    pub latency_ms: u64,
}

impl Metrics {
    /// Create a new metrics record.
    #[must_use]
    pub const fn new(latency_ms: u64) -> Self {
        Self { latency_ms }
    }
}

impl Add for Metrics {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            latency_ms: self.latency_ms + rhs.latency_ms,
        }
    }
}

impl AddAssign for Metrics {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Accumulated metrics for a full event-loop invocation.
///
/// Updated once per cycle; totals are monotonically non-decreasing across
/// recursive cycles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLoopMetrics {
    /// Number of completed event-loop cycles.
    pub cycle_count: usize,

    /// Token usage accumulated across all cycles.
    pub accumulated_usage: Usage,

    /// Latency accumulated across all cycles.
    pub accumulated_metrics: Metrics,
}

impl EventLoopMetrics {
    /// Record one completed cycle.
    pub fn add_cycle(&mut self, usage: Usage, metrics: Metrics) {
        self.cycle_count += 1;
        self.accumulated_usage += usage;
        self.accumulated_metrics += metrics;
    }
}
