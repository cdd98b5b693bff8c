//! Runtime configuration.
//!
//! [`RunConfig`] is the base configuration of a [`Runner`](crate::Runner);
//! a [`Task`](crate::Task) may carry [`RunConfigOverrides`] that are applied
//! on top of it when the task is compiled. Both are plain serde types, so
//! they can be loaded from any format the host application prefers.

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use serde::{Deserialize, Serialize};

/// Bounded retry policy with exponential backoff.
///
/// Used by agents for retryable model and tool failures. Backoff intervals
/// are not randomized, so that retries are reproducible.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. `1` disables retries.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_backoff_ms: u64,
    /// Upper bound of a single delay.
    pub max_backoff_ms: u64,
    /// Growth factor between delays.
    pub multiplier: f64,
}

impl RetryPolicy {
    /// A policy that never retries.
    #[inline]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub(crate) fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.max_backoff_ms))
            .with_multiplier(self.multiplier)
            .with_randomization_factor(0.0)
            .with_max_elapsed_time(None)
            .build()
    }

    #[inline]
    pub(crate) fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
            max_backoff_ms: 5_000,
            multiplier: 2.0,
        }
    }
}

/// Execution bounds applied to every task of a runner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Model turns allowed per agent activation.
    pub max_turns: u32,
    /// Timeout of a single model call.
    pub model_timeout_ms: u64,
    /// Timeout of a single tool call.
    pub tool_timeout_ms: u64,
    /// Tool results longer than this are truncated.
    pub max_tool_result_bytes: usize,
    /// Wall-clock bound of a whole task.
    pub task_timeout_ms: Option<u64>,
    /// Capacity of the per-task step event stream.
    pub event_buffer: usize,
    /// Retry policy for model and tool calls.
    pub retry: RetryPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_turns: 10,
            model_timeout_ms: 60_000,
            tool_timeout_ms: 30_000,
            max_tool_result_bytes: 16 * 1024,
            task_timeout_ms: None,
            event_buffer: 256,
            retry: RetryPolicy::default(),
        }
    }
}

impl RunConfig {
    /// Sets the turn limit.
    #[inline]
    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    /// Sets the model call timeout.
    #[inline]
    pub fn with_model_timeout(mut self, timeout: Duration) -> Self {
        self.model_timeout_ms = duration_to_ms(timeout);
        self
    }

    /// Sets the tool call timeout.
    #[inline]
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout_ms = duration_to_ms(timeout);
        self
    }

    /// Sets the tool result truncation bound.
    #[inline]
    pub fn with_max_tool_result_bytes(mut self, bytes: usize) -> Self {
        self.max_tool_result_bytes = bytes;
        self
    }

    /// Sets the task timeout.
    #[inline]
    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout_ms = Some(duration_to_ms(timeout));
        self
    }

    /// Sets the retry policy.
    #[inline]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the model call timeout.
    #[inline]
    pub fn model_timeout(&self) -> Duration {
        Duration::from_millis(self.model_timeout_ms)
    }

    /// Returns the tool call timeout.
    #[inline]
    pub fn tool_timeout(&self) -> Duration {
        Duration::from_millis(self.tool_timeout_ms)
    }

    /// Returns the task timeout.
    #[inline]
    pub fn task_timeout(&self) -> Option<Duration> {
        self.task_timeout_ms.map(Duration::from_millis)
    }
}

/// Per-task overrides of a [`RunConfig`]. `None` keeps the runner's value.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfigOverrides {
    /// Overrides [`RunConfig::max_turns`].
    pub max_turns: Option<u32>,
    /// Overrides [`RunConfig::model_timeout_ms`].
    pub model_timeout_ms: Option<u64>,
    /// Overrides [`RunConfig::tool_timeout_ms`].
    pub tool_timeout_ms: Option<u64>,
    /// Overrides [`RunConfig::max_tool_result_bytes`].
    pub max_tool_result_bytes: Option<usize>,
    /// Overrides [`RunConfig::task_timeout_ms`].
    pub task_timeout_ms: Option<u64>,
    /// Overrides [`RunConfig::retry`].
    pub retry: Option<RetryPolicy>,
}

impl RunConfigOverrides {
    /// Returns `base` with every set override applied.
    pub fn apply(&self, base: &RunConfig) -> RunConfig {
        let mut config = base.clone();
        if let Some(max_turns) = self.max_turns {
            config.max_turns = max_turns;
        }
        if let Some(timeout) = self.model_timeout_ms {
            config.model_timeout_ms = timeout;
        }
        if let Some(timeout) = self.tool_timeout_ms {
            config.tool_timeout_ms = timeout;
        }
        if let Some(bytes) = self.max_tool_result_bytes {
            config.max_tool_result_bytes = bytes;
        }
        if let Some(timeout) = self.task_timeout_ms {
            config.task_timeout_ms = Some(timeout);
        }
        if let Some(retry) = &self.retry {
            config.retry = retry.clone();
        }
        config
    }
}

#[inline]
fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
