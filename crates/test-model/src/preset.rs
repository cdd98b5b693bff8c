use std::time::Duration;

use serde::{Deserialize, Serialize};
use swarmrun_model::{ErrorKind, TokenUsage, ToolCallRequest};
use serde_json::Value;

/// The events in a preset response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PresetEvent {
    #[serde(rename = "message_delta")]
    MessageDelta(String),
    #[serde(rename = "tool_call")]
    ToolCall(ToolCallRequest),
    #[serde(rename = "usage")]
    Usage(TokenUsage),
}

impl PresetEvent {
    /// Shorthand for a tool call event.
    #[inline]
    pub fn tool_call<I: Into<String>, N: Into<String>>(
        id: I,
        name: N,
        arguments: Value,
    ) -> Self {
        Self::ToolCall(ToolCallRequest {
            id: id.into(),
            name: name.into(),
            arguments,
        })
    }
}

/// The preset response for an assistant turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PresetResponse {
    /// Events in this response.
    pub events: Vec<PresetEvent>,
    /// If set, the request will fail in the first `failures` attempts.
    /// `Some(0)` means the request will fail infinitely.
    pub failures: Option<u64>,
    /// The kind of the injected failures.
    pub failure_kind: ErrorKind,
    /// Delay before the first event is delivered.
    pub delay: Option<Duration>,
}

impl PresetResponse {
    /// Creates a `PresetResponse` with the specified events.
    #[inline]
    pub fn with_events(events: impl Into<Vec<PresetEvent>>) -> Self {
        Self {
            events: events.into(),
            failures: None,
            failure_kind: ErrorKind::RateLimited,
            delay: None,
        }
    }

    /// Creates a `PresetResponse` with a single text message.
    #[inline]
    pub fn text<S: Into<String>>(text: S) -> Self {
        Self::with_events([PresetEvent::MessageDelta(text.into())])
    }

    /// Sets failure times before a successful response. `0` means the
    /// response will always be a failure.
    #[inline]
    pub fn with_failures(mut self, failures: u64) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Sets the kind of the injected failures.
    #[inline]
    pub fn with_failure_kind(mut self, kind: ErrorKind) -> Self {
        self.failure_kind = kind;
        self
    }

    /// Sets the delay before the response starts streaming.
    #[inline]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}
