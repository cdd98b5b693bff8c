use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::{Participant, TaskId};
use crate::tool;

/// What a step records.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// One attempt of a model invocation.
    ModelCall,
    /// One attempt of a tool invocation, or a rejected tool-call intent.
    ToolCall,
    /// A routing decision taken by the runtime.
    Handoff,
    /// The terminal step of a cancelled agent.
    Cancelled,
}

/// Classification of a failed step.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The model call failed or timed out.
    ModelUnavailable,
    /// The tool did not answer in time.
    ToolTimeout,
    /// The tool server could not be reached.
    ToolUnreachable,
    /// The arguments were malformed or did not match the schema.
    ToolInvalidArguments,
    /// The tool server reported an application error.
    ToolError,
    /// The model asked for a tool the agent is not bound to.
    ToolRejected,
}

impl FailureKind {
    /// Returns `true` if the runtime retries steps failing this way.
    #[inline]
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::ModelUnavailable
                | FailureKind::ToolTimeout
                | FailureKind::ToolUnreachable
        )
    }
}

impl From<tool::ErrorKind> for FailureKind {
    fn from(kind: tool::ErrorKind) -> Self {
        match kind {
            tool::ErrorKind::Timeout => FailureKind::ToolTimeout,
            tool::ErrorKind::Unreachable => FailureKind::ToolUnreachable,
            tool::ErrorKind::InvalidArguments => {
                FailureKind::ToolInvalidArguments
            }
            tool::ErrorKind::ToolError => FailureKind::ToolError,
        }
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::ModelUnavailable => write!(f, "model unavailable"),
            FailureKind::ToolTimeout => write!(f, "tool timeout"),
            FailureKind::ToolUnreachable => write!(f, "tool unreachable"),
            FailureKind::ToolInvalidArguments => {
                write!(f, "tool invalid arguments")
            }
            FailureKind::ToolError => write!(f, "tool error"),
            FailureKind::ToolRejected => write!(f, "tool rejected"),
        }
    }
}

/// Failure descriptor of a step.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepFailure {
    /// Classification.
    pub kind: FailureKind,
    /// Human readable reason.
    pub reason: String,
    /// 1-based attempt number of the failed call.
    pub attempt: u32,
}

impl StepFailure {
    /// Creates a failure descriptor for the first attempt.
    #[inline]
    pub fn new<S: Into<String>>(kind: FailureKind, reason: S) -> Self {
        Self {
            kind,
            reason: reason.into(),
            attempt: 1,
        }
    }

    /// Sets the attempt number.
    #[inline]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

/// One atomic occurrence in the execution of a task.
///
/// Events are built with [`StepEvent::begin`] and finished with
/// [`PendingStep::succeed`] or [`PendingStep::fail`]; they cannot be
/// changed afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepEvent {
    task_id: TaskId,
    agent: Participant,
    kind: StepKind,
    input: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure: Option<StepFailure>,
    started_at: DateTime<Utc>,
    ended_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent: Option<u64>,
}

impl StepEvent {
    /// Starts a step now.
    pub fn begin<P: Into<Participant>>(
        task_id: TaskId,
        agent: P,
        kind: StepKind,
        input: Value,
    ) -> PendingStep {
        PendingStep {
            task_id,
            agent: agent.into(),
            kind,
            input,
            started_at: Utc::now(),
            parent: None,
        }
    }

    /// Returns the task identifier.
    #[inline]
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Returns who performed the step.
    #[inline]
    pub fn agent(&self) -> &Participant {
        &self.agent
    }

    /// Returns the step kind.
    #[inline]
    pub fn kind(&self) -> StepKind {
        self.kind
    }

    /// Returns the input snapshot.
    #[inline]
    pub fn input(&self) -> &Value {
        &self.input
    }

    /// Returns the output snapshot, if any.
    #[inline]
    pub fn output(&self) -> Option<&Value> {
        self.output.as_ref()
    }

    /// Returns the failure descriptor, if the step failed.
    #[inline]
    pub fn failure(&self) -> Option<&StepFailure> {
        self.failure.as_ref()
    }

    /// Returns `true` if the step failed.
    #[inline]
    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }

    /// Returns when the step started.
    #[inline]
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Returns when the step ended.
    #[inline]
    pub fn ended_at(&self) -> DateTime<Utc> {
        self.ended_at
    }

    /// Returns the sequence number of the model call that issued this
    /// step, for tool calls.
    #[inline]
    pub fn parent(&self) -> Option<u64> {
        self.parent
    }
}

/// A step that has started but not finished.
#[derive(Clone, Debug)]
pub struct PendingStep {
    task_id: TaskId,
    agent: Participant,
    kind: StepKind,
    input: Value,
    started_at: DateTime<Utc>,
    parent: Option<u64>,
}

impl PendingStep {
    /// Sets the parent step.
    #[inline]
    pub fn with_parent(mut self, parent: u64) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Finishes the step successfully.
    pub fn succeed(self, output: Value) -> StepEvent {
        self.finish(Some(output), None)
    }

    /// Finishes the step with a failure.
    pub fn fail(self, failure: StepFailure) -> StepEvent {
        self.finish(None, Some(failure))
    }

    fn finish(
        self,
        output: Option<Value>,
        failure: Option<StepFailure>,
    ) -> StepEvent {
        StepEvent {
            task_id: self.task_id,
            agent: self.agent,
            kind: self.kind,
            input: self.input,
            output,
            failure,
            started_at: self.started_at,
            ended_at: Utc::now(),
            parent: self.parent,
        }
    }
}

/// A step event with its position in the trajectory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordedStep {
    seq: u64,
    #[serde(flatten)]
    event: StepEvent,
}

impl RecordedStep {
    pub(crate) fn new(seq: u64, event: StepEvent) -> Self {
        Self { seq, event }
    }

    /// Returns the sequence number, starting at 1.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Returns the event.
    #[inline]
    pub fn event(&self) -> &StepEvent {
        &self.event
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::id::AgentId;

    #[test]
    fn test_record_shape() {
        let task_id = TaskId::new();
        let event = StepEvent::begin(
            task_id,
            AgentId::new("x"),
            StepKind::ToolCall,
            json!({"tool": "search"}),
        )
        .with_parent(3)
        .fail(
            StepFailure::new(FailureKind::ToolTimeout, "slow").with_attempt(2),
        );
        assert!(event.ended_at() >= event.started_at());

        let record = RecordedStep::new(4, event);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["seq"], 4);
        assert_eq!(value["task_id"], json!(task_id));
        assert_eq!(value["agent"], json!({"type": "agent", "name": "x"}));
        assert_eq!(value["kind"], "tool_call");
        assert_eq!(value["parent"], 3);
        assert_eq!(value["failure"]["kind"], "tool_timeout");
        assert_eq!(value["failure"]["attempt"], 2);
        assert!(value.get("output").is_none());

        let back: RecordedStep = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_failure_kind_from_tool_error() {
        assert_eq!(
            FailureKind::from(tool::ErrorKind::Unreachable),
            FailureKind::ToolUnreachable
        );
        assert!(FailureKind::ToolTimeout.is_retryable());
        assert!(!FailureKind::ToolRejected.is_retryable());
        assert!(!FailureKind::ToolError.is_retryable());
    }
}
