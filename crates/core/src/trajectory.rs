//! Append-only record of everything a task did.
//!
//! Every model call, tool call and routing decision becomes a [`StepEvent`].
//! The [`TrajectoryRecorder`] is the single ordering authority: it assigns
//! per-task sequence numbers in arrival order, starting at 1 without gaps.

mod recorder;
mod replay;
mod step;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use swarmrun_model::TokenUsage;

use crate::id::{AgentId, TaskId};
use crate::message::Message;

pub use recorder::{TrajectoryRecorder, TrajectorySink};
pub use replay::ReplayToolTransport;
pub use step::{
    FailureKind, PendingStep, RecordedStep, StepEvent, StepFailure, StepKind,
};

/// The sealed, read-only history of a task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    task_id: TaskId,
    steps: Vec<Arc<RecordedStep>>,
    terminal: Vec<Message>,
}

impl Trajectory {
    pub(crate) fn new(
        task_id: TaskId,
        steps: Vec<Arc<RecordedStep>>,
        terminal: Vec<Message>,
    ) -> Self {
        Self {
            task_id,
            steps,
            terminal,
        }
    }

    /// Returns the task identifier.
    #[inline]
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Returns the recorded steps in sequence order.
    #[inline]
    pub fn steps(&self) -> &[Arc<RecordedStep>] {
        &self.steps
    }

    /// Iterates over the step records in sequence order.
    pub fn records(&self) -> impl Iterator<Item = &RecordedStep> {
        self.steps.iter().map(Arc::as_ref)
    }

    /// Returns the steps recorded on behalf of `agent`.
    pub fn agent_steps<'a>(
        &'a self,
        agent: &'a AgentId,
    ) -> impl Iterator<Item = &'a RecordedStep> + 'a {
        self.records()
            .filter(move |step| step.event().agent().agent() == Some(agent))
    }

    /// Returns the final messages of the task.
    #[inline]
    pub fn terminal(&self) -> &[Message] {
        &self.terminal
    }

    /// Exports the steps as JSON lines, one record per line.
    pub fn to_json_lines(&self) -> Result<String, serde_json::Error> {
        let mut out = String::new();
        for step in self.records() {
            out.push_str(&serde_json::to_string(step)?);
            out.push('\n');
        }
        Ok(out)
    }

    /// Sums the token usage reported by successful model calls.
    pub fn token_usage(&self) -> TokenUsage {
        token_usage(self.records())
    }
}

pub(crate) fn token_usage<'a>(
    steps: impl Iterator<Item = &'a RecordedStep>,
) -> TokenUsage {
    let mut usage = TokenUsage::default();
    for step in steps {
        let event = step.event();
        if event.kind() != StepKind::ModelCall {
            continue;
        }
        let Some(reported) = event.output().and_then(|output| output.get("usage"))
        else {
            continue;
        };
        if let Ok(reported) = serde_json::from_value::<TokenUsage>(reported.clone()) {
            usage += reported;
        }
    }
    usage
}
