//! Error taxonomy of the runtime.
//!
//! * [`ConfigurationError`]: invalid topology or bindings, raised before a
//!   task is accepted and never recorded as a step.
//! * [`AgentError`]: why an agent activation did not produce a message.
//! * [`TaskError`]: why a task ended in [`TaskState::Failed`](crate::TaskState::Failed).
//! * [`RecordError`]: trajectory misuse, always fatal to the task.
//!
//! Failed model and tool calls are not errors at this level: they are
//! recorded as failed steps, see [`FailureKind`](crate::trajectory::FailureKind).

use std::time::Duration;

use crate::id::{AgentId, Participant, TaskId};

/// Invalid topology, binding or registry setup.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    /// Two agents share a name.
    #[error("agent `{0}` is declared more than once")]
    DuplicateAgent(AgentId),
    /// An edge references an agent that is not declared.
    #[error("`{from}` references undeclared agent `{agent}`")]
    UnknownAgent {
        /// Owner of the edge.
        from: Participant,
        /// The missing agent.
        agent: AgentId,
    },
    /// No entry handoff was declared.
    #[error("topology has no entry")]
    MissingEntry,
    /// An agent declares more than one outgoing handoff.
    #[error("agent `{0}` declares more than one handoff")]
    DuplicateHandoff(AgentId),
    /// The handoff graph has a cycle and no hop bound.
    #[error("handoffs form a cycle ({}) and no hop bound is set", display_path(.path))]
    Cycle {
        /// Agents along the cycle, first agent repeated at the end.
        path: Vec<AgentId>,
    },
    /// The hop bound is zero.
    #[error("max hops must be positive")]
    ZeroHopBound,
    /// A fan-out has no branches.
    #[error("fan-out from `{0}` has no branches")]
    EmptyFanOut(Participant),
    /// A fan-out lists the same branch twice.
    #[error("fan-out from `{from}` lists `{agent}` more than once")]
    DuplicateBranch {
        /// Owner of the fan-out.
        from: Participant,
        /// The repeated branch.
        agent: AgentId,
    },
    /// A fan-out branch has its own handoff.
    #[error("fan-out branch `{0}` must not declare its own handoff")]
    BranchWithHandoff(AgentId),
    /// A fan-out joins at one of its own branches.
    #[error("fan-out from `{from}` joins at its own branch `{agent}`")]
    JoinIsBranch {
        /// Owner of the fan-out.
        from: Participant,
        /// The offending join agent.
        agent: AgentId,
    },
    /// A conditional handoff has no routes.
    #[error("conditional handoff from `{0}` has no routes")]
    EmptyConditional(Participant),
    /// A best-effort agent is not a fan-out branch.
    #[error("agent `{0}` is marked best-effort but is not a fan-out branch")]
    BestEffortOutsideFanOut(AgentId),
    /// Two bindings of one agent expose the same tool name.
    #[error("agent `{agent}` binds tool `{tool}` more than once")]
    DuplicateToolBinding {
        /// The agent.
        agent: AgentId,
        /// The repeated tool name.
        tool: String,
    },
    /// A binding names a tool the gateway does not know.
    #[error("agent `{agent}` binds unknown tool `{tool}` on server `{server}`")]
    UnknownTool {
        /// The agent.
        agent: AgentId,
        /// Tool server identifier.
        server: String,
        /// Tool name.
        tool: String,
    },
    /// An agent's model configuration names an unregistered provider.
    #[error("agent `{agent}` uses unregistered model provider `{provider}`")]
    UnknownModelProvider {
        /// The agent.
        agent: AgentId,
        /// The provider name.
        provider: String,
    },
}

fn display_path(path: &[AgentId]) -> String {
    path.iter()
        .map(AgentId::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Trajectory misuse.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RecordError {
    /// The trajectory was sealed before this step arrived.
    #[error("trajectory of task {0} is already sealed")]
    TrajectoryAlreadySealed(TaskId),
    /// No trajectory was opened for the task.
    #[error("no trajectory is open for task {0}")]
    UnknownTask(TaskId),
    /// The step belongs to another task.
    #[error("step of task {step} sent to the trajectory of task {task}")]
    TaskMismatch {
        /// Task owning the trajectory.
        task: TaskId,
        /// Task named by the step.
        step: TaskId,
    },
}

/// Why an agent activation did not produce an outgoing message.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum AgentError {
    /// The model kept failing after all retries.
    #[error(
        "model unavailable for agent `{agent}` after {attempts} attempt(s): {reason}"
    )]
    ModelUnavailable {
        /// The agent.
        agent: AgentId,
        /// Attempts made.
        attempts: u32,
        /// Kind of the last failure.
        kind: swarmrun_model::ErrorKind,
        /// Description of the last failure.
        reason: String,
    },
    /// The model was still requesting tools when the turn limit was hit.
    #[error("agent `{agent}` exceeded its limit of {max_turns} turn(s)")]
    TurnLimitExceeded {
        /// The agent.
        agent: AgentId,
        /// The limit.
        max_turns: u32,
    },
    /// The agent stopped because the task was cancelled.
    #[error("agent `{0}` was cancelled")]
    Cancelled(AgentId),
    /// A step could not be recorded.
    #[error(transparent)]
    Record(#[from] RecordError),
}

impl AgentError {
    /// Returns `true` if this error fails the task even on a best-effort
    /// branch.
    #[inline]
    pub fn is_task_fatal(&self) -> bool {
        matches!(
            self,
            AgentError::TurnLimitExceeded { .. } | AgentError::Record(_)
        )
    }
}

/// Why a task failed.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum TaskError {
    /// An agent failed on a branch that is not best-effort.
    #[error("agent `{agent}` failed: {source}")]
    Agent {
        /// The agent.
        agent: AgentId,
        /// The agent's error.
        source: AgentError,
    },
    /// No conditional route matched an output.
    #[error("no route matched the output of `{0}`")]
    NoRouteMatched(Participant),
    /// The task exceeded its hop bound.
    #[error("task exceeded its bound of {0} hop(s)")]
    HopLimitExceeded(u32),
    /// The task exceeded its wall-clock bound.
    #[error("task timed out after {0:?}")]
    TimedOut(Duration),
    /// A runtime step could not be recorded.
    #[error(transparent)]
    Record(#[from] RecordError),
    /// The task driver stopped abnormally.
    #[error("task driver aborted: {0}")]
    Aborted(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message() {
        let err = ConfigurationError::Cycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(
            err.to_string(),
            "handoffs form a cycle (a -> b -> a) and no hop bound is set"
        );
    }

    #[test]
    fn test_fatal_errors() {
        let agent = AgentId::new("x");
        assert!(
            AgentError::TurnLimitExceeded {
                agent: agent.clone(),
                max_turns: 3
            }
            .is_task_fatal()
        );
        assert!(!AgentError::Cancelled(agent.clone()).is_task_fatal());
        assert!(
            !AgentError::ModelUnavailable {
                agent,
                attempts: 3,
                kind: swarmrun_model::ErrorKind::RateLimited,
                reason: "busy".to_owned(),
            }
            .is_task_fatal()
        );
    }
}
