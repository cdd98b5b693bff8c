use std::fmt::{self, Display};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::RunConfigOverrides;
use crate::id::TaskId;
use crate::topology::Topology;

/// A unit of work: an input bound to a topology.
///
/// A task is immutable once submitted.
#[derive(Clone)]
pub struct Task {
    id: TaskId,
    input: String,
    topology: Arc<Topology>,
    overrides: RunConfigOverrides,
}

impl Task {
    /// Creates a task with a fresh identifier.
    pub fn new<S: Into<String>>(input: S, topology: impl Into<Arc<Topology>>) -> Self {
        Self {
            id: TaskId::new(),
            input: input.into(),
            topology: topology.into(),
            overrides: RunConfigOverrides::default(),
        }
    }

    /// Sets the task identifier.
    #[inline]
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = id;
        self
    }

    /// Sets configuration overrides for this task only.
    #[inline]
    pub fn with_overrides(mut self, overrides: RunConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// Returns the task identifier.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the initial input.
    #[inline]
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Returns the bound topology.
    #[inline]
    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// Returns the configuration overrides.
    #[inline]
    pub fn overrides(&self) -> &RunConfigOverrides {
        &self.overrides
    }
}

/// Lifecycle state of a task.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Accepted, not started yet.
    Pending,
    /// At least one agent may be running.
    Running,
    /// Every branch completed.
    Succeeded,
    /// A task-fatal failure occurred.
    Failed,
    /// Stopped on request.
    Cancelled,
}

impl TaskState {
    /// Returns `true` for `Succeeded`, `Failed` and `Cancelled`.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Cancelled
        )
    }
}

impl Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Pending => write!(f, "pending"),
            TaskState::Running => write!(f, "running"),
            TaskState::Succeeded => write!(f, "succeeded"),
            TaskState::Failed => write!(f, "failed"),
            TaskState::Cancelled => write!(f, "cancelled"),
        }
    }
}
