use std::borrow::Borrow;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier of a [`Task`](crate::Task).
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    /// Generates a new random identifier.
    #[inline]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for TaskId {
    #[inline]
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.0, f)
    }
}

/// Name of an agent, unique within a topology.
///
/// Ordering is lexicographic; fan-in joins use it to break ties between
/// branches that completed at the same instant.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Creates an agent identifier.
    #[inline]
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self(name.into())
    }

    /// Returns the name as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AgentId {
    #[inline]
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AgentId {
    #[inline]
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&AgentId> for AgentId {
    #[inline]
    fn from(value: &AgentId) -> Self {
        value.clone()
    }
}

impl Borrow<str> for AgentId {
    #[inline]
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A party that can send or receive messages and own steps.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum Participant {
    /// The submitter of the task.
    Caller,
    /// The runtime itself, for routing and fan-in aggregation.
    Runtime,
    /// An agent of the topology.
    Agent(AgentId),
}

impl Participant {
    /// Returns the agent identity, if this participant is an agent.
    #[inline]
    pub fn agent(&self) -> Option<&AgentId> {
        match self {
            Participant::Agent(id) => Some(id),
            _ => None,
        }
    }
}

impl From<AgentId> for Participant {
    #[inline]
    fn from(value: AgentId) -> Self {
        Participant::Agent(value)
    }
}

impl Display for Participant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Participant::Caller => write!(f, "caller"),
            Participant::Runtime => write!(f, "runtime"),
            Participant::Agent(id) => write!(f, "{id}"),
        }
    }
}
