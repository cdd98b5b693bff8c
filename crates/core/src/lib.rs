//! Core engine: tool gateway, agent loop, topology compiler, runner and
//! trajectory recording.
//!
//! A [`Task`] binds an input to a [`Topology`] of agents. The [`Runner`]
//! compiles the topology once, drives every agent's model/tool loop, routes
//! messages along the declared handoffs and records every model call, tool
//! call and handoff into an append-only [`Trajectory`].

#![deny(missing_docs)]
#![deny(clippy::missing_safety_doc)]

#[macro_use]
extern crate tracing;

mod agent;
pub mod config;
pub mod error;
mod id;
mod message;
mod model_client;
pub mod runner;
mod task;
pub mod tool;
pub mod topology;
pub mod trajectory;

pub use agent::{AgentDescriptor, AgentDescriptorBuilder};
pub use config::{RetryPolicy, RunConfig, RunConfigOverrides};
pub use error::{
    AgentError, ConfigurationError, RecordError, TaskError,
};
pub use id::{AgentId, Participant, TaskId};
pub use message::Message;
pub use model_client::ModelRegistry;
pub use runner::{Runner, RunnerBuilder, TaskHandle, TaskReport};
pub use task::{Task, TaskState};
pub use topology::{Topology, TopologyBuilder};
pub use trajectory::{Trajectory, TrajectoryRecorder};

/// Re-exports of the [`swarmrun_model`] crate.
pub mod model {
    pub use swarmrun_model::*;
}
