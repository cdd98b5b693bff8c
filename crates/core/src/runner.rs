//! Task submission and execution.
//!
//! A [`Runner`] owns the shared collaborators (tool gateway, model
//! providers, trajectory recorder) and the base [`RunConfig`]. Every
//! submitted [`Task`] is compiled once against them, then driven by a
//! single interpreter until no agent is ready and none is in flight.

mod execute;
mod handle;

use std::sync::Arc;

use swarmrun_model::ModelProvider;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub use handle::{TaskHandle, TaskReport};

use crate::config::RunConfig;
use crate::error::ConfigurationError;
use crate::model_client::ModelRegistry;
use crate::task::{Task, TaskState};
use crate::tool::ToolGateway;
use crate::topology::Plan;
use crate::trajectory::TrajectoryRecorder;

struct Inner {
    config: RunConfig,
    gateway: ToolGateway,
    models: ModelRegistry,
    recorder: TrajectoryRecorder,
}

/// Runs tasks.
///
/// The runner is cheap to clone; clones share their collaborators.
#[derive(Clone)]
pub struct Runner {
    inner: Arc<Inner>,
}

impl Runner {
    /// Creates a builder.
    #[inline]
    pub fn builder() -> RunnerBuilder {
        RunnerBuilder::default()
    }

    /// Returns the base configuration.
    #[inline]
    pub fn config(&self) -> &RunConfig {
        &self.inner.config
    }

    /// Returns the recorder holding the trajectories of submitted tasks.
    #[inline]
    pub fn recorder(&self) -> &TrajectoryRecorder {
        &self.inner.recorder
    }

    /// Compiles `task` and starts it in the background.
    ///
    /// Configuration errors are reported before anything runs or is
    /// recorded. Must be called within a Tokio runtime.
    pub fn submit(&self, task: Task) -> Result<TaskHandle, ConfigurationError> {
        let plan = self.compile(&task)?;
        let sink = self
            .inner
            .recorder
            .open_with_buffer(task.id(), plan.config().event_buffer);
        let events = sink.subscribe();
        let (state_tx, state_rx) = watch::channel(TaskState::Pending);
        let cancel = CancellationToken::new();

        let task_id = task.id();
        let span = debug_span!("task", %task_id);
        let join = tokio::spawn(
            execute::execute(plan, task, sink.clone(), cancel.clone(), state_tx)
                .instrument(span),
        );
        Ok(TaskHandle::new(task_id, state_rx, events, cancel, join, sink))
    }

    /// Runs `task` to completion.
    pub async fn run(&self, task: Task) -> Result<TaskReport, ConfigurationError> {
        let plan = self.compile(&task)?;
        let sink = self
            .inner
            .recorder
            .open_with_buffer(task.id(), plan.config().event_buffer);
        let (state_tx, _) = watch::channel(TaskState::Pending);

        let span = debug_span!("task", task_id = %task.id());
        let report =
            execute::execute(plan, task, sink, CancellationToken::new(), state_tx)
                .instrument(span)
                .await;
        Ok(report)
    }

    fn compile(&self, task: &Task) -> Result<Plan, ConfigurationError> {
        let config = Arc::new(task.overrides().apply(&self.inner.config));
        Plan::compile(
            task.topology(),
            config,
            &self.inner.gateway,
            &self.inner.models,
        )
        .inspect_err(|err| warn!("rejected task {}: {err}", task.id()))
    }
}

/// [`Runner`] builder.
#[derive(Default)]
pub struct RunnerBuilder {
    config: RunConfig,
    gateway: Option<ToolGateway>,
    models: ModelRegistry,
    recorder: Option<TrajectoryRecorder>,
}

impl RunnerBuilder {
    /// Sets the base configuration.
    #[inline]
    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the tool gateway. Without one, agents cannot bind any tool.
    #[inline]
    pub fn with_gateway(mut self, gateway: ToolGateway) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Registers a model provider under `name`.
    #[inline]
    pub fn with_model_provider<S, P>(mut self, name: S, provider: P) -> Self
    where
        S: Into<String>,
        P: ModelProvider + 'static,
    {
        self.models.register(name, provider);
        self
    }

    /// Replaces the model registry.
    #[inline]
    pub fn with_models(mut self, models: ModelRegistry) -> Self {
        self.models = models;
        self
    }

    /// Shares a recorder with other runners.
    #[inline]
    pub fn with_recorder(mut self, recorder: TrajectoryRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Builds the runner.
    pub fn build(self) -> Runner {
        Runner {
            inner: Arc::new(Inner {
                config: self.config,
                gateway: self.gateway.unwrap_or_else(ToolGateway::empty),
                models: self.models,
                recorder: self.recorder.unwrap_or_default(),
            }),
        }
    }
}
