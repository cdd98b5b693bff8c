use std::sync::Arc;

use swarmrun_model::TokenUsage;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::id::TaskId;
use crate::message::Message;
use crate::task::TaskState;
use crate::trajectory::{RecordedStep, Trajectory, TrajectorySink};

/// The terminal result of a task.
///
/// The trajectory is always present, also when the task failed or was
/// cancelled.
#[derive(Clone, Debug)]
pub struct TaskReport {
    /// The task identifier.
    pub task_id: TaskId,
    /// `Succeeded`, `Failed` or `Cancelled`.
    pub state: TaskState,
    /// Messages returned to the caller, in the order they were produced.
    pub terminal: Vec<Message>,
    /// The sealed trajectory.
    pub trajectory: Trajectory,
    /// Tokens consumed by all model calls of the task.
    pub usage: TokenUsage,
    /// Why the task failed.
    pub error: Option<TaskError>,
}

impl TaskReport {
    /// Returns the content of the last terminal message.
    #[inline]
    pub fn output(&self) -> Option<&str> {
        self.terminal.last().map(Message::content)
    }
}

/// Handle on a submitted task.
///
/// Dropping the handle does not stop the task.
pub struct TaskHandle {
    task_id: TaskId,
    state: watch::Receiver<TaskState>,
    events: broadcast::Receiver<Arc<RecordedStep>>,
    cancel: CancellationToken,
    join: JoinHandle<TaskReport>,
    sink: TrajectorySink,
}

impl TaskHandle {
    pub(crate) fn new(
        task_id: TaskId,
        state: watch::Receiver<TaskState>,
        events: broadcast::Receiver<Arc<RecordedStep>>,
        cancel: CancellationToken,
        join: JoinHandle<TaskReport>,
        sink: TrajectorySink,
    ) -> Self {
        Self {
            task_id,
            state,
            events,
            cancel,
            join,
            sink,
        }
    }

    /// Returns the task identifier.
    #[inline]
    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Returns the current state.
    #[inline]
    pub fn state(&self) -> TaskState {
        *self.state.borrow()
    }

    /// Asks the task to stop.
    ///
    /// Agents stop at their next suspension point; calls already in flight
    /// complete and are recorded.
    #[inline]
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the next recorded step.
    ///
    /// Returns `None` once the task is terminal and every step has been
    /// delivered. Steps missed because this handle lagged behind are
    /// skipped; the sealed trajectory still has them.
    pub async fn next_event(&mut self) -> Option<Arc<RecordedStep>> {
        loop {
            match self.events.try_recv() {
                Ok(step) => return Some(step),
                Err(TryRecvError::Lagged(missed)) => {
                    warn!("event stream lagged, {missed} step(s) skipped");
                    continue;
                }
                Err(TryRecvError::Closed) => return None,
                Err(TryRecvError::Empty) => {}
            }
            if self.state.borrow().is_terminal() {
                return None;
            }

            tokio::select! {
                received = self.events.recv() => match received {
                    Ok(step) => return Some(step),
                    Err(RecvError::Lagged(missed)) => {
                        warn!("event stream lagged, {missed} step(s) skipped");
                    }
                    Err(RecvError::Closed) => return None,
                },
                changed = self.state.changed() => {
                    if changed.is_err() {
                        // The driver is gone; deliver what is buffered.
                        return self.events.try_recv().ok();
                    }
                }
            }
        }
    }

    /// Waits for the task to finish.
    pub async fn wait(self) -> TaskReport {
        match self.join.await {
            Ok(report) => report,
            Err(err) => {
                error!("task driver of {} aborted: {err}", self.task_id);
                let trajectory = match self.sink.seal(vec![]) {
                    Ok(trajectory) => trajectory,
                    Err(_) => Trajectory::new(self.task_id, self.sink.snapshot(), vec![]),
                };
                TaskReport {
                    task_id: self.task_id,
                    state: TaskState::Failed,
                    terminal: vec![],
                    usage: trajectory.token_usage(),
                    trajectory,
                    error: Some(TaskError::Aborted(err.to_string())),
                }
            }
        }
    }
}
