use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tokio::sync::broadcast;

use super::{RecordedStep, StepEvent, Trajectory};
use crate::error::RecordError;
use crate::id::TaskId;
use crate::message::Message;

const DEFAULT_EVENT_BUFFER: usize = 256;

struct LogState {
    next_seq: u64,
    sealed: bool,
    steps: Vec<Arc<RecordedStep>>,
}

struct TaskLog {
    task_id: TaskId,
    state: Mutex<LogState>,
    events: broadcast::Sender<Arc<RecordedStep>>,
}

impl TaskLog {
    fn new(task_id: TaskId, buffer: usize) -> Self {
        let (events, _) = broadcast::channel(buffer.max(1));
        Self {
            task_id,
            state: Mutex::new(LogState {
                next_seq: 1,
                sealed: false,
                steps: vec![],
            }),
            events,
        }
    }

    #[inline]
    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(
        &self,
        event: StepEvent,
    ) -> Result<Arc<RecordedStep>, RecordError> {
        if event.task_id() != self.task_id {
            return Err(RecordError::TaskMismatch {
                task: self.task_id,
                step: event.task_id(),
            });
        }

        // Sequence assignment, append and publication form one critical
        // section, so subscribers observe steps in sequence order.
        let mut state = self.lock();
        if state.sealed {
            return Err(RecordError::TrajectoryAlreadySealed(self.task_id));
        }
        let step = Arc::new(RecordedStep::new(state.next_seq, event));
        state.next_seq += 1;
        state.steps.push(Arc::clone(&step));
        self.events.send(Arc::clone(&step)).ok();
        drop(state);

        trace!(
            "recorded step {} ({:?}) of task {}",
            step.seq(),
            step.event().kind(),
            self.task_id
        );
        Ok(step)
    }

    fn seal(&self, terminal: Vec<Message>) -> Result<Trajectory, RecordError> {
        let mut state = self.lock();
        if state.sealed {
            return Err(RecordError::TrajectoryAlreadySealed(self.task_id));
        }
        state.sealed = true;
        debug!(
            "sealed trajectory of task {} with {} steps",
            self.task_id,
            state.steps.len()
        );
        Ok(Trajectory::new(self.task_id, state.steps.clone(), terminal))
    }
}

/// Process-wide, task-scoped sink of step events.
///
/// Each task gets its own log; logs of different tasks never interact.
/// The recorder is cheap to clone.
#[derive(Clone, Default)]
pub struct TrajectoryRecorder {
    logs: Arc<DashMap<TaskId, Arc<TaskLog>>>,
}

impl TrajectoryRecorder {
    /// Creates an empty recorder.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the log of `task_id`, or returns the already opened one.
    #[inline]
    pub fn open(&self, task_id: TaskId) -> TrajectorySink {
        self.open_with_buffer(task_id, DEFAULT_EVENT_BUFFER)
    }

    /// Like [`open`](Self::open), with the capacity of the event broadcast
    /// channel. Subscribers lagging more than `buffer` steps miss steps.
    pub fn open_with_buffer(
        &self,
        task_id: TaskId,
        buffer: usize,
    ) -> TrajectorySink {
        let log = self
            .logs
            .entry(task_id)
            .or_insert_with(|| Arc::new(TaskLog::new(task_id, buffer)))
            .clone();
        TrajectorySink { log }
    }

    /// Appends a step to the log of its task and returns it with its
    /// sequence number.
    pub fn record(
        &self,
        event: StepEvent,
    ) -> Result<Arc<RecordedStep>, RecordError> {
        self.log(event.task_id())?.record(event)
    }

    /// Freezes the log of `task_id`.
    pub fn seal(
        &self,
        task_id: TaskId,
        terminal: Vec<Message>,
    ) -> Result<Trajectory, RecordError> {
        self.log(task_id)?.seal(terminal)
    }

    /// Returns the steps recorded so far for `task_id`.
    pub fn snapshot(
        &self,
        task_id: TaskId,
    ) -> Result<Vec<Arc<RecordedStep>>, RecordError> {
        Ok(self.log(task_id)?.lock().steps.clone())
    }

    /// Drops the log of `task_id`. Sinks still held keep working on their
    /// own copy.
    pub fn release(&self, task_id: TaskId) -> bool {
        self.logs.remove(&task_id).is_some()
    }

    fn log(&self, task_id: TaskId) -> Result<Arc<TaskLog>, RecordError> {
        self.logs
            .get(&task_id)
            .map(|log| Arc::clone(log.value()))
            .ok_or(RecordError::UnknownTask(task_id))
    }
}

/// Handle on the log of one task.
#[derive(Clone)]
pub struct TrajectorySink {
    log: Arc<TaskLog>,
}

impl TrajectorySink {
    /// Returns the task identifier.
    #[inline]
    pub fn task_id(&self) -> TaskId {
        self.log.task_id
    }

    /// Appends a step, see [`TrajectoryRecorder::record`].
    #[inline]
    pub fn record(
        &self,
        event: StepEvent,
    ) -> Result<Arc<RecordedStep>, RecordError> {
        self.log.record(event)
    }

    /// Subscribes to the steps recorded from now on.
    #[inline]
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<RecordedStep>> {
        self.log.events.subscribe()
    }

    /// Freezes the log.
    #[inline]
    pub fn seal(&self, terminal: Vec<Message>) -> Result<Trajectory, RecordError> {
        self.log.seal(terminal)
    }

    /// Returns the steps recorded so far.
    #[inline]
    pub fn snapshot(&self) -> Vec<Arc<RecordedStep>> {
        self.log.lock().steps.clone()
    }

    /// Returns `true` once the log is sealed.
    #[inline]
    pub fn is_sealed(&self) -> bool {
        self.log.lock().sealed
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::id::AgentId;
    use crate::trajectory::StepKind;

    fn step(task_id: TaskId, n: u64) -> StepEvent {
        StepEvent::begin(task_id, AgentId::new("a"), StepKind::ModelCall, json!(n))
            .succeed(json!(null))
    }

    #[test]
    fn test_sequence_and_seal() {
        let recorder = TrajectoryRecorder::new();
        let task_id = TaskId::new();
        let sink = recorder.open(task_id);

        assert_eq!(sink.record(step(task_id, 0)).unwrap().seq(), 1);
        assert_eq!(recorder.record(step(task_id, 1)).unwrap().seq(), 2);
        assert_eq!(recorder.snapshot(task_id).unwrap().len(), 2);

        let trajectory = recorder.seal(task_id, vec![]).unwrap();
        assert_eq!(trajectory.steps().len(), 2);
        assert!(sink.is_sealed());

        assert_eq!(
            sink.record(step(task_id, 2)),
            Err(RecordError::TrajectoryAlreadySealed(task_id))
        );
        assert_eq!(
            sink.seal(vec![]).unwrap_err(),
            RecordError::TrajectoryAlreadySealed(task_id)
        );
    }

    #[test]
    fn test_tasks_are_isolated() {
        let recorder = TrajectoryRecorder::new();
        let (a, b) = (TaskId::new(), TaskId::new());
        let sink_a = recorder.open(a);
        let sink_b = recorder.open(b);

        sink_a.record(step(a, 0)).unwrap();
        assert_eq!(sink_b.record(step(b, 0)).unwrap().seq(), 1);
        assert_eq!(
            sink_a.record(step(b, 1)),
            Err(RecordError::TaskMismatch { task: a, step: b })
        );

        let unknown = TaskId::new();
        assert_eq!(
            recorder.record(step(unknown, 0)),
            Err(RecordError::UnknownTask(unknown))
        );
        assert!(recorder.release(a));
        assert!(recorder.snapshot(a).is_err());
    }

    #[test]
    fn test_concurrent_appends_are_contiguous() {
        let recorder = TrajectoryRecorder::new();
        let task_id = TaskId::new();
        let sink = recorder.open(task_id);

        let threads: Vec<_> = (0..8)
            .map(|t| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for n in 0..50 {
                        sink.record(step(task_id, t * 100 + n)).unwrap();
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        let trajectory = sink.seal(vec![]).unwrap();
        let seqs: Vec<u64> = trajectory.records().map(|s| s.seq()).collect();
        assert_eq!(seqs, (1..=400).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_subscribe() {
        let recorder = TrajectoryRecorder::new();
        let task_id = TaskId::new();
        let sink = recorder.open(task_id);
        let mut events = sink.subscribe();

        sink.record(step(task_id, 0)).unwrap();
        sink.record(step(task_id, 1)).unwrap();
        assert_eq!(events.recv().await.unwrap().seq(), 1);
        assert_eq!(events.recv().await.unwrap().seq(), 2);
    }
}
