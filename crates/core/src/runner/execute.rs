use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::TaskReport;
use crate::agent::{AgentContext, AgentOutput};
use crate::error::{AgentError, RecordError, TaskError};
use crate::id::{AgentId, Participant};
use crate::message::{Message, MessageSequencer};
use crate::task::{Task, TaskState};
use crate::topology::{Aggregator, Handoff, Plan};
use crate::trajectory::{self, StepEvent, StepKind, Trajectory, TrajectorySink};

/// What happens to an activation's output.
#[derive(Clone, Copy, Debug)]
enum Continuation {
    /// Follow the agent's own handoff.
    Handoff,
    /// Arrive at the fan-in with this key.
    Branch(u64),
}

struct Completion {
    agent: AgentId,
    incoming: Message,
    continuation: Continuation,
    finished_at: Instant,
    result: Result<AgentOutput, AgentError>,
}

struct Arrival {
    finished_at: Instant,
    agent: AgentId,
    message: Message,
}

struct PendingJoin {
    from: Participant,
    join: Option<AgentId>,
    aggregator: Aggregator,
    expected: usize,
    settled: usize,
    arrivals: Vec<Arrival>,
}

struct Execution {
    plan: Plan,
    sink: TrajectorySink,
    /// Cancelled by the caller.
    cancel: CancellationToken,
    /// Cancelled by the caller, on failure or on timeout; seen by agents.
    stop: CancellationToken,
    sequencer: Arc<MessageSequencer>,
    histories: HashMap<AgentId, Vec<Message>>,
    joins: HashMap<u64, PendingJoin>,
    next_join: u64,
    hops: u32,
    running: JoinSet<Completion>,
    terminal: Vec<Message>,
    failure: Option<TaskError>,
}

/// Drives `task` until nothing is ready and nothing is in flight, then
/// seals the trajectory.
pub(super) async fn execute(
    plan: Plan,
    task: Task,
    sink: TrajectorySink,
    cancel: CancellationToken,
    state: watch::Sender<TaskState>,
) -> TaskReport {
    let task_id = task.id();
    let deadline = plan
        .config()
        .task_timeout()
        .map(|timeout| (Instant::now() + timeout, timeout));

    let mut execution = Execution {
        plan,
        sink,
        stop: cancel.child_token(),
        cancel,
        sequencer: Arc::default(),
        histories: HashMap::new(),
        joins: HashMap::new(),
        next_join: 1,
        hops: 0,
        running: JoinSet::new(),
        terminal: vec![],
        failure: None,
    };

    if execution.cancel.is_cancelled() {
        debug!("task cancelled before it started");
    } else {
        state.send_replace(TaskState::Running);
        debug!("task started");

        execution.start(task.input());
        execution.drive(deadline).await;
    }

    let final_state = if execution.failure.is_some() {
        TaskState::Failed
    } else if execution.cancel.is_cancelled() {
        TaskState::Cancelled
    } else {
        TaskState::Succeeded
    };

    let terminal = std::mem::take(&mut execution.terminal);
    let trajectory = match execution.sink.seal(terminal.clone()) {
        Ok(trajectory) => trajectory,
        Err(err) => {
            error!("cannot seal trajectory: {err}");
            execution.fail(err.into());
            Trajectory::new(task_id, execution.sink.snapshot(), terminal.clone())
        }
    };
    let final_state = if execution.failure.is_some() {
        TaskState::Failed
    } else {
        final_state
    };

    match &execution.failure {
        Some(err) => error!("task failed: {err}"),
        None => debug!("task {final_state}"),
    }
    state.send_replace(final_state);

    TaskReport {
        task_id,
        state: final_state,
        terminal,
        usage: trajectory::token_usage(trajectory.records()),
        trajectory,
        error: execution.failure,
    }
}

impl Execution {
    fn start(&mut self, input: &str) {
        let entry = self.plan.topology().entry().clone();
        let recipient = match &entry {
            Handoff::Sequence(to) => Participant::Agent(to.clone()),
            _ => Participant::Runtime,
        };
        let message =
            self.sequencer
                .next_message(Participant::Caller, recipient, input);
        self.dispatch(Participant::Caller, &entry, message);
    }

    async fn drive(&mut self, deadline: Option<(Instant, Duration)>) {
        let mut deadline = deadline;
        while !self.running.is_empty() {
            let wake_at = deadline.map(|(at, _)| at);
            let timer = async move {
                match wake_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                joined = self.running.join_next() => match joined {
                    Some(Ok(completion)) => self.complete(completion),
                    Some(Err(err)) => {
                        self.fail(TaskError::Aborted(err.to_string()));
                    }
                    None => break,
                },
                _ = timer => {
                    if let Some((_, timeout)) = deadline.take() {
                        warn!("task timed out after {timeout:?}, draining");
                        self.fail(TaskError::TimedOut(timeout));
                    }
                }
            }
        }
    }

    #[inline]
    fn stopping(&self) -> bool {
        self.stop.is_cancelled()
    }

    /// Records the first task-fatal failure and stops every agent.
    fn fail(&mut self, err: TaskError) {
        if self.failure.is_none() {
            error!("{err}");
            self.failure = Some(err);
        }
        self.stop.cancel();
    }

    fn complete(&mut self, completion: Completion) {
        let Completion {
            agent,
            incoming,
            continuation,
            finished_at,
            result,
        } = completion;

        let output = match result {
            Ok(output) => output,
            Err(AgentError::Cancelled(_)) => {
                debug!("`{agent}` stopped");
                self.settle(continuation, None);
                return;
            }
            Err(err) => {
                let best_effort = matches!(continuation, Continuation::Branch(_))
                    && self.plan.topology().is_best_effort(agent.as_str())
                    && !err.is_task_fatal();
                if best_effort {
                    warn!("best-effort branch `{agent}` failed: {err}");
                    self.settle(continuation, None);
                } else {
                    self.fail(TaskError::Agent { agent, source: err });
                }
                return;
            }
        };

        debug!(
            "`{agent}` answered after {} step(s)",
            output.steps.len()
        );
        let message = output.message;
        let history = self.histories.entry(agent.clone()).or_default();
        history.push(incoming);
        history.push(message.clone());

        match continuation {
            Continuation::Handoff => self.route(&agent, message),
            Continuation::Branch(_) => {
                let arrival = Arrival {
                    finished_at,
                    agent,
                    message,
                };
                self.settle(continuation, Some(arrival));
            }
        }
    }

    fn route(&mut self, from: &AgentId, message: Message) {
        match self.plan.topology().handoff(from.as_str()).cloned() {
            None => self.terminal.push(message),
            Some(handoff) => {
                self.dispatch(Participant::Agent(from.clone()), &handoff, message)
            }
        }
    }

    fn dispatch(&mut self, from: Participant, handoff: &Handoff, message: Message) {
        if self.stopping() {
            return;
        }
        match handoff {
            Handoff::Sequence(to) => {
                self.activate(to, message, Continuation::Handoff);
            }
            Handoff::FanOut(fan_out) => {
                let key = self.next_join;
                self.next_join += 1;
                self.joins.insert(
                    key,
                    PendingJoin {
                        from: from.clone(),
                        join: fan_out.join().cloned(),
                        aggregator: fan_out.aggregator().clone(),
                        expected: fan_out.branches().len(),
                        settled: 0,
                        arrivals: vec![],
                    },
                );

                for branch in fan_out.branches() {
                    let delivered = self.sequencer.next_message(
                        Participant::Runtime,
                        Participant::Agent(branch.clone()),
                        message.content(),
                    );
                    let input = json!({
                        "edge": "fan_out",
                        "from": from,
                        "to": branch,
                        "message": message.seq(),
                    });
                    let output = json!({ "delivered": delivered.seq() });
                    if let Err(err) = self.record_handoff(input, output) {
                        self.fail(err.into());
                        return;
                    }
                    self.activate(branch, delivered, Continuation::Branch(key));
                }
            }
            Handoff::Conditional(routes) => {
                let Some(route) = routes
                    .iter()
                    .find(|route| route.predicate().matches(message.content()))
                else {
                    self.fail(TaskError::NoRouteMatched(from));
                    return;
                };
                let to = route.to();
                let delivered = self.sequencer.next_message(
                    Participant::Runtime,
                    Participant::Agent(to.clone()),
                    message.content(),
                );
                let input = json!({
                    "edge": "conditional",
                    "from": from,
                    "to": to,
                    "predicate": route.predicate().to_string(),
                    "message": message.seq(),
                });
                let output = json!({ "delivered": delivered.seq() });
                if let Err(err) = self.record_handoff(input, output) {
                    self.fail(err.into());
                    return;
                }
                self.activate(to, delivered, Continuation::Handoff);
            }
        }
    }

    /// Accounts for a finished branch and resolves the fan-in once every
    /// branch has settled.
    fn settle(&mut self, continuation: Continuation, arrival: Option<Arrival>) {
        let Continuation::Branch(key) = continuation else {
            return;
        };
        let Some(pending) = self.joins.get_mut(&key) else {
            return;
        };
        pending.settled += 1;
        pending.arrivals.extend(arrival);
        if pending.settled < pending.expected {
            return;
        }
        let Some(mut pending) = self.joins.remove(&key) else {
            return;
        };

        pending.arrivals.sort_by(|a, b| {
            a.finished_at
                .cmp(&b.finished_at)
                .then_with(|| a.agent.cmp(&b.agent))
        });
        let outputs: Vec<Message> =
            pending.arrivals.into_iter().map(|arrival| arrival.message).collect();

        let Some(join) = pending.join else {
            self.terminal.extend(outputs);
            return;
        };
        if self.stopping() {
            return;
        }
        if outputs.is_empty() {
            warn!("no branch reached `{join}`, skipping it");
            return;
        }

        let content = pending.aggregator.aggregate(&outputs);
        let delivered = self.sequencer.next_message(
            Participant::Runtime,
            Participant::Agent(join.clone()),
            content,
        );
        let branches: Vec<Value> = outputs
            .iter()
            .map(|output| {
                json!({
                    "agent": output.sender(),
                    "message": output.seq(),
                    "content": output.content(),
                })
            })
            .collect();
        let input = json!({
            "edge": "fan_in",
            "from": pending.from,
            "to": join,
            "branches": branches,
        });
        let output = json!({
            "delivered": delivered.seq(),
            "content": delivered.content(),
        });
        if let Err(err) = self.record_handoff(input, output) {
            self.fail(err.into());
            return;
        }
        self.activate(&join, delivered, Continuation::Handoff);
    }

    fn record_handoff(&self, input: Value, output: Value) -> Result<(), RecordError> {
        let event = StepEvent::begin(
            self.sink.task_id(),
            Participant::Runtime,
            StepKind::Handoff,
            input,
        )
        .succeed(output);
        self.sink.record(event).map(|_| ())
    }

    fn activate(
        &mut self,
        agent: &AgentId,
        incoming: Message,
        continuation: Continuation,
    ) {
        if let Some(max_hops) = self.plan.topology().max_hops() {
            if self.hops >= max_hops {
                self.fail(TaskError::HopLimitExceeded(max_hops));
                return;
            }
        }
        self.hops += 1;

        let Some(runner) = self.plan.agent(agent.as_str()).cloned() else {
            // Compiled plans cover every declared agent.
            self.fail(TaskError::Aborted(format!("agent `{agent}` is not compiled")));
            return;
        };
        let recipient = match continuation {
            Continuation::Handoff => match self.plan.topology().handoff(agent.as_str()) {
                None => Participant::Caller,
                Some(Handoff::Sequence(to)) => Participant::Agent(to.clone()),
                Some(_) => Participant::Runtime,
            },
            Continuation::Branch(key) => {
                let joined = self
                    .joins
                    .get(&key)
                    .is_some_and(|pending| pending.join.is_some());
                if joined {
                    Participant::Runtime
                } else {
                    Participant::Caller
                }
            }
        };
        let cx = AgentContext {
            sink: self.sink.clone(),
            cancel: self.stop.clone(),
            history: self.histories.get(agent).cloned().unwrap_or_default(),
            sequencer: Arc::clone(&self.sequencer),
            recipient,
        };

        debug!("activating `{agent}` with message {}", incoming.seq());
        let agent = agent.clone();
        let span = debug_span!("activation", hop = self.hops);
        self.running.spawn(
            async move {
                let result = runner.act(&incoming, &cx).await;
                Completion {
                    agent,
                    incoming,
                    continuation,
                    finished_at: Instant::now(),
                    result,
                }
            }
            .instrument(span),
        );
    }
}
