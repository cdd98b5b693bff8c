//! The model/tool loop of one agent.

mod descriptor;
mod intent;

use std::sync::Arc;
use std::time::Duration;

use backoff::backoff::Backoff;
use futures_util::future::join_all;
use serde_json::{Value, json};
use swarmrun_model::{
    AssistantMessage, ErrorKind as ModelErrorKind, ModelMessage, ModelRequest,
    ModelTool, ToolCallResult,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

pub use descriptor::{AgentDescriptor, AgentDescriptorBuilder};
use intent::{ModelOutput, ParsedIntent, ToolCallIntent};

use crate::config::RunConfig;
use crate::error::{AgentError, RecordError};
use crate::id::{AgentId, Participant};
use crate::message::{Message, MessageSequencer};
use crate::model_client::{ModelCallError, ModelClient, ModelClientResponse};
use crate::tool::{ToolBinding, ToolGateway};
use crate::trajectory::{
    FailureKind, PendingStep, RecordedStep, StepEvent, StepFailure, StepKind,
    TrajectorySink,
};

/// What an agent activation sees of the task.
pub(crate) struct AgentContext {
    pub sink: TrajectorySink,
    pub cancel: CancellationToken,
    /// Messages seen in previous activations, oldest first.
    pub history: Vec<Message>,
    pub sequencer: Arc<MessageSequencer>,
    /// Recipient of the outgoing message.
    pub recipient: Participant,
}

#[derive(Debug)]
pub(crate) struct AgentOutput {
    pub message: Message,
    pub steps: Vec<Arc<RecordedStep>>,
}

/// An agent ready to run: a descriptor with its resolved collaborators.
#[derive(Clone)]
pub(crate) struct Agent {
    descriptor: Arc<AgentDescriptor>,
    model: ModelClient,
    gateway: ToolGateway,
    config: Arc<RunConfig>,
}

impl Agent {
    pub fn new(
        descriptor: Arc<AgentDescriptor>,
        model: ModelClient,
        gateway: ToolGateway,
        config: Arc<RunConfig>,
    ) -> Self {
        Self {
            descriptor,
            model,
            gateway,
            config,
        }
    }

    #[inline]
    pub fn id(&self) -> &AgentId {
        self.descriptor.name()
    }

    /// Runs the loop until the model answers without tool calls.
    ///
    /// Every model and tool call is recorded through `cx.sink` as it
    /// completes. Cancellation is observed before each model call, before
    /// each tool dispatch and during backoff; calls already in flight are
    /// completed and recorded.
    pub async fn act(
        &self,
        incoming: &Message,
        cx: &AgentContext,
    ) -> Result<AgentOutput, AgentError> {
        let span = debug_span!("agent", agent = %self.id());
        self.run(incoming, cx).instrument(span).await
    }

    async fn run(
        &self,
        incoming: &Message,
        cx: &AgentContext,
    ) -> Result<AgentOutput, AgentError> {
        debug!("activated by message {}", incoming.seq());

        let mut steps = vec![];
        let mut messages = self.prompt(incoming, &cx.history);
        let tools: Vec<ModelTool> = self
            .descriptor
            .tools()
            .iter()
            .map(ToolBinding::definition)
            .collect();

        for turn in 0..self.config.max_turns {
            self.check_cancelled(cx, &mut steps, turn)?;

            let (response, model_step) =
                self.call_model(turn, &messages, &tools, cx, &mut steps).await?;

            let (text, intents) = match intent::parse(&response, turn) {
                ModelOutput::PlainText(_) if cx.cancel.is_cancelled() => {
                    // The answer is recorded in the model step but never
                    // delivered.
                    return Err(self.cancelled(cx, &mut steps, turn));
                }
                ModelOutput::PlainText(text) => {
                    let message = cx.sequencer.next_message(
                        Participant::Agent(self.id().clone()),
                        cx.recipient.clone(),
                        text,
                    );
                    debug!("answered with message {}", message.seq());
                    return Ok(AgentOutput { message, steps });
                }
                ModelOutput::ToolCalls { text, intents } => (text, intents),
            };

            self.check_cancelled(cx, &mut steps, turn)?;
            let observations =
                self.run_tools(model_step.seq(), &intents, cx, &mut steps).await?;

            messages.push(ModelMessage::Assistant(AssistantMessage {
                content: text,
                tool_calls: intents.iter().map(ParsedIntent::to_request).collect(),
            }));
            messages.extend(observations.into_iter().map(ModelMessage::Tool));
        }

        error!("turn limit of {} reached", self.config.max_turns);
        Err(AgentError::TurnLimitExceeded {
            agent: self.id().clone(),
            max_turns: self.config.max_turns,
        })
    }

    fn prompt(&self, incoming: &Message, history: &[Message]) -> Vec<ModelMessage> {
        let mut messages = vec![];
        if !self.descriptor.instruction().is_empty() {
            messages.push(ModelMessage::system(self.descriptor.instruction()));
        }

        let skip = self
            .descriptor
            .history_limit()
            .map_or(0, |limit| history.len().saturating_sub(limit));
        let me = Participant::Agent(self.id().clone());
        for message in &history[skip..] {
            if message.sender() == &me {
                messages.push(ModelMessage::assistant(message.content()));
            } else {
                messages.push(ModelMessage::user(message.content()));
            }
        }

        messages.push(ModelMessage::user(incoming.content()));
        messages
    }

    async fn call_model(
        &self,
        turn: u32,
        messages: &[ModelMessage],
        tools: &[ModelTool],
        cx: &AgentContext,
        steps: &mut Vec<Arc<RecordedStep>>,
    ) -> Result<(ModelClientResponse, Arc<RecordedStep>), AgentError> {
        let retry = &self.config.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut backoff = retry.backoff();
        let timeout = self.config.model_timeout();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let pending = self.begin(
                cx,
                StepKind::ModelCall,
                json!({
                    "turn": turn,
                    "attempt": attempt,
                    "messages": messages,
                    "tools": tools,
                }),
            );
            let req = ModelRequest {
                config: self.descriptor.model().clone(),
                messages: messages.to_vec(),
                tools: tools.to_vec(),
            };
            let result =
                match tokio::time::timeout(timeout, self.model.send_request(req))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ModelCallError {
                        kind: ModelErrorKind::Timeout,
                        reason: format!("no response within {timeout:?}"),
                    }),
                };

            let err = match result {
                Ok(response) => {
                    let output = json!({
                        "content": response.transcript,
                        "tool_calls": response.tool_calls,
                        "finish_reason": response.finish_reason,
                        "usage": response.usage,
                    });
                    let step = record(cx, steps, pending.succeed(output))?;
                    return Ok((response, step));
                }
                Err(err) => err,
            };

            warn!("model call failed (attempt {attempt}): {err}");
            let failure =
                StepFailure::new(FailureKind::ModelUnavailable, err.to_string())
                    .with_attempt(attempt);
            record(cx, steps, pending.fail(failure))?;

            if attempt >= max_attempts {
                error!("model unavailable after {attempt} attempt(s)");
                return Err(AgentError::ModelUnavailable {
                    agent: self.id().clone(),
                    attempts: attempt,
                    kind: err.kind,
                    reason: err.reason,
                });
            }
            let delay = backoff.next_backoff().unwrap_or(retry.max_backoff());
            if !pause(delay, &cx.cancel).await {
                return Err(self.cancelled(cx, steps, turn));
            }
        }
    }

    /// Runs the intents of one turn concurrently and returns one
    /// observation per intent, in intent order.
    async fn run_tools(
        &self,
        parent: u64,
        intents: &[ParsedIntent],
        cx: &AgentContext,
        steps: &mut Vec<Arc<RecordedStep>>,
    ) -> Result<Vec<ToolCallResult>, AgentError> {
        let runs = intents
            .iter()
            .map(|intent| self.run_tool(parent, intent, cx));
        let mut recorded = vec![];
        let mut observations = Vec::with_capacity(intents.len());
        for (intent, result) in intents.iter().zip(join_all(runs).await) {
            let (content, tool_steps) = result?;
            recorded.extend(tool_steps);
            observations.push(ToolCallResult {
                id: intent.id().to_owned(),
                content,
            });
        }
        recorded.sort_by_key(|step| step.seq());
        steps.extend(recorded);
        Ok(observations)
    }

    async fn run_tool(
        &self,
        parent: u64,
        intent: &ParsedIntent,
        cx: &AgentContext,
    ) -> Result<(String, Vec<Arc<RecordedStep>>), RecordError> {
        let mut steps = vec![];
        let Some(binding) = self.descriptor.binding(intent.name()) else {
            warn!("rejected call to unbound tool `{}`", intent.name());
            let request = intent.to_request();
            let reason = format!(
                "tool `{}` is not bound to agent `{}`",
                intent.name(),
                self.id()
            );
            let pending = self
                .begin(
                    cx,
                    StepKind::ToolCall,
                    json!({
                        "id": request.id,
                        "tool": request.name,
                        "arguments": request.arguments,
                    }),
                )
                .with_parent(parent);
            steps.push(cx.sink.record(
                pending.fail(StepFailure::new(FailureKind::ToolRejected, &reason)),
            )?);
            return Ok((format!("error: tool rejected: {reason}"), steps));
        };

        let call = match intent {
            ParsedIntent::Valid(call) => call,
            ParsedIntent::Malformed { id, raw, reason, .. } => {
                warn!("malformed arguments for `{}`: {reason}", binding.tool());
                let pending = self
                    .tool_step(cx, binding, id, raw.clone())
                    .with_parent(parent);
                let failure =
                    StepFailure::new(FailureKind::ToolInvalidArguments, reason);
                steps.push(cx.sink.record(pending.fail(failure))?);
                return Ok((format!("error: invalid arguments: {reason}"), steps));
            }
        };

        let content = self.invoke(parent, binding, call, cx, &mut steps).await?;
        Ok((content, steps))
    }

    /// Invokes a bound tool, retrying retryable failures.
    async fn invoke(
        &self,
        parent: u64,
        binding: &ToolBinding,
        call: &ToolCallIntent,
        cx: &AgentContext,
        steps: &mut Vec<Arc<RecordedStep>>,
    ) -> Result<String, RecordError> {
        let retry = &self.config.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut backoff = retry.backoff();

        let mut attempt = 0;
        loop {
            attempt += 1;
            let pending = self
                .tool_step(cx, binding, &call.id, Value::Object(call.arguments.clone()))
                .with_parent(parent);
            let result = self
                .gateway
                .invoke(binding, call.arguments.clone(), self.config.tool_timeout())
                .await;

            let err = match result {
                Ok(content) => {
                    let content =
                        truncate(content, self.config.max_tool_result_bytes);
                    steps.push(
                        cx.sink.record(pending.succeed(json!({ "content": content })))?,
                    );
                    return Ok(content);
                }
                Err(err) => err,
            };

            let failure = StepFailure::new(err.kind().into(), err.reason())
                .with_attempt(attempt);
            steps.push(cx.sink.record(pending.fail(failure))?);

            if !err.kind().is_retryable() || attempt >= max_attempts {
                return Ok(format!("error: {err}"));
            }
            let delay = backoff.next_backoff().unwrap_or(retry.max_backoff());
            debug!("retrying `{}` in {delay:?}", binding.tool());
            if !pause(delay, &cx.cancel).await {
                // The next turn records the cancellation.
                return Ok(format!("error: {err}"));
            }
        }
    }

    fn begin(&self, cx: &AgentContext, kind: StepKind, input: Value) -> PendingStep {
        StepEvent::begin(cx.sink.task_id(), self.id().clone(), kind, input)
    }

    fn tool_step(
        &self,
        cx: &AgentContext,
        binding: &ToolBinding,
        id: &str,
        arguments: Value,
    ) -> PendingStep {
        self.begin(
            cx,
            StepKind::ToolCall,
            json!({
                "id": id,
                "server": binding.server(),
                "tool": binding.tool(),
                "arguments": arguments,
            }),
        )
    }

    fn check_cancelled(
        &self,
        cx: &AgentContext,
        steps: &mut Vec<Arc<RecordedStep>>,
        turn: u32,
    ) -> Result<(), AgentError> {
        if cx.cancel.is_cancelled() {
            return Err(self.cancelled(cx, steps, turn));
        }
        Ok(())
    }

    /// Records the terminal `Cancelled` step.
    fn cancelled(
        &self,
        cx: &AgentContext,
        steps: &mut Vec<Arc<RecordedStep>>,
        turn: u32,
    ) -> AgentError {
        debug!("cancelled before turn {turn} completed");
        let pending = self.begin(cx, StepKind::Cancelled, json!({ "turn": turn }));
        match record(cx, steps, pending.succeed(Value::Null)) {
            Ok(_) => AgentError::Cancelled(self.id().clone()),
            Err(err) => err,
        }
    }
}

fn record(
    cx: &AgentContext,
    steps: &mut Vec<Arc<RecordedStep>>,
    event: StepEvent,
) -> Result<Arc<RecordedStep>, AgentError> {
    let step = cx.sink.record(event)?;
    steps.push(Arc::clone(&step));
    Ok(step)
}

/// Sleeps for `delay`, returns `false` if cancelled first.
async fn pause(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

/// Truncates `content` to at most `max` bytes on a char boundary, marker
/// included. Bounds too small for the marker keep a bare prefix.
pub(crate) fn truncate(content: String, max: usize) -> String {
    if content.len() <= max {
        return content;
    }
    // The marker for the whole content is the longest one possible.
    let reserve = truncation_marker(content.len()).len();
    if max < reserve {
        let cut = floor_char_boundary(&content, max);
        return content[..cut].to_owned();
    }
    let cut = floor_char_boundary(&content, max - reserve);
    let marker = truncation_marker(content.len() - cut);
    format!("{}{marker}", &content[..cut])
}

fn truncation_marker(dropped: usize) -> String {
    format!("…[truncated {dropped} bytes]")
}

fn floor_char_boundary(content: &str, mut index: usize) -> usize {
    while !content.is_char_boundary(index) {
        index -= 1;
    }
    index
}
