//! A local scripted model for testing purpose.

mod preset;

use std::collections::{HashMap, VecDeque};
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use swarmrun_model::{
    ErrorKind, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
};
use tokio::time::{Sleep, sleep};

pub use preset::*;

#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.kind)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }
}

pub struct TestModelResponse {
    events: VecDeque<ModelResponseEvent>,
    delay: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        if let Some(delay) = &mut this.delay {
            ready!(delay.as_mut().poll(cx));
            this.delay = None;
        }
        Poll::Ready(Ok(this.events.pop_front()))
    }
}

#[derive(Default)]
struct SharedState {
    attempts: HashMap<(String, usize), u64>,
    requests: Vec<ModelRequest>,
}

/// A local scripted model for testing purpose.
///
/// Before sending requests, you need to set up a script for every model
/// name that will be requested. A script is the list of responses for the
/// successive assistant turns: the response is selected by counting the
/// assistant messages already present in the request, so the same history
/// always yields the same response. If there are no enough turns in the
/// script, an error will be returned.
///
/// Clones share the request log and the failure counters.
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    scripts: HashMap<String, Vec<PresetResponse>>,
    delay: Option<Duration>,
    shared: Arc<Mutex<SharedState>>,
}

impl TestModelProvider {
    /// Appends an assistant turn to the script of `model`.
    #[inline]
    pub fn add_turn<S: Into<String>>(&mut self, model: S, preset: PresetResponse) {
        self.scripts.entry(model.into()).or_default().push(preset);
    }

    /// Sets the default delay before a response starts streaming.
    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns all requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.lock_shared().requests.clone()
    }

    /// Returns the number of requests received for `model`.
    pub fn request_count(&self, model: &str) -> usize {
        self.lock_shared()
            .requests
            .iter()
            .filter(|req| req.config.model == model)
            .count()
    }

    fn lock_shared(&self) -> std::sync::MutexGuard<'_, SharedState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn respond(&self, req: &ModelRequest) -> Result<TestModelResponse, Error> {
        let model = req.config.model.clone();
        let turn = req
            .messages
            .iter()
            .filter(|msg| matches!(msg, ModelMessage::Assistant(_)))
            .count();

        let mut shared = self.lock_shared();
        shared.requests.push(req.clone());

        let Some(script) = self.scripts.get(&model) else {
            return Err(Error::new(
                format!("no script for model `{model}`"),
                ErrorKind::ProviderError,
            ));
        };
        let Some(preset) = script.get(turn) else {
            return Err(Error::new(
                format!("no enough turns for model `{model}`"),
                ErrorKind::ProviderError,
            ));
        };

        let attempt = shared.attempts.entry((model, turn)).or_insert(0);
        *attempt += 1;
        let failing = match preset.failures {
            Some(0) => true,
            Some(failures) => *attempt <= failures,
            None => false,
        };
        if failing {
            return Err(Error::new("injected failure", preset.failure_kind));
        }

        let mut events: VecDeque<_> = preset
            .events
            .iter()
            .map(|event| match event {
                PresetEvent::MessageDelta(msg) => {
                    ModelResponseEvent::MessageDelta(msg.clone())
                }
                PresetEvent::ToolCall(req) => {
                    ModelResponseEvent::ToolCall(req.clone())
                }
                PresetEvent::Usage(usage) => ModelResponseEvent::Usage(*usage),
            })
            .collect();
        let has_tool_call = preset
            .events
            .iter()
            .any(|event| matches!(event, PresetEvent::ToolCall(_)));
        events.push_back(ModelResponseEvent::Completed(if has_tool_call {
            ModelFinishReason::ToolCalls
        } else {
            ModelFinishReason::Stop
        }));

        let delay = preset
            .delay
            .or(self.delay)
            .unwrap_or(Duration::from_millis(1));
        Ok(TestModelResponse {
            events,
            delay: Some(Box::pin(sleep(delay))),
        })
    }
}

impl Debug for TestModelProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestModelProvider")
            .field("models", &self.scripts.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        ready(self.respond(req))
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use serde_json::json;
    use swarmrun_model::{
        AssistantMessage, ModelConfig, ModelTool, ToolCallRequest,
    };

    use super::*;

    async fn collect_response(
        resp: TestModelResponse,
    ) -> (String, Option<ToolCallRequest>, ModelFinishReason) {
        let mut resp = pin!(resp);
        let mut msg = String::new();
        let mut tool_call = None;
        loop {
            let event = poll_fn(|cx| resp.as_mut().poll_next_event(cx))
                .await
                .unwrap()
                .unwrap();
            match event {
                ModelResponseEvent::Completed(reason) => {
                    return (msg, tool_call, reason);
                }
                ModelResponseEvent::MessageDelta(delta) => {
                    msg.push_str(&delta);
                }
                ModelResponseEvent::ToolCall(req) => tool_call = Some(req),
                ModelResponseEvent::Usage(_) => {}
            }
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let mut provider = TestModelProvider::default();
        provider.add_turn(
            "reader",
            PresetResponse::with_events([
                PresetEvent::MessageDelta("Hello, ".to_owned()),
                PresetEvent::MessageDelta("world!".to_owned()),
            ]),
        );
        provider.add_turn(
            "reader",
            PresetResponse::with_events([
                PresetEvent::MessageDelta("Sure, let me take a look.".to_owned()),
                PresetEvent::tool_call(
                    "tool:1",
                    "read_file",
                    json!({ "filename": "todo.txt" }),
                ),
            ]),
        );

        let mut req = ModelRequest {
            config: ModelConfig::new("test", "reader"),
            messages: vec![ModelMessage::user("Hi")],
            tools: vec![ModelTool {
                name: "read_file".to_owned(),
                description: "Reads a file".to_owned(),
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "filename": { "type": "string" }
                    }
                }),
            }],
        };
        let resp = provider.send_request(&req).await.unwrap();
        let (msg, _, reason) = collect_response(resp).await;
        assert_eq!(msg, "Hello, world!");
        assert_eq!(reason, ModelFinishReason::Stop);

        req.messages.push(ModelMessage::Assistant(AssistantMessage {
            content: msg,
            tool_calls: vec![],
        }));
        req.messages.push(ModelMessage::user("Check my todo"));
        let resp = provider.send_request(&req).await.unwrap();
        let (msg, tool_call, reason) = collect_response(resp).await;
        assert_eq!(msg, "Sure, let me take a look.");
        assert_eq!(reason, ModelFinishReason::ToolCalls);
        let tool_call = tool_call.unwrap();
        assert_eq!(tool_call.name, "read_file");
        assert_eq!(tool_call.arguments, json!({ "filename": "todo.txt" }));
        assert_eq!(provider.request_count("reader"), 2);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let mut provider = TestModelProvider::default();
        provider.add_turn("flaky", PresetResponse::text("ok").with_failures(2));
        let req = ModelRequest {
            config: ModelConfig::new("test", "flaky"),
            messages: vec![ModelMessage::user("Hi")],
            tools: vec![],
        };

        for _ in 0..2 {
            let Err(err) = provider.send_request(&req).await else {
                panic!("expected an injected failure");
            };
            assert_eq!(err.kind(), ErrorKind::RateLimited);
        }
        assert!(provider.send_request(&req).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_script() {
        let provider = TestModelProvider::default();
        let req = ModelRequest {
            config: ModelConfig::new("test", "unknown"),
            messages: vec![ModelMessage::user("Hi")],
            tools: vec![],
        };
        let Err(err) = provider.send_request(&req).await else {
            panic!("expected an error");
        };
        assert_eq!(err.kind(), ErrorKind::ProviderError);
    }
}
