use std::collections::HashMap;
use std::fmt;
use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;

use serde::Serialize;
use swarmrun_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent, TokenUsage,
    ToolCallRequest,
};
use tracing::Instrument;

/// A failed model request, with the provider's error erased.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ModelCallError {
    pub kind: ErrorKind,
    pub reason: String,
}

impl ModelCallError {
    fn from_provider<E: ModelProviderError>(err: &E) -> Self {
        Self {
            kind: err.kind(),
            reason: err.to_string(),
        }
    }
}

impl fmt::Display for ModelCallError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.reason)
    }
}

type SendRequestResult = Result<ModelClientResponse, ModelCallError>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
type HandlerFn =
    Arc<dyn Fn(ModelRequest) -> BoxedSendRequestFuture + Send + Sync>;

/// A wrapper around a model provider that provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub(crate) struct ModelClient {
    handler_fn: HandlerFn,
}

impl ModelClient {
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    let resp_or_err = fut.await;
                    handle_response::<P>(resp_or_err).await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self { handler_fn }
    }

    /// Sends a request and drains the whole response.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    #[inline]
    pub async fn send_request(&self, req: ModelRequest) -> SendRequestResult {
        (self.handler_fn)(req).await
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug, Default, Serialize)]
pub(crate) struct ModelClientResponse {
    /// Concatenated message deltas.
    pub transcript: String,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCallRequest>,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
    /// Token usage, if reported.
    pub usage: Option<TokenUsage>,
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            warn!("got an error: {err}");
            return Err(ModelCallError::from_provider(&err));
        }
    };

    let mut response = ModelClientResponse::default();

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                warn!("got an error while streaming: {err}");
                return Err(ModelCallError::from_provider(&err));
            }
        };

        let Some(event) = event else {
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(msg) => {
                response.transcript.push_str(&msg);
            }
            ModelResponseEvent::ToolCall(req) => {
                response.tool_calls.push(req);
            }
            ModelResponseEvent::Usage(usage) => {
                *response.usage.get_or_insert_default() += usage;
            }
            ModelResponseEvent::Completed(reason) => {
                response.finish_reason = Some(reason);
            }
        }
    }

    trace!("finished a request");

    Ok(response)
}

/// Model clients by provider name.
///
/// An agent's [`ModelConfig::provider`](swarmrun_model::ModelConfig) selects
/// the client its requests go through.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    clients: HashMap<String, ModelClient>,
}

impl ModelRegistry {
    /// Creates an empty registry.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `provider` under `name`, replacing any previous one.
    pub fn register<S, P>(&mut self, name: S, provider: P)
    where
        S: Into<String>,
        P: ModelProvider + 'static,
    {
        self.clients.insert(name.into(), ModelClient::new(provider));
    }

    /// Returns `true` if a provider is registered under `name`.
    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.clients.contains_key(name)
    }

    pub(crate) fn client(&self, name: &str) -> Option<ModelClient> {
        self.clients.get(name).cloned()
    }
}
