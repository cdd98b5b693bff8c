use std::collections::VecDeque;
use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::future::{poll_fn, ready};
use std::pin::Pin;
use std::task::{self, Poll, ready};
use std::time::Duration;

use swarmrun_model::{
    ErrorKind, ModelConfig, ModelFinishReason, ModelMessage, ModelProvider,
    ModelProviderError, ModelRequest, ModelResponse, ModelResponseEvent,
    TokenUsage,
};
use tokio::time::{Sleep, sleep};

#[derive(Debug)]
struct FakeModelProviderError(ErrorKind);

impl Display for FakeModelProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl Error for FakeModelProviderError {}

impl ModelProviderError for FakeModelProviderError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

/// Echoes the last user message word by word.
struct FakeModelResponse {
    words: VecDeque<String>,
    usage: Option<TokenUsage>,
    finished: bool,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl FakeModelResponse {
    fn new(input: &str) -> Self {
        let words: VecDeque<String> = format!("You said {input}")
            .split(' ')
            .map(ToString::to_string)
            .collect();
        let usage = TokenUsage {
            prompt_tokens: input.split(' ').count() as u64,
            completion_tokens: words.len() as u64,
        };
        Self {
            words,
            usage: Some(usage),
            finished: false,
            sleep: None,
        }
    }
}

impl ModelResponse for FakeModelResponse {
    type Error = FakeModelProviderError;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        let sleep = this
            .sleep
            .get_or_insert_with(|| Box::pin(sleep(Duration::from_millis(1))));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        if let Some(mut word) = this.words.pop_front() {
            if !this.words.is_empty() {
                word.push(' ');
            }
            return Poll::Ready(Ok(Some(ModelResponseEvent::MessageDelta(
                word,
            ))));
        }
        if let Some(usage) = this.usage.take() {
            return Poll::Ready(Ok(Some(ModelResponseEvent::Usage(usage))));
        }
        if !this.finished {
            this.finished = true;
            return Poll::Ready(Ok(Some(ModelResponseEvent::Completed(
                ModelFinishReason::Stop,
            ))));
        }
        Poll::Ready(Ok(None))
    }
}

struct FakeModelProvider;

impl ModelProvider for FakeModelProvider {
    type Error = FakeModelProviderError;
    type Response = FakeModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let last_user = req.messages.iter().rev().find_map(|msg| match msg {
            ModelMessage::User { content } => Some(content.clone()),
            _ => None,
        });
        let result = match last_user {
            Some(content) => Ok(FakeModelResponse::new(&content)),
            None => Err(FakeModelProviderError(ErrorKind::ProviderError)),
        };
        ready(result)
    }
}

fn request(messages: Vec<ModelMessage>) -> ModelRequest {
    ModelRequest {
        config: ModelConfig::new("fake", "echo"),
        messages,
        tools: vec![],
    }
}

#[tokio::test]
async fn test_completion() {
    let provider = FakeModelProvider;
    let req = request(vec![
        ModelMessage::system("Repeat after the user."),
        ModelMessage::user("Good morning"),
    ]);
    let mut resp = provider.send_request(&req).await.unwrap();

    let mut resp_message = String::new();
    let mut usage = TokenUsage::default();
    loop {
        let event = poll_fn(|cx| Pin::new(&mut resp).poll_next_event(cx))
            .await
            .unwrap();
        match event {
            Some(ModelResponseEvent::MessageDelta(delta)) => {
                resp_message.push_str(&delta);
            }
            Some(ModelResponseEvent::Usage(reported)) => usage += reported,
            Some(ModelResponseEvent::Completed(reason)) => {
                assert_eq!(reason, ModelFinishReason::Stop);
            }
            Some(event) => unreachable!("unexpected event: {event:?}"),
            None => break,
        }
    }

    assert_eq!(resp_message, "You said Good morning");
    assert_eq!(usage.total_tokens(), 6);
}

#[tokio::test]
async fn test_error() {
    let provider = FakeModelProvider;
    let req = request(vec![ModelMessage::system("No input at all.")]);
    let result = provider.send_request(&req).await;
    let Err(err) = result else {
        panic!("expected an error");
    };
    assert_eq!(err.kind(), ErrorKind::ProviderError);
}

#[tokio::test]
async fn test_shared_provider() {
    let provider = std::sync::Arc::new(FakeModelProvider);
    let shared = std::sync::Arc::clone(&provider);
    let req = request(vec![ModelMessage::user("Hello")]);
    let resp = shared.send_request(&req).await.unwrap();
    assert_eq!(resp.words.front().map(String::as_str), Some("You"));

    let empty = request(vec![]);
    let err = provider.send_request(&empty).await.err().unwrap();
    assert_eq!(err.kind(), ErrorKind::ProviderError);
}
