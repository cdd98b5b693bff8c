use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;

use super::{FailureKind, StepKind, Trajectory};
use crate::tool::{Error, ToolDescriptor, ToolResult, ToolTransport};

type CallKey = (String, String, String);

/// A tool transport answering from a sealed trajectory.
///
/// Each recorded tool call, keyed by server, tool and arguments, is
/// answered with its recorded result or failure, in recorded order. Calls
/// that were never recorded, or asked more often than recorded, fail as
/// unreachable. Rejected intents are ignored.
#[derive(Clone)]
pub struct ReplayToolTransport {
    tools: Arc<BTreeSet<(String, String)>>,
    answers: Arc<Mutex<HashMap<CallKey, VecDeque<ToolResult>>>>,
}

impl ReplayToolTransport {
    /// Collects the tool calls of `trajectory`.
    pub fn from_trajectory(trajectory: &Trajectory) -> Self {
        let mut tools = BTreeSet::new();
        let mut answers: HashMap<CallKey, VecDeque<ToolResult>> = HashMap::new();

        for step in trajectory.records() {
            let event = step.event();
            if event.kind() != StepKind::ToolCall {
                continue;
            }
            let input = event.input();
            let (Some(server), Some(tool)) = (
                input.get("server").and_then(Value::as_str),
                input.get("tool").and_then(Value::as_str),
            ) else {
                continue;
            };
            let answer: ToolResult = match event.failure() {
                Some(failure) => {
                    let err = match failure.kind {
                        FailureKind::ToolTimeout => Error::timeout(),
                        FailureKind::ToolUnreachable => Error::unreachable(),
                        FailureKind::ToolError => Error::tool_error(),
                        FailureKind::ToolInvalidArguments => {
                            Error::invalid_arguments()
                        }
                        FailureKind::ToolRejected
                        | FailureKind::ModelUnavailable => continue,
                    };
                    Err(err.with_reason(failure.reason.clone()))
                }
                None => Ok(event
                    .output()
                    .and_then(|output| output.get("content"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_owned()),
            };

            let arguments = input.get("arguments").cloned().unwrap_or(Value::Null);
            tools.insert((server.to_owned(), tool.to_owned()));
            answers
                .entry(call_key(server, tool, &arguments))
                .or_default()
                .push_back(answer);
        }

        Self {
            tools: Arc::new(tools),
            answers: Arc::new(Mutex::new(answers)),
        }
    }

    /// Returns the number of recorded answers not replayed yet.
    pub fn remaining(&self) -> usize {
        self.answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(VecDeque::len)
            .sum()
    }
}

fn call_key(server: &str, tool: &str, arguments: &Value) -> CallKey {
    (server.to_owned(), tool.to_owned(), arguments.to_string())
}

impl ToolTransport for ReplayToolTransport {
    fn list_tools(
        &self,
    ) -> impl Future<Output = Result<Vec<ToolDescriptor>, Error>> + Send + 'static
    {
        let descriptors = self
            .tools
            .iter()
            .map(|(server, name)| ToolDescriptor {
                server: server.clone(),
                name: name.clone(),
                description: String::new(),
                schema: Value::Null,
            })
            .collect();
        std::future::ready(Ok(descriptors))
    }

    fn call(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let key = call_key(server, tool, &arguments);
        let answer = self
            .answers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        let answer = answer.unwrap_or_else(|| {
            Err(Error::unreachable().with_reason(format!(
                "no recorded answer for `{tool}` on `{server}` with {arguments}"
            )))
        });
        std::future::ready(answer)
    }
}
