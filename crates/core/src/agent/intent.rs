use serde_json::{Map, Value};
use swarmrun_model::ToolCallRequest;

use crate::model_client::ModelClientResponse;

/// A model response, classified.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ModelOutput {
    /// No tool call: the agent's final answer.
    PlainText(String),
    /// The model asks for tools, possibly with some text.
    ToolCalls {
        text: String,
        intents: Vec<ParsedIntent>,
    },
}

/// A well-formed tool-call intent. Whether the tool is bound is checked
/// later, against the agent's bindings.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct ToolCallIntent {
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum ParsedIntent {
    Valid(ToolCallIntent),
    Malformed {
        id: String,
        name: String,
        raw: Value,
        reason: String,
    },
}

impl ParsedIntent {
    #[inline]
    pub fn id(&self) -> &str {
        match self {
            ParsedIntent::Valid(intent) => &intent.id,
            ParsedIntent::Malformed { id, .. } => id,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        match self {
            ParsedIntent::Valid(intent) => &intent.name,
            ParsedIntent::Malformed { name, .. } => name,
        }
    }

    /// Returns the request as it is echoed back to the model.
    pub fn to_request(&self) -> ToolCallRequest {
        let arguments = match self {
            ParsedIntent::Valid(intent) => Value::Object(intent.arguments.clone()),
            ParsedIntent::Malformed { raw, .. } => raw.clone(),
        };
        ToolCallRequest {
            id: self.id().to_owned(),
            name: self.name().to_owned(),
            arguments,
        }
    }
}

/// Classifies a response of turn `turn`.
///
/// Arguments may come as an object or as a JSON-encoded object; `null` and
/// blank strings mean no argument. Missing call ids are derived from the
/// turn and the position of the call.
pub(crate) fn parse(response: &ModelClientResponse, turn: u32) -> ModelOutput {
    if response.tool_calls.is_empty() {
        return ModelOutput::PlainText(response.transcript.clone());
    }

    let intents = response
        .tool_calls
        .iter()
        .enumerate()
        .map(|(index, call)| {
            let id = if call.id.is_empty() {
                format!("call_{turn}_{index}")
            } else {
                call.id.clone()
            };
            match parse_arguments(&call.arguments) {
                Ok(arguments) => ParsedIntent::Valid(ToolCallIntent {
                    id,
                    name: call.name.clone(),
                    arguments,
                }),
                Err(reason) => ParsedIntent::Malformed {
                    id,
                    name: call.name.clone(),
                    raw: call.arguments.clone(),
                    reason,
                },
            }
        })
        .collect();

    ModelOutput::ToolCalls {
        text: response.transcript.clone(),
        intents,
    }
}

fn parse_arguments(raw: &Value) -> Result<Map<String, Value>, String> {
    match raw {
        Value::Object(map) => Ok(map.clone()),
        Value::Null => Ok(Map::new()),
        Value::String(encoded) if encoded.trim().is_empty() => Ok(Map::new()),
        Value::String(encoded) => match serde_json::from_str(encoded) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(other) => Err(format!("arguments must be an object, got {other}")),
            Err(err) => Err(format!("arguments are not valid JSON: {err}")),
        },
        other => Err(format!("arguments must be an object, got {other}")),
    }
}
