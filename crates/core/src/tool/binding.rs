use serde::{Deserialize, Serialize};
use serde_json::Value;
use swarmrun_model::ModelTool;

use super::ToolDescriptor;

/// Authorizes an agent to call one tool of one tool server.
///
/// The schema and description may be left empty when declaring the
/// binding; they are filled from the gateway's catalog when the topology is
/// compiled.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolBinding {
    server: String,
    tool: String,
    #[serde(default)]
    schema: Value,
    #[serde(default)]
    description: String,
}

impl ToolBinding {
    /// Creates a binding to `tool` on `server`.
    #[inline]
    pub fn new<S: Into<String>, T: Into<String>>(server: S, tool: T) -> Self {
        Self {
            server: server.into(),
            tool: tool.into(),
            schema: Value::Null,
            description: String::new(),
        }
    }

    /// Sets the parameter schema explicitly.
    #[inline]
    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = schema;
        self
    }

    /// Returns the tool server identifier.
    #[inline]
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Returns the tool name.
    #[inline]
    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Returns the parameter schema.
    #[inline]
    pub fn schema(&self) -> &Value {
        &self.schema
    }

    /// Returns the description shown to the model.
    #[inline]
    pub fn description(&self) -> &str {
        &self.description
    }

    pub(crate) fn resolve(&mut self, descriptor: &ToolDescriptor) {
        if self.schema.is_null() {
            self.schema = descriptor.schema.clone();
        }
        if self.description.is_empty() {
            self.description = descriptor.description.clone();
        }
    }

    pub(crate) fn definition(&self) -> ModelTool {
        ModelTool {
            name: self.tool.clone(),
            description: self.description.clone(),
            parameters: self.schema.clone(),
        }
    }
}
