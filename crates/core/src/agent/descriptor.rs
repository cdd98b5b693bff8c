use serde::{Deserialize, Serialize};
use swarmrun_model::ModelConfig;

use crate::id::AgentId;
use crate::tool::ToolBinding;

/// Static description of an agent: identity, model, instruction and the
/// tools it may call.
///
/// Descriptors are immutable once built. Tool names must be unique within
/// one descriptor, since the model addresses tools by name; this is checked
/// when the topology is built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    name: AgentId,
    model: ModelConfig,
    #[serde(default)]
    instruction: String,
    #[serde(default)]
    tools: Vec<ToolBinding>,
    #[serde(default)]
    history_limit: Option<usize>,
}

impl AgentDescriptor {
    /// Creates a builder.
    #[inline]
    pub fn builder<N: Into<AgentId>>(
        name: N,
        model: ModelConfig,
    ) -> AgentDescriptorBuilder {
        AgentDescriptorBuilder {
            descriptor: AgentDescriptor {
                name: name.into(),
                model,
                instruction: String::new(),
                tools: vec![],
                history_limit: None,
            },
        }
    }

    /// Returns the agent's name, unique within a topology.
    #[inline]
    pub fn name(&self) -> &AgentId {
        &self.name
    }

    /// Returns the model configuration.
    #[inline]
    pub fn model(&self) -> &ModelConfig {
        &self.model
    }

    /// Returns the system instruction.
    #[inline]
    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    /// Returns the tool bindings.
    #[inline]
    pub fn tools(&self) -> &[ToolBinding] {
        &self.tools
    }

    /// Returns how many history messages are kept in the prompt.
    #[inline]
    pub fn history_limit(&self) -> Option<usize> {
        self.history_limit
    }

    /// Finds the binding exposing `tool` to the model.
    pub(crate) fn binding(&self, tool: &str) -> Option<&ToolBinding> {
        self.tools.iter().find(|binding| binding.tool() == tool)
    }

    pub(crate) fn tools_mut(&mut self) -> &mut [ToolBinding] {
        &mut self.tools
    }
}

/// [`AgentDescriptor`] builder.
#[derive(Clone, Debug)]
pub struct AgentDescriptorBuilder {
    descriptor: AgentDescriptor,
}

impl AgentDescriptorBuilder {
    /// Sets the system instruction.
    #[inline]
    pub fn with_instruction<S: Into<String>>(mut self, instruction: S) -> Self {
        self.descriptor.instruction = instruction.into();
        self
    }

    /// Authorizes a tool.
    #[inline]
    pub fn with_tool(mut self, binding: ToolBinding) -> Self {
        self.descriptor.tools.push(binding);
        self
    }

    /// Keeps only the last `limit` history messages in the prompt.
    #[inline]
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.descriptor.history_limit = Some(limit);
        self
    }

    /// Builds the descriptor.
    #[inline]
    pub fn build(self) -> AgentDescriptor {
        self.descriptor
    }
}
