use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use super::object::{AnyTool, ToolObject};
use super::{Error, Tool, ToolDescriptor, ToolResult, ToolTransport};

/// A tool server running in the current process.
///
/// Each call is executed as an independent future, so concurrent calls to
/// the same tool never share state.
#[derive(Clone)]
pub struct LocalToolServer {
    name: String,
    tools: Arc<BTreeMap<String, Arc<dyn ToolObject>>>,
}

impl LocalToolServer {
    /// Creates an empty server identified by `name`.
    #[inline]
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            tools: Arc::default(),
        }
    }

    /// Adds a tool to the server, replacing any tool with the same name.
    pub fn with_tool<T: Tool>(mut self, tool: T) -> Self {
        let name = tool.name().to_owned();
        Arc::make_mut(&mut self.tools).insert(name, Arc::new(AnyTool(tool)));
        self
    }

    /// Returns the server identifier.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl ToolTransport for LocalToolServer {
    fn list_tools(
        &self,
    ) -> impl Future<Output = Result<Vec<ToolDescriptor>, Error>> + Send + 'static
    {
        let descriptors = self
            .tools
            .values()
            .map(|tool| ToolDescriptor {
                server: self.name.clone(),
                name: tool.name().to_owned(),
                description: tool.description().to_owned(),
                schema: tool.parameter_schema().clone(),
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
        let found = (server == self.name)
            .then(|| self.tools.get(tool).cloned())
            .flatten();
        let server = server.to_owned();
        let tool = tool.to_owned();
        async move {
            let Some(found) = found else {
                return Err(Error::unreachable()
                    .with_reason(format!("no tool `{tool}` on `{server}`")));
            };
            found.execute(arguments).await
        }
    }
}
