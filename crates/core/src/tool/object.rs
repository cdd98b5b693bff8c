use std::pin::Pin;

use serde_json::Value;
use tracing::Instrument;

use super::{Error, Tool, ToolDescriptor, ToolResult, ToolTransport};

pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

pub(crate) trait ToolObject: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn parameter_schema(&self) -> &Value;

    fn execute(&self, arguments: Value) -> BoxFuture<ToolResult>;
}

pub(crate) struct AnyTool<T: Tool>(pub T);

impl<T: Tool> ToolObject for AnyTool<T> {
    #[inline]
    fn name(&self) -> &str {
        self.0.name()
    }

    #[inline]
    fn description(&self) -> &str {
        self.0.description()
    }

    #[inline]
    fn parameter_schema(&self) -> &Value {
        self.0.parameter_schema()
    }

    #[inline]
    fn execute(&self, arguments: Value) -> BoxFuture<ToolResult> {
        let input: T::Input = match serde_json::from_value(arguments) {
            Ok(input) => input,
            Err(err) => {
                let reason = format!("{err}");
                return Box::pin(std::future::ready(ToolResult::Err(
                    Error::invalid_arguments().with_reason(reason),
                )));
            }
        };
        Box::pin(self.0.execute(input).instrument(debug_span!("tool execute")))
    }
}

pub(crate) trait TransportObject: Send + Sync + 'static {
    fn list_tools(&self) -> BoxFuture<Result<Vec<ToolDescriptor>, Error>>;

    fn call(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> BoxFuture<ToolResult>;
}

pub(crate) struct AnyTransport<T: ToolTransport>(pub T);

impl<T: ToolTransport> TransportObject for AnyTransport<T> {
    #[inline]
    fn list_tools(&self) -> BoxFuture<Result<Vec<ToolDescriptor>, Error>> {
        Box::pin(self.0.list_tools())
    }

    #[inline]
    fn call(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> BoxFuture<ToolResult> {
        Box::pin(self.0.call(server, tool, arguments))
    }
}
