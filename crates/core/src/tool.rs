//! Tool gateway and tool-call supports.
//!
//! Agents never talk to tool servers directly. They go through a
//! [`ToolGateway`], which validates arguments against the bound schema,
//! applies the call timeout and classifies failures. The gateway itself is
//! built on top of [`ToolTransport`] implementations, the collaborators
//! that actually reach the tool servers.

mod binding;
mod error;
mod gateway;
mod local;
mod object;
mod schema;
mod transport;

use serde::de::DeserializeOwned;
use serde_json::Value;

pub use binding::ToolBinding;
pub use error::{Error, ErrorKind};
pub use gateway::{ToolGateway, ToolGatewayBuilder};
pub use local::LocalToolServer;
pub use transport::{ToolDescriptor, ToolTransport};

/// The result of a tool call.
pub type ToolResult = Result<String, Error>;

/// An in-process tool, served through a [`LocalToolServer`].
///
/// Implementations of this trait should be stateless, and may not maintain any
/// internal state.
///
/// The tool can be context-aware, meaning it can access additional information
/// about the current execution context, such as the working directory or the
/// current user. To do this, make the context an immutable state of the tool,
/// which can be set during initialization, and copy it when executing.
pub trait Tool: Send + Sync + 'static {
    /// The type of input that the tool accepts.
    type Input: DeserializeOwned;

    /// Returns the name of the tool.
    fn name(&self) -> &str;

    /// Returns the description of the tool.
    fn description(&self) -> &str;

    /// Returns the parameter schema of the tool.
    fn parameter_schema(&self) -> &Value;

    /// Executes the tool with the given input.
    ///
    /// This method must return a future that is fully independent of `self`,
    /// and the future should be cancellation safe.
    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static;
}
