use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{Error, ToolResult};

/// A tool advertised by a tool server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool server identifier.
    pub server: String,
    /// Tool name, unique within its server.
    pub name: String,
    /// Human readable description.
    pub description: String,
    /// JSON schema of the arguments.
    pub schema: Value,
}

/// The collaborator that reaches tool servers.
///
/// The runtime only relies on this discovery/call contract and never on
/// the wire format behind it. A transport may serve several servers.
///
/// Every call must run on its own logical channel: concurrent calls,
/// even to the same server, must not observe each other. Connections may
/// be pooled as long as this holds.
pub trait ToolTransport: Send + Sync + 'static {
    /// Lists the tools available on every server of this transport.
    fn list_tools(
        &self,
    ) -> impl Future<Output = Result<Vec<ToolDescriptor>, Error>> + Send + 'static;

    /// Calls `tool` on `server`.
    ///
    /// The returned future must be independent of `self`. Timeouts are
    /// applied by the caller.
    fn call(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> impl Future<Output = ToolResult> + Send + 'static;
}
