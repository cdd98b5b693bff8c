use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::Instrument;

use super::object::{AnyTransport, TransportObject};
use super::schema;
use super::{Error, ToolBinding, ToolDescriptor, ToolResult, ToolTransport};

struct CatalogEntry {
    descriptor: ToolDescriptor,
    transport: usize,
}

struct Inner {
    transports: Vec<Arc<dyn TransportObject>>,
    catalog: BTreeMap<(String, String), CatalogEntry>,
}

/// The single path through which agents reach tool servers.
///
/// The gateway is cheap to clone and can be shared by all tasks of a
/// runner.
#[derive(Clone)]
pub struct ToolGateway {
    inner: Arc<Inner>,
}

impl ToolGateway {
    /// Creates a builder.
    #[inline]
    pub fn builder() -> ToolGatewayBuilder {
        ToolGatewayBuilder::default()
    }

    /// Creates a gateway that serves no tool.
    #[inline]
    pub fn empty() -> Self {
        Self {
            inner: Arc::new(Inner {
                transports: vec![],
                catalog: BTreeMap::new(),
            }),
        }
    }

    /// Looks up a discovered tool.
    pub fn descriptor(&self, server: &str, tool: &str) -> Option<&ToolDescriptor> {
        self.inner
            .catalog
            .get(&(server.to_owned(), tool.to_owned()))
            .map(|entry| &entry.descriptor)
    }

    /// Returns every discovered tool, ordered by server then name.
    pub fn tools(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.inner.catalog.values().map(|entry| &entry.descriptor)
    }

    /// Invokes the tool of `binding`.
    ///
    /// The arguments are validated against the binding's schema before
    /// anything is sent. The call is abandoned once `timeout` elapses. No
    /// retry is performed here.
    pub async fn invoke(
        &self,
        binding: &ToolBinding,
        arguments: Map<String, Value>,
        timeout: Duration,
    ) -> ToolResult {
        let span = debug_span!(
            "tool call",
            server = binding.server(),
            tool = binding.tool()
        );
        let transport = self
            .inner
            .catalog
            .get(&(binding.server().to_owned(), binding.tool().to_owned()))
            .map(|entry| Arc::clone(&self.inner.transports[entry.transport]));
        let call = async move {
            if let Err(reason) = schema::validate(binding.schema(), &arguments)
            {
                warn!("rejected arguments: {reason}");
                return Err(Error::invalid_arguments().with_reason(reason));
            }
            let Some(transport) = transport else {
                return Err(Error::unreachable().with_reason(format!(
                    "`{}` is not served by `{}`",
                    binding.tool(),
                    binding.server()
                )));
            };

            trace!("calling with {arguments:?}");
            let fut = transport.call(
                binding.server(),
                binding.tool(),
                Value::Object(arguments),
            );
            match tokio::time::timeout(timeout, fut).await {
                Ok(result) => {
                    if let Err(err) = &result {
                        warn!("tool failed: {err}");
                    }
                    result
                }
                Err(_) => {
                    warn!("tool timed out after {timeout:?}");
                    Err(Error::timeout()
                        .with_reason(format!("no answer within {timeout:?}")))
                }
            }
        };
        call.instrument(span).await
    }
}

/// Builder of [`ToolGateway`].
#[derive(Default)]
pub struct ToolGatewayBuilder {
    transports: Vec<Arc<dyn TransportObject>>,
}

impl ToolGatewayBuilder {
    /// Adds a transport.
    pub fn with_transport<T: ToolTransport>(mut self, transport: T) -> Self {
        self.transports.push(Arc::new(AnyTransport(transport)));
        self
    }

    /// Runs discovery on every transport and builds the catalog.
    ///
    /// When two transports advertise the same tool of the same server, the
    /// first one wins.
    pub async fn connect(self) -> Result<ToolGateway, Error> {
        let mut catalog = BTreeMap::new();
        for (index, transport) in self.transports.iter().enumerate() {
            let tools = transport
                .list_tools()
                .instrument(debug_span!("tool discovery", transport = index))
                .await?;
            for descriptor in tools {
                let key = (descriptor.server.clone(), descriptor.name.clone());
                if catalog.contains_key(&key) {
                    warn!("tool `{}` of `{}` advertised twice", key.1, key.0);
                    continue;
                }
                catalog.insert(
                    key,
                    CatalogEntry {
                        descriptor,
                        transport: index,
                    },
                );
            }
        }
        debug!("discovered {} tools", catalog.len());
        Ok(ToolGateway {
            inner: Arc::new(Inner {
                transports: self.transports,
                catalog,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::LazyLock;

    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::tool::{ErrorKind, LocalToolServer, Tool};

    static SCHEMA: LazyLock<Value> = LazyLock::new(|| {
        json!({
            "type": "object",
            "properties": { "millis": { "type": "integer" } },
            "required": ["millis"],
        })
    });

    #[derive(Deserialize)]
    struct SleepInput {
        millis: u64,
    }

    struct SleepTool;

    impl Tool for SleepTool {
        type Input = SleepInput;

        fn name(&self) -> &str {
            "sleep"
        }

        fn description(&self) -> &str {
            "Sleeps for a while"
        }

        fn parameter_schema(&self) -> &Value {
            &SCHEMA
        }

        fn execute(
            &self,
            input: Self::Input,
        ) -> impl Future<Output = ToolResult> + Send + 'static {
            async move {
                tokio::time::sleep(Duration::from_millis(input.millis)).await;
                Ok(format!("slept {}ms", input.millis))
            }
        }
    }

    async fn gateway() -> (ToolGateway, ToolBinding) {
        let gateway = ToolGateway::builder()
            .with_transport(LocalToolServer::new("clock").with_tool(SleepTool))
            .connect()
            .await
            .unwrap();
        let mut binding = ToolBinding::new("clock", "sleep");
        binding.resolve(gateway.descriptor("clock", "sleep").unwrap());
        (gateway, binding)
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_invoke() {
        let (gateway, binding) = gateway().await;
        assert_eq!(binding.description(), "Sleeps for a while");

        let result = gateway
            .invoke(&binding, args(json!({"millis": 10})), Duration::from_secs(1))
            .await;
        assert_eq!(result.unwrap(), "slept 10ms");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout() {
        let (gateway, binding) = gateway().await;
        let err = gateway
            .invoke(
                &binding,
                args(json!({"millis": 5000})),
                Duration::from_millis(100),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.kind().is_retryable());
    }

    #[tokio::test]
    async fn test_invalid_arguments() {
        let (gateway, binding) = gateway().await;
        let err = gateway
            .invoke(&binding, args(json!({"millis": "soon"})), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArguments);
        assert!(!err.kind().is_retryable());
    }

    #[tokio::test]
    async fn test_not_served() {
        let (gateway, _) = gateway().await;
        let binding = ToolBinding::new("clock", "alarm");
        let err = gateway
            .invoke(&binding, Map::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unreachable);
        assert!(gateway.descriptor("clock", "alarm").is_none());
        assert_eq!(gateway.tools().count(), 1);
    }
}
