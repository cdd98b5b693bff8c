#![allow(dead_code)]

use std::time::Duration;

use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;
use swarmrun_core::model::ModelConfig;
use swarmrun_core::tool::{LocalToolServer, Tool, ToolGateway, ToolResult};
use swarmrun_core::trajectory::Trajectory;
use swarmrun_core::{AgentDescriptor, Runner};
use swarmrun_test_model::TestModelProvider;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}

/// An agent whose model name is its own name, so each agent has its own
/// script in the test provider.
pub fn agent(name: &str) -> AgentDescriptor {
    AgentDescriptor::builder(name, ModelConfig::new("test", name)).build()
}

pub fn runner(provider: &TestModelProvider) -> Runner {
    Runner::builder()
        .with_model_provider("test", provider.clone())
        .build()
}

pub fn runner_with_gateway(
    provider: &TestModelProvider,
    gateway: ToolGateway,
) -> Runner {
    Runner::builder()
        .with_model_provider("test", provider.clone())
        .with_gateway(gateway)
        .build()
}

pub async fn atlas_gateway() -> ToolGateway {
    ToolGateway::builder()
        .with_transport(
            LocalToolServer::new("atlas")
                .with_tool(SleepTool::new())
                .with_tool(CapitalTool::new()),
        )
        .connect()
        .await
        .unwrap()
}

pub fn assert_contiguous(trajectory: &Trajectory) {
    let seqs: Vec<u64> = trajectory.records().map(|step| step.seq()).collect();
    let expected: Vec<u64> = (1..=seqs.len() as u64).collect();
    assert_eq!(seqs, expected);
}

#[derive(Deserialize, JsonSchema)]
pub struct SleepInput {
    /// Milliseconds to sleep.
    pub millis: u64,
}

/// Sleeps, then reports how long it slept.
pub struct SleepTool {
    schema: Value,
}

impl SleepTool {
    pub fn new() -> Self {
        Self {
            schema: serde_json::to_value(schemars::schema_for!(SleepInput))
                .unwrap(),
        }
    }
}

impl Tool for SleepTool {
    type Input = SleepInput;

    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Sleeps for a while"
    }

    fn parameter_schema(&self) -> &Value {
        &self.schema
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

#[derive(Deserialize, JsonSchema)]
pub struct CapitalInput {
    /// Country name.
    pub country: String,
}

/// Knows a few capitals.
pub struct CapitalTool {
    schema: Value,
}

impl CapitalTool {
    pub fn new() -> Self {
        Self {
            schema: serde_json::to_value(schemars::schema_for!(CapitalInput))
                .unwrap(),
        }
    }
}

impl Tool for CapitalTool {
    type Input = CapitalInput;

    fn name(&self) -> &str {
        "capital"
    }

    fn description(&self) -> &str {
        "Returns the capital of a country"
    }

    fn parameter_schema(&self) -> &Value {
        &self.schema
    }

    fn execute(
        &self,
        input: Self::Input,
    ) -> impl Future<Output = ToolResult> + Send + 'static {
        let capital = match input.country.as_str() {
            "France" => Some("Paris"),
            "Japan" => Some("Tokyo"),
            _ => None,
        };
        let result = match capital {
            Some(capital) => Ok(capital.to_owned()),
            None => Err(swarmrun_core::tool::Error::tool_error()
                .with_reason(format!("unknown country {}", input.country))),
        };
        std::future::ready(result)
    }
}
