mod common;

use serde_json::json;
use swarmrun_core::model::ModelConfig;
use swarmrun_core::tool::{ToolBinding, ToolGateway};
use swarmrun_core::trajectory::{FailureKind, ReplayToolTransport, StepKind};
use swarmrun_core::{AgentDescriptor, Task, TaskState, Topology};
use swarmrun_test_model::{PresetEvent, PresetResponse, TestModelProvider};

use common::*;

fn scripted_provider() -> TestModelProvider {
    let mut provider = TestModelProvider::default();
    provider.add_turn(
        "geo",
        PresetResponse::with_events([
            PresetEvent::tool_call("1", "capital", json!({"country": "France"})),
            PresetEvent::tool_call("2", "capital", json!({"country": "Japan"})),
            PresetEvent::tool_call("3", "capital", json!({"country": "Narnia"})),
        ]),
    );
    provider.add_turn("geo", PresetResponse::text("Paris and Tokyo"));
    provider
}

fn topology() -> Topology {
    let geo = AgentDescriptor::builder("geo", ModelConfig::new("test", "geo"))
        .with_instruction("Answer with capitals.")
        .with_tool(ToolBinding::new("atlas", "capital"))
        .build();
    Topology::chain([geo]).unwrap()
}

#[tokio::test]
async fn test_replay_reproduces_run() {
    init_tracing();

    let provider = scripted_provider();
    let original = runner_with_gateway(&provider, atlas_gateway().await)
        .run(Task::new("Capitals of France, Japan and Narnia?", topology()))
        .await
        .unwrap();
    assert_eq!(original.state, TaskState::Succeeded);
    assert_contiguous(&original.trajectory);

    let failures: Vec<_> = original
        .trajectory
        .records()
        .filter_map(|step| step.event().failure())
        .map(|failure| failure.kind)
        .collect();
    assert_eq!(failures, [FailureKind::ToolError]);

    let transport = ReplayToolTransport::from_trajectory(&original.trajectory);
    assert_eq!(transport.remaining(), 3);
    let gateway = ToolGateway::builder()
        .with_transport(transport.clone())
        .connect()
        .await
        .unwrap();

    let replay_provider = scripted_provider();
    let replayed = runner_with_gateway(&replay_provider, gateway)
        .run(Task::new("Capitals of France, Japan and Narnia?", topology()))
        .await
        .unwrap();

    assert_eq!(replayed.state, TaskState::Succeeded);
    assert_eq!(replayed.output(), original.output());
    assert_eq!(transport.remaining(), 0);
    assert_eq!(replay_provider.requests(), provider.requests());

    let outputs = |report: &swarmrun_core::TaskReport| {
        report
            .trajectory
            .records()
            .filter(|step| step.event().kind() == StepKind::ToolCall)
            .map(|step| (step.event().output().cloned(), step.event().failure().cloned()))
            .collect::<Vec<_>>()
    };
    assert_eq!(outputs(&replayed), outputs(&original));
}

#[tokio::test(start_paused = true)]
async fn test_replay_unrecorded_call() {
    let provider = scripted_provider();
    let original = runner_with_gateway(&provider, atlas_gateway().await)
        .run(Task::new("Capitals?", topology()))
        .await
        .unwrap();

    let transport = ReplayToolTransport::from_trajectory(&original.trajectory);
    let gateway = ToolGateway::builder()
        .with_transport(transport)
        .connect()
        .await
        .unwrap();

    let mut divergent = TestModelProvider::default();
    divergent.add_turn(
        "geo",
        PresetResponse::with_events([PresetEvent::tool_call(
            "1",
            "capital",
            json!({"country": "Peru"}),
        )]),
    );
    divergent.add_turn("geo", PresetResponse::text("unknown"));
    let report = runner_with_gateway(&divergent, gateway)
        .run(Task::new("Capitals?", topology()))
        .await
        .unwrap();

    assert_eq!(report.state, TaskState::Succeeded);
    let failure = report
        .trajectory
        .records()
        .find_map(|step| step.event().failure().cloned())
        .unwrap();
    assert_eq!(failure.kind, FailureKind::ToolUnreachable);
}
