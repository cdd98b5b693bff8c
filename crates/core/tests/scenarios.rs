mod common;

use serde_json::json;
use swarmrun_core::model::{ModelConfig, ModelMessage};
use swarmrun_core::tool::ToolBinding;
use swarmrun_core::trajectory::{FailureKind, StepKind};
use swarmrun_core::{AgentDescriptor, Participant, Task, TaskState, Topology};
use swarmrun_test_model::{PresetEvent, PresetResponse, TestModelProvider};

use common::*;

#[tokio::test]
async fn test_sequence_of_two_agents() {
    init_tracing();

    let mut provider = TestModelProvider::default();
    provider.add_turn("x", PresetResponse::text("Paris"));
    provider.add_turn("y", PresetResponse::text("Bonjour, Paris"));

    let topology = Topology::chain([agent("x"), agent("y")]).unwrap();
    let report = runner(&provider)
        .run(Task::new("Capital of France?", topology))
        .await
        .unwrap();

    assert_eq!(report.state, TaskState::Succeeded);
    assert!(report.error.is_none());
    assert_eq!(report.output(), Some("Bonjour, Paris"));
    assert_eq!(report.terminal.len(), 1);
    assert_eq!(report.terminal[0].recipient(), &Participant::Caller);

    let steps = report.trajectory.steps();
    assert_eq!(steps.len(), 2);
    assert!(steps.iter().all(|step| step.event().kind() == StepKind::ModelCall));
    assert_eq!(steps[0].event().agent().to_string(), "x");
    assert_eq!(steps[1].event().agent().to_string(), "y");
    assert_contiguous(&report.trajectory);
    assert_eq!(report.trajectory.terminal(), report.terminal.as_slice());

    let y_request = provider
        .requests()
        .into_iter()
        .find(|req| req.config.model == "y")
        .unwrap();
    assert_eq!(y_request.messages, vec![ModelMessage::user("Paris")]);
}

#[tokio::test]
async fn test_unbound_tool_is_rejected() {
    init_tracing();

    let mut provider = TestModelProvider::default();
    provider.add_turn(
        "x",
        PresetResponse::with_events([PresetEvent::tool_call(
            "call_1",
            "delete_all",
            json!({}),
        )]),
    );
    provider.add_turn("x", PresetResponse::text("I cannot do that."));

    let x = AgentDescriptor::builder("x", ModelConfig::new("test", "x"))
        .with_tool(ToolBinding::new("atlas", "capital"))
        .build();
    let topology = Topology::chain([x]).unwrap();
    let runner = runner_with_gateway(&provider, atlas_gateway().await);
    let report = runner
        .run(Task::new("Clean everything", topology))
        .await
        .unwrap();

    assert_eq!(report.state, TaskState::Succeeded);
    assert_eq!(report.output(), Some("I cannot do that."));

    let failed: Vec<_> = report
        .trajectory
        .records()
        .filter(|step| step.event().is_failure())
        .collect();
    assert_eq!(failed.len(), 1);
    let event = failed[0].event();
    assert_eq!(event.kind(), StepKind::ToolCall);
    assert_eq!(event.failure().unwrap().kind, FailureKind::ToolRejected);
    assert_eq!(event.input()["tool"], "delete_all");
    assert_eq!(event.parent(), Some(1));

    // The loop went on: two model calls, well below the turn limit.
    assert_eq!(provider.request_count("x"), 2);
    assert_eq!(report.trajectory.steps().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_tool_call() {
    init_tracing();

    let mut provider = TestModelProvider::default();
    provider.add_turn(
        "z",
        PresetResponse::with_events([PresetEvent::tool_call(
            "call_1",
            "sleep",
            json!({"millis": 1000}),
        )]),
    );
    provider.add_turn("z", PresetResponse::text("never sent"));

    let z = AgentDescriptor::builder("z", ModelConfig::new("test", "z"))
        .with_tool(ToolBinding::new("atlas", "sleep"))
        .build();
    let topology = Topology::chain([z]).unwrap();
    let runner = runner_with_gateway(&provider, atlas_gateway().await);
    let mut handle = runner.submit(Task::new("Take a nap", topology)).unwrap();

    let first = handle.next_event().await.unwrap();
    assert_eq!(first.event().kind(), StepKind::ModelCall);
    assert_eq!(handle.state(), TaskState::Running);
    handle.cancel();

    let report = handle.wait().await;
    assert_eq!(report.state, TaskState::Cancelled);
    assert!(report.error.is_none());
    assert!(report.terminal.is_empty());

    let kinds: Vec<_> = report
        .trajectory
        .records()
        .map(|step| step.event().kind())
        .collect();
    assert_eq!(
        kinds,
        vec![StepKind::ModelCall, StepKind::ToolCall, StepKind::Cancelled]
    );
    let tool_step = report.trajectory.steps()[1].event();
    assert!(!tool_step.is_failure());
    assert_eq!(tool_step.output().unwrap()["content"], "slept 1000ms");
    assert_eq!(provider.request_count("z"), 1);
}
