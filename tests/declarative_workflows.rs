use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use weft::prelude::*;
use weft::{EventBus, Registry, RunLogger, WorkflowBuilder};
use weft_test_utils::{EchoCapability, FlakyCapability, ScriptedCapability};

const REVIEW_PIPELINE: &str = r#"
type = "sequential"
name = "review"

[[children]]
type = "parallel"
name = "gather"

[[children.children]]
type = "agent"
name = "facts"
instruction = "facts about {subject}"
output_key = "facts"
capability = "echo"

[[children.children]]
type = "agent"
name = "quotes"
instruction = "quotes about {subject}"
output_key = "quotes"
capability = "flaky"

[children.children.retry]
max_retries = 3
initial_backoff_ms = 1
max_backoff_ms = 2

[[children]]
type = "loop"
name = "grade"
max_iterations = 6
until = "grade:passed"

[[children.body]]
type = "agent"
name = "grader"
instruction = "grade {facts} / {quotes}"
output_key = "grade:passed"
capability = "grader"
"#;

fn registry(grader: Arc<ScriptedCapability>) -> Registry {
    let mut registry = Registry::new();
    registry.register_capability("echo", EchoCapability::new());
    registry.register_capability("flaky", FlakyCapability::new(2, "a quote"));
    registry.register_capability_arc("grader", grader);
    registry
}

#[tokio::test]
async fn test_toml_workflow_runs_end_to_end() {
    let grader = Arc::new(ScriptedCapability::new(vec![
        Value::Bool(false),
        Value::Bool(true),
    ]));
    let registry = registry(grader.clone());
    let wf = WorkflowBuilder::new(&registry)
        .from_toml(REVIEW_PIPELINE)
        .expect("valid workflow");

    let outcome = Executor::default()
        .run_workflow(&wf, StateStore::from_entries([("subject", "glaciers")]))
        .await;
    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(outcome.store.get_str("facts"), Some("facts about glaciers"));
    assert_eq!(outcome.store.get_str("quotes"), Some("a quote"));
    assert_eq!(grader.calls(), 2);
    assert_eq!(grader.instructions()[0], "grade facts about glaciers / a quote");
    assert_eq!(
        outcome.loop_reports()[0].1,
        LoopReport { state: LoopState::Converged, iterations: 2 }
    );
}

#[tokio::test]
async fn test_json_workflow_with_registered_predicate() {
    let mut registry = Registry::new();
    registry.register_capability("counter", ScriptedCapability::new(vec![1.into(), 2.into(), 3.into()]));
    registry.register_predicate(
        "below_three",
        Predicate::new("below_three", |s: &StateStore| {
            s.get("n").and_then(Value::as_i64).unwrap_or(0) < 3
        }),
    );
    let wf = WorkflowBuilder::new(&registry)
        .from_json(
            r#"{"type": "loop", "name": "count", "max_iterations": 10, "predicate": "below_three",
                "body": [{"type": "agent", "name": "inc", "instruction": "next", "output_key": "n", "capability": "counter"}]}"#,
        )
        .expect("valid workflow");

    let store = Executor::default()
        .run_workflow(&wf, StateStore::new())
        .await
        .into_result()
        .expect("run succeeds");
    assert_eq!(store.get("n"), Some(&Value::Int(3)));
}

#[test]
fn test_invalid_descriptions_fail_at_build_time() {
    let registry = registry(Arc::new(ScriptedCapability::new(vec![])));
    let builder = WorkflowBuilder::new(&registry);

    let empty_seq = builder.from_json(r#"{"type": "sequential", "name": "s", "children": []}"#);
    assert!(matches!(empty_seq, Err(WeftError::Build(_))));

    let empty_key = builder.from_json(
        r#"{"type": "agent", "name": "a", "instruction": "x", "output_key": "", "capability": "echo"}"#,
    );
    assert!(matches!(empty_key, Err(WeftError::Build(_))));

    let zero_loop = builder.from_json(
        r#"{"type": "loop", "name": "l", "max_iterations": 0,
            "body": [{"type": "agent", "name": "a", "instruction": "x", "output_key": "o", "capability": "echo"}]}"#,
    );
    assert!(matches!(zero_loop, Err(WeftError::LoopConfig(_))));

    let unknown_type = builder.from_json(r#"{"type": "conditional", "name": "c"}"#);
    assert!(matches!(unknown_type, Err(WeftError::Json(_))));
}

#[tokio::test]
async fn test_run_log_written_for_declarative_run() {
    let dir = tempfile::tempdir().expect("temp dir");
    let bus = Arc::new(EventBus::new(64));
    let logger = RunLogger::new(dir.path().to_path_buf()).spawn(&bus, CancellationToken::new());

    let mut registry = Registry::new();
    registry.register_capability("echo", EchoCapability::new());
    let wf = WorkflowBuilder::new(&registry)
        .from_json(
            r#"{"type": "sequential", "name": "pipeline", "children": [
                {"type": "agent", "name": "a", "instruction": "one", "output_key": "a", "capability": "echo"},
                {"type": "agent", "name": "b", "instruction": "{a} two", "output_key": "b", "capability": "echo"}
            ]}"#,
        )
        .expect("valid workflow");

    let outcome = Executor::default()
        .with_event_bus(bus)
        .run_workflow(&wf, StateStore::new())
        .await;
    assert!(outcome.is_success());

    let path = logger.await.expect("logger task").expect("log written");
    assert_eq!(path, dir.path().join(format!("{}.jsonl", outcome.run_id)));
    let lines: Vec<serde_json::Value> = std::fs::read_to_string(&path)
        .expect("read log")
        .lines()
        .map(|l| serde_json::from_str(l).expect("json line"))
        .collect();
    assert_eq!(lines.len(), outcome.events.len());
    assert_eq!(lines[0]["path"], "pipeline");
    assert_eq!(lines[0]["event_type"], "start");
    let b_done = lines
        .iter()
        .find(|l| l["path"] == "pipeline/b" && l["event_type"] == "complete")
        .expect("b completed");
    assert_eq!(b_done["delta"]["b"], "one two");
}
