use std::sync::Arc;
use std::time::Duration;

use weft::prelude::*;
use weft::Capability;
use weft_test_utils::{init_tracing, EchoCapability, RecordingSink, ScriptedCapability};

fn leaf(name: &str, instruction: &str, out: &str, cap: Arc<dyn Capability>) -> WorkflowNode {
    WorkflowNode::leaf(Agent::new(name, instruction, out, cap).expect("valid agent"))
}

fn delayed_echo() -> Arc<dyn Capability> {
    Arc::new(EchoCapability::new().with_delay(Duration::from_millis(20)))
}

fn immediate_echo() -> Arc<dyn Capability> {
    Arc::new(weft::FnCapability::new("echo", |s: String| async move {
        Ok::<_, CapabilityError>(Value::from(s))
    }))
}

fn position(events: &[ExecutionEvent], path: &str, start: bool) -> usize {
    events
        .iter()
        .position(|e| e.path.to_string() == path && e.is_start() == start)
        .unwrap_or_else(|| panic!("no {} event for {path}", if start { "start" } else { "end" }))
}

#[tokio::test]
async fn test_fan_out_then_merge() {
    init_tracing();
    let root = WorkflowNode::sequential(
        "pipeline",
        vec![
            WorkflowNode::parallel(
                "research",
                vec![
                    leaf("a", "alpha on {topic}", "r1", delayed_echo()),
                    leaf("b", "beta on {topic}", "r2", delayed_echo()),
                ],
            )
            .unwrap(),
            leaf("c", "{r1} {r2}", "r3", delayed_echo()),
        ],
    )
    .unwrap();
    let wf = Workflow::new(root).unwrap();
    let sink = Arc::new(RecordingSink::new());

    let outcome = Executor::default()
        .with_sink(sink.clone())
        .run_workflow(&wf, StateStore::from_entries([("topic", "tides")]))
        .await;
    assert!(outcome.is_success(), "{:?}", outcome.error);

    let r1 = outcome.store.get_str("r1").unwrap().to_string();
    let r2 = outcome.store.get_str("r2").unwrap().to_string();
    assert_eq!(r1, "alpha on tides");
    assert_eq!(outcome.store.get_str("r3"), Some(format!("{} {}", r1, r2).as_str()));

    let events = &outcome.events;
    let a_start = position(events, "pipeline/research/a", true);
    let b_start = position(events, "pipeline/research/b", true);
    let a_end = position(events, "pipeline/research/a", false);
    let b_end = position(events, "pipeline/research/b", false);
    let c_start = position(events, "pipeline/c", true);
    assert!(a_start < a_end.min(b_end) && b_start < a_end.min(b_end));
    assert!(c_start > a_end.max(b_end));

    assert_eq!(sink.len(), events.len());
}

#[tokio::test]
async fn test_fan_out_overlaps_with_immediate_capabilities() {
    init_tracing();
    let root = WorkflowNode::sequential(
        "pipeline",
        vec![
            WorkflowNode::parallel(
                "research",
                vec![
                    leaf("a", "alpha on {topic}", "r1", immediate_echo()),
                    leaf("b", "beta on {topic}", "r2", immediate_echo()),
                ],
            )
            .unwrap(),
            leaf("c", "{r1} {r2}", "r3", immediate_echo()),
        ],
    )
    .unwrap();
    let wf = Workflow::new(root).unwrap();

    let outcome = Executor::default()
        .run_workflow(&wf, StateStore::from_entries([("topic", "tides")]))
        .await;
    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(outcome.store.get_str("r1"), Some("alpha on tides"));
    assert_eq!(outcome.store.get_str("r2"), Some("beta on tides"));
    assert_eq!(
        outcome.store.get_str("r3"),
        Some("alpha on tides beta on tides")
    );

    let events = &outcome.events;
    let a_start = position(events, "pipeline/research/a", true);
    let b_start = position(events, "pipeline/research/b", true);
    let a_end = position(events, "pipeline/research/a", false);
    let b_end = position(events, "pipeline/research/b", false);
    let c_start = position(events, "pipeline/c", true);
    assert!(a_start < b_start, "siblings start in declaration order");
    assert!(b_start < a_end.min(b_end), "b must start before either sibling completes");
    assert!(c_start > a_end.max(b_end));
}

#[tokio::test]
async fn test_parallel_isolation_raises_missing_key() {
    let root = WorkflowNode::parallel(
        "fan",
        vec![
            leaf("writer", "draft", "x", delayed_echo()),
            leaf("reader", "uses {x}", "y", delayed_echo()),
        ],
    )
    .unwrap();
    let wf = Workflow::new(root).unwrap();

    let err = Executor::default()
        .run_workflow(&wf, StateStore::new())
        .await
        .into_result()
        .unwrap_err();
    assert!(err.is_missing_state_key(), "{err}");
    assert!(err.to_string().contains("fan/reader"));
}

#[tokio::test]
async fn test_sibling_output_collision_is_a_conflict() {
    let root = WorkflowNode::parallel(
        "fan",
        vec![
            leaf("left", "L", "result", delayed_echo()),
            leaf("right", "R", "result", delayed_echo()),
        ],
    )
    .unwrap();
    let wf = Workflow::new(root).unwrap();

    let outcome = Executor::default()
        .run_workflow(&wf, StateStore::new())
        .await;
    match outcome.error {
        Some(WeftError::MergeConflict { ref key, ref first, ref second, .. }) => {
            assert_eq!(key, "result");
            assert_eq!(first, "fan/left");
            assert_eq!(second, "fan/right");
        }
        ref other => panic!("expected MergeConflict, got {other:?}"),
    }
    assert!(!outcome.store.contains_key("result"));
}

#[tokio::test]
async fn test_critic_refiner_loop_converges() {
    let critic = Arc::new(ScriptedCapability::from_json(vec![
        serde_json::json!({"score": 4, "note": "thin"}),
        serde_json::json!({"score": 6, "note": "better"}),
        serde_json::json!({"score": 9, "note": "ship it"}),
    ]));
    let refiner: Arc<dyn Capability> = Arc::new(EchoCapability::new().with_prefix("revised: "));

    let good_enough = Predicate::until("score >= 8", |s: &StateStore| {
        s.get("critique")
            .and_then(Value::as_record)
            .and_then(|r| r.get("score"))
            .and_then(Value::as_i64)
            .is_some_and(|n| n >= 8)
    });
    let root = WorkflowNode::sequential(
        "essay",
        vec![
            leaf("writer", "write about {topic}", "draft", Arc::new(EchoCapability::new())),
            WorkflowNode::looping(
                "refine",
                vec![
                    leaf("critic", "critique: {draft}", "critique", critic.clone()),
                    leaf("refiner", "{draft}", "draft", refiner),
                ],
                10,
                Some(good_enough),
            )
            .unwrap(),
        ],
    )
    .unwrap();
    let wf = Workflow::new(root).unwrap();

    let outcome = Executor::default()
        .run_workflow(&wf, StateStore::from_entries([("topic", "rivers")]))
        .await;
    assert!(outcome.is_success(), "{:?}", outcome.error);
    assert_eq!(critic.calls(), 3);
    // The critic always reads the refiner's latest draft.
    assert_eq!(
        critic.instructions()[2],
        "critique: revised: revised: write about rivers"
    );
    let reports = outcome.loop_reports();
    assert_eq!(reports[0].1, LoopReport { state: LoopState::Converged, iterations: 3 });
}

#[tokio::test]
async fn test_loop_without_convergence_is_exhausted_not_failed() {
    let root = WorkflowNode::looping(
        "polish",
        vec![leaf("pass", "again", "out", Arc::new(EchoCapability::new()))],
        5,
        Some(Predicate::new("never satisfied", |_: &StateStore| true)),
    )
    .unwrap();
    let wf = Workflow::new(root).unwrap();

    let outcome = Executor::default().run_workflow(&wf, StateStore::new()).await;
    assert!(outcome.is_success());
    let (path, report) = outcome.loop_reports()[0];
    assert_eq!(path.to_string(), "polish");
    assert_eq!(report, LoopReport { state: LoopState::Exhausted, iterations: 5 });
}

#[tokio::test]
async fn test_nested_failure_names_full_path() {
    let root = WorkflowNode::sequential(
        "outer",
        vec![WorkflowNode::looping(
            "retry_loop",
            vec![WorkflowNode::sequential(
                "inner",
                vec![leaf("needs_input", "{absent}", "out", Arc::new(EchoCapability::new()))],
            )
            .unwrap()],
            3,
            None,
        )
        .unwrap()],
    )
    .unwrap();
    let wf = Workflow::new(root).unwrap();

    let err = Executor::default()
        .run_workflow(&wf, StateStore::new())
        .await
        .into_result()
        .unwrap_err();
    assert_eq!(err.path(), Some("outer/retry_loop/1/inner/needs_input"));
    assert!(err.is_missing_state_key());
}
