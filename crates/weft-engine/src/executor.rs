use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use weft_core::config::EngineConfig;
use weft_core::error::{Result, WeftError};
use weft_core::event::EventBus;
use weft_core::state::StateStore;
use weft_core::traits::EventSink;
use weft_core::types::{ExecutionEvent, LoopReport, NodePath, RunId};

use crate::compose::{looping, parallel, sequential};
use crate::context::RunContext;
use crate::node::{Workflow, WorkflowNode};

/// Result of executing an entire workflow.
#[derive(Debug)]
pub struct RunOutcome {
    pub run_id: RunId,
    /// The store after the run. On failure it holds every write made before the error.
    pub store: StateStore,
    /// Every event of the run, in emission order.
    pub events: Vec<ExecutionEvent>,
    /// The first unrecovered error, if any.
    pub error: Option<WeftError>,
    pub elapsed_ms: u64,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<StateStore> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.store),
        }
    }

    /// Final report of every loop that finished (converged, exhausted or failed).
    pub fn loop_reports(&self) -> Vec<(&NodePath, LoopReport)> {
        self.events
            .iter()
            .filter(|e| e.is_terminal())
            .filter_map(|e| e.loop_report.map(|r| (&e.path, r)))
            .collect()
    }

    /// Events whose path ends in `name`.
    pub fn events_for<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a ExecutionEvent> {
        self.events.iter().filter(move |e| e.path.leaf() == name)
    }
}

/// Top-level driver: walks a workflow tree, dispatching each node to its
/// runner, and collects the event log.
///
/// This is the only entry point for running workflows.
pub struct Executor {
    config: EngineConfig,
    sinks: Vec<Arc<dyn EventSink>>,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            sinks: vec![],
            cancel: CancellationToken::new(),
        }
    }

    /// Register an observer for live events.
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Publish live events on a broadcast bus.
    pub fn with_event_bus(self, bus: Arc<EventBus>) -> Self {
        self.with_sink(bus)
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token whose cancellation stops every run of this executor at its next
    /// leaf or loop iteration.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run a workflow from `initial` state.
    pub async fn run_workflow(&self, workflow: &Workflow, initial: StateStore) -> RunOutcome {
        self.run_workflow_with_cancel(workflow, initial, self.cancel.child_token())
            .await
    }

    /// Run a workflow with a run-scoped cancellation token.
    pub async fn run_workflow_with_cancel(
        &self,
        workflow: &Workflow,
        initial: StateStore,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let start = Instant::now();
        let run_id = RunId::new();
        let ctx = RunContext::new(run_id.clone(), &self.config, self.sinks.clone(), cancel);
        let mut store = initial;
        let root = workflow.root();

        info!(run_id = %run_id, workflow = %root.name(), "Starting workflow run");
        let result = run_node(&ctx, root, &mut store, NodePath::root(root.name())).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(()) => info!(run_id = %run_id, elapsed_ms, keys = store.len(), "Workflow run complete"),
            Err(e) => error!(run_id = %run_id, elapsed_ms, error = %e, "Workflow run failed"),
        }

        RunOutcome {
            run_id,
            store,
            events: ctx.into_events(),
            error: result.err(),
            elapsed_ms,
        }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

/// Dispatch one node by variant. Boxed so composites can recurse.
pub(crate) fn run_node<'a>(
    ctx: &'a RunContext,
    node: &'a WorkflowNode,
    store: &'a mut StateStore,
    path: NodePath,
) -> BoxFuture<'a, Result<()>> {
    Box::pin(async move {
        match node {
            WorkflowNode::Leaf(agent) => agent.execute(ctx, store, &path).await,
            WorkflowNode::Sequential(n) => sequential::run(ctx, n, store, &path).await,
            WorkflowNode::Parallel(n) => parallel::run(ctx, n, store, &path).await,
            WorkflowNode::Loop(n) => looping::run(ctx, n, store, &path).await.map(|_| ()),
        }
    })
}
