use tracing::debug;

use weft_core::error::Result;
use weft_core::state::StateStore;
use weft_core::types::{NodeKind, NodePath};

use crate::context::RunContext;
use crate::executor::run_node;
use crate::node::{SequentialNode, WorkflowNode};

pub(crate) async fn run(
    ctx: &RunContext,
    node: &SequentialNode,
    store: &mut StateStore,
    path: &NodePath,
) -> Result<()> {
    ctx.started(path, NodeKind::Sequential);
    match run_steps(ctx, node.children(), store, path).await {
        Ok(()) => {
            ctx.completed(path, NodeKind::Sequential, vec![]);
            Ok(())
        }
        Err(e) => {
            ctx.failed(path, NodeKind::Sequential, &e);
            Err(e)
        }
    }
}

/// Run `steps` in order on one store, stopping at the first failure.
/// Loop bodies use this too.
pub(crate) async fn run_steps(
    ctx: &RunContext,
    steps: &[WorkflowNode],
    store: &mut StateStore,
    path: &NodePath,
) -> Result<()> {
    for (index, step) in steps.iter().enumerate() {
        debug!(path = %path, step = index, name = step.name(), "Running step");
        run_node(ctx, step, store, path.child(step.name())).await?;
    }
    Ok(())
}
