use tracing::{debug, info, warn};

use weft_core::error::{Result, WeftError};
use weft_core::state::StateStore;
use weft_core::types::{EventKind, LoopReport, LoopState, NodeKind, NodePath};

use crate::compose::sequential::run_steps;
use crate::context::{EventDetail, RunContext};
use crate::node::LoopNode;

/// Run the loop body until the predicate converges or the budget is exhausted.
///
/// Each pass runs the body sequentially on the same store, so a pass sees
/// every write of the passes before it. Body failures abort immediately.
pub(crate) async fn run(
    ctx: &RunContext,
    node: &LoopNode,
    store: &mut StateStore,
    path: &NodePath,
) -> Result<LoopReport> {
    ctx.started(path, NodeKind::Loop);
    let max_iterations = node.max_iterations();
    let mut iterations: u32 = 0;

    let state = loop {
        let iteration_path = path.child((iterations + 1).to_string());

        if ctx.is_cancelled() {
            let err = WeftError::Cancelled {
                path: iteration_path.to_string(),
            };
            fail(ctx, path, &err, iterations);
            return Err(err);
        }

        if let Err(e) = run_steps(ctx, node.body(), store, &iteration_path).await {
            warn!(path = %path, iteration = iterations + 1, error = %e, "Loop body failed");
            fail(ctx, path, &e, iterations);
            return Err(e);
        }
        iterations += 1;

        if let Some(predicate) = node.predicate() {
            if !predicate.should_continue(store) {
                break LoopState::Converged;
            }
        }
        if iterations >= max_iterations {
            break LoopState::Exhausted;
        }
        debug!(path = %path, iteration = iterations, max_iterations, "Loop continuing");
    };

    let report = LoopReport { state, iterations };
    info!(path = %path, state = ?state, iterations, "Loop finished");
    ctx.emit(
        path,
        NodeKind::Loop,
        EventKind::Complete,
        EventDetail {
            loop_report: Some(report),
            ..Default::default()
        },
    );
    Ok(report)
}

fn fail(ctx: &RunContext, path: &NodePath, err: &WeftError, iterations: u32) {
    ctx.emit(
        path,
        NodeKind::Loop,
        EventKind::Error,
        EventDetail {
            error: Some(err.to_string()),
            loop_report: Some(LoopReport {
                state: LoopState::Failed,
                iterations,
            }),
            ..Default::default()
        },
    );
}
