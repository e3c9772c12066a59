use std::collections::HashMap;

use futures::future::join_all;
use tracing::{debug, info, warn};

use weft_core::error::{BranchFailure, Result, WeftError};
use weft_core::state::StateStore;
use weft_core::types::{MergePolicy, NodeKind, NodePath, StateDelta};

use crate::context::RunContext;
use crate::executor::run_node;
use crate::node::ParallelNode;

/// Fan out over forked stores, wait for every branch, then merge.
pub(crate) async fn run(
    ctx: &RunContext,
    node: &ParallelNode,
    store: &mut StateStore,
    path: &NodePath,
) -> Result<()> {
    ctx.started(path, NodeKind::Parallel);
    let policy = node.merge_policy().unwrap_or(ctx.merge_policy());

    let forks: Vec<StateStore> = node.children().iter().map(|_| store.fork()).collect();
    let branches = node.children().iter().zip(forks).map(move |(child, mut branch_store)| {
        let branch_path = path.child(child.name());
        async move {
            let result = run_node(ctx, child, &mut branch_store, branch_path.clone()).await;
            (branch_path, branch_store, result)
        }
    });

    debug!(path = %path, branches = node.children().len(), "Fanning out");
    let results = join_all(branches).await;

    let total = results.len();
    let mut completed = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for (index, (branch_path, branch_store, result)) in results.into_iter().enumerate() {
        match result {
            Ok(()) => completed.push((branch_path, branch_store)),
            Err(error) => failures.push(BranchFailure {
                index,
                branch: branch_path.to_string(),
                error,
            }),
        }
    }

    if !failures.is_empty() {
        let err = WeftError::AggregateBranch {
            path: path.to_string(),
            total,
            failures,
        };
        warn!(path = %path, error = %err, "Parallel branches failed");
        ctx.failed(path, NodeKind::Parallel, &err);
        return Err(err);
    }

    match merge_branches(store, &completed, policy, path) {
        Ok(delta) => {
            info!(path = %path, branches = total, merged_keys = delta.len(), "Parallel join complete");
            ctx.completed(path, NodeKind::Parallel, delta);
            Ok(())
        }
        Err(e) => {
            ctx.failed(path, NodeKind::Parallel, &e);
            Err(e)
        }
    }
}

/// Fold each branch's writes into `parent` in declaration order.
///
/// Atomic: on a conflict or type mismatch the parent is left untouched.
pub(crate) fn merge_branches(
    parent: &mut StateStore,
    branches: &[(NodePath, StateStore)],
    policy: MergePolicy,
    path: &NodePath,
) -> Result<StateDelta> {
    let mut merged: StateDelta = Vec::new();
    let mut origin: HashMap<&str, &NodePath> = HashMap::new();

    for (branch_path, branch) in branches {
        for (key, value) in branch.writes() {
            if let Some(existing) = parent.get(key) {
                if !existing.is_null() && existing.kind() != value.kind() {
                    return Err(WeftError::MergeTypeMismatch {
                        path: path.to_string(),
                        key: key.to_string(),
                        branch: branch_path.to_string(),
                        expected: existing.kind(),
                        found: value.kind(),
                    });
                }
            }

            match origin.insert(key, branch_path) {
                None => merged.push((key.to_string(), value.clone())),
                Some(first) => match policy {
                    MergePolicy::Error => {
                        return Err(WeftError::MergeConflict {
                            path: path.to_string(),
                            key: key.to_string(),
                            first: first.to_string(),
                            second: branch_path.to_string(),
                        });
                    }
                    MergePolicy::DeclarationOrder => {
                        warn!(
                            key,
                            overwritten = %first,
                            winner = %branch_path,
                            "Merge conflict resolved by declaration order"
                        );
                        if let Some(slot) = merged.iter_mut().find(|(k, _)| k.as_str() == key) {
                            slot.1 = value.clone();
                        }
                    }
                },
            }
        }
    }

    for (key, value) in &merged {
        parent.set(key.clone(), value.clone());
    }
    Ok(merged)
}
