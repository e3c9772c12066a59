use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use weft_core::error::{Result, WeftError};
use weft_core::state::StateStore;
use weft_core::types::{MergePolicy, NodeKind};

use crate::agent::Agent;

/// Loop continuation predicate over the store: `true` means "run another pass".
#[derive(Clone)]
pub struct Predicate {
    label: String,
    f: Arc<dyn Fn(&StateStore) -> bool + Send + Sync>,
}

impl Predicate {
    /// Keep looping while `f` returns true.
    pub fn new(
        label: impl Into<String>,
        f: impl Fn(&StateStore) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            f: Arc::new(f),
        }
    }

    /// Keep looping until `f` returns true.
    pub fn until(
        label: impl Into<String>,
        f: impl Fn(&StateStore) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self::new(label, move |store| !f(store))
    }

    pub fn should_continue(&self, store: &StateStore) -> bool {
        (self.f)(store)
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Predicate").field(&self.label).finish()
    }
}

#[derive(Debug, Clone)]
pub struct SequentialNode {
    name: String,
    children: Vec<WorkflowNode>,
}

impl SequentialNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> &[WorkflowNode] {
        &self.children
    }
}

#[derive(Debug, Clone)]
pub struct ParallelNode {
    name: String,
    children: Vec<WorkflowNode>,
    merge_policy: Option<MergePolicy>,
}

impl ParallelNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> &[WorkflowNode] {
        &self.children
    }

    /// Node-level override of the engine's merge policy.
    pub fn merge_policy(&self) -> Option<MergePolicy> {
        self.merge_policy
    }
}

#[derive(Debug, Clone)]
pub struct LoopNode {
    name: String,
    body: Vec<WorkflowNode>,
    max_iterations: u32,
    predicate: Option<Predicate>,
}

impl LoopNode {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn body(&self) -> &[WorkflowNode] {
        &self.body
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }
}

/// A node of an immutable workflow tree.
///
/// Composite variants can only be built through the validating constructors
/// below, so every tree that exists satisfies the structural rules: composites
/// are named and non-empty, loops have at least one iteration.
#[derive(Debug, Clone)]
pub enum WorkflowNode {
    Leaf(Agent),
    Sequential(SequentialNode),
    Parallel(ParallelNode),
    Loop(LoopNode),
}

impl WorkflowNode {
    pub fn leaf(agent: Agent) -> Self {
        Self::Leaf(agent)
    }

    /// Run `children` in order against the same store.
    pub fn sequential(name: impl Into<String>, children: Vec<WorkflowNode>) -> Result<Self> {
        let name = composite_name(name, "sequential")?;
        require_children(&name, "sequential", &children)?;
        Ok(Self::Sequential(SequentialNode { name, children }))
    }

    /// Run `children` concurrently on forked stores using the engine's merge policy.
    pub fn parallel(name: impl Into<String>, children: Vec<WorkflowNode>) -> Result<Self> {
        Self::build_parallel(name, children, None)
    }

    /// Like [`WorkflowNode::parallel`] with an explicit merge policy.
    pub fn parallel_with_policy(
        name: impl Into<String>,
        children: Vec<WorkflowNode>,
        policy: MergePolicy,
    ) -> Result<Self> {
        Self::build_parallel(name, children, Some(policy))
    }

    fn build_parallel(
        name: impl Into<String>,
        children: Vec<WorkflowNode>,
        merge_policy: Option<MergePolicy>,
    ) -> Result<Self> {
        let name = composite_name(name, "parallel")?;
        require_children(&name, "parallel", &children)?;
        Ok(Self::Parallel(ParallelNode {
            name,
            children,
            merge_policy,
        }))
    }

    /// Repeat `body` until `predicate` says stop or `max_iterations` passes ran.
    /// Without a predicate the body runs exactly `max_iterations` times.
    pub fn looping(
        name: impl Into<String>,
        body: Vec<WorkflowNode>,
        max_iterations: u32,
        predicate: Option<Predicate>,
    ) -> Result<Self> {
        let name = composite_name(name, "loop")?;
        if max_iterations == 0 {
            return Err(WeftError::LoopConfig(format!(
                "loop '{}' needs max_iterations >= 1",
                name
            )));
        }
        if body.is_empty() {
            return Err(WeftError::LoopConfig(format!(
                "loop '{}' has an empty body",
                name
            )));
        }
        Ok(Self::Loop(LoopNode {
            name,
            body,
            max_iterations,
            predicate,
        }))
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Leaf(agent) => agent.name(),
            Self::Sequential(n) => n.name(),
            Self::Parallel(n) => n.name(),
            Self::Loop(n) => n.name(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Leaf(_) => NodeKind::Leaf,
            Self::Sequential(_) => NodeKind::Sequential,
            Self::Parallel(_) => NodeKind::Parallel,
            Self::Loop(_) => NodeKind::Loop,
        }
    }

    /// Direct children; empty for leaves.
    pub fn children(&self) -> &[WorkflowNode] {
        match self {
            Self::Leaf(_) => &[],
            Self::Sequential(n) => n.children(),
            Self::Parallel(n) => n.children(),
            Self::Loop(n) => n.body(),
        }
    }

    /// Every agent in the subtree, depth-first in declaration order.
    pub fn agents(&self) -> Vec<&Agent> {
        let mut out = Vec::new();
        self.collect_agents(&mut out);
        out
    }

    fn collect_agents<'a>(&'a self, out: &mut Vec<&'a Agent>) {
        match self {
            Self::Leaf(agent) => out.push(agent),
            _ => {
                for child in self.children() {
                    child.collect_agents(out);
                }
            }
        }
    }

    /// Output keys declared anywhere in the subtree.
    pub fn output_keys(&self) -> Vec<&str> {
        self.agents().into_iter().map(Agent::output_key).collect()
    }
}

fn composite_name(name: impl Into<String>, kind: &str) -> Result<String> {
    let name = name.into();
    if name.trim().is_empty() {
        return Err(WeftError::Build(format!("{} node name must not be empty", kind)));
    }
    Ok(name)
}

fn require_children(name: &str, kind: &str, children: &[WorkflowNode]) -> Result<()> {
    if children.is_empty() {
        return Err(WeftError::Build(format!(
            "{} node '{}' needs at least one child",
            kind, name
        )));
    }
    Ok(())
}

/// A validated workflow: a root node whose agent names are unique.
#[derive(Debug, Clone)]
pub struct Workflow {
    root: WorkflowNode,
}

impl Workflow {
    pub fn new(root: WorkflowNode) -> Result<Self> {
        let mut seen = HashSet::new();
        for agent in root.agents() {
            if !seen.insert(agent.name()) {
                return Err(WeftError::Build(format!(
                    "duplicate agent name '{}'",
                    agent.name()
                )));
            }
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &WorkflowNode {
        &self.root
    }

    pub fn name(&self) -> &str {
        self.root.name()
    }

    /// Look up an agent by name.
    pub fn agent(&self, name: &str) -> Option<&Agent> {
        self.root.agents().into_iter().find(|a| a.name() == name)
    }
}
