use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use weft_core::config::RetryConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::Capability;
use weft_core::types::MergePolicy;

use crate::agent::Agent;
use crate::condition::Condition;
use crate::node::{Predicate, Workflow, WorkflowNode};
use crate::retry::RetryingCapability;

/// Serializable description of a workflow node.
///
/// Capabilities and predicates are referenced by name and resolved against a
/// [`Registry`] when the description is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeSpec {
    Agent {
        name: String,
        instruction: String,
        output_key: String,
        capability: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_secs: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        retry: Option<RetryConfig>,
    },
    Sequential {
        name: String,
        #[serde(default)]
        children: Vec<NodeSpec>,
    },
    Parallel {
        name: String,
        #[serde(default)]
        children: Vec<NodeSpec>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        merge_policy: Option<MergePolicy>,
    },
    Loop {
        name: String,
        #[serde(default)]
        body: Vec<NodeSpec>,
        max_iterations: i64,
        /// Stop once this expression holds, e.g. `score >= 8`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        until: Option<String>,
        /// Name of a registered continue-predicate.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        predicate: Option<String>,
    },
}

/// Named capabilities and loop predicates available to declarative workflows.
#[derive(Default)]
pub struct Registry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
    predicates: HashMap<String, Predicate>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability under `name`, replacing any earlier one.
    pub fn register_capability(&mut self, name: impl Into<String>, capability: impl Capability) {
        self.register_capability_arc(name, Arc::new(capability));
    }

    pub fn register_capability_arc(&mut self, name: impl Into<String>, capability: Arc<dyn Capability>) {
        self.capabilities.insert(name.into(), capability);
    }

    pub fn register_predicate(&mut self, name: impl Into<String>, predicate: Predicate) {
        self.predicates.insert(name.into(), predicate);
    }

    pub fn capability(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn predicate(&self, name: &str) -> Option<&Predicate> {
        self.predicates.get(name)
    }

    /// Registered capability names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.capabilities.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Turns [`NodeSpec`] descriptions into validated [`Workflow`]s.
pub struct WorkflowBuilder<'r> {
    registry: &'r Registry,
}

impl<'r> WorkflowBuilder<'r> {
    pub fn new(registry: &'r Registry) -> Self {
        Self { registry }
    }

    pub fn build(&self, spec: &NodeSpec) -> Result<Workflow> {
        let root = self.build_node(spec)?;
        Workflow::new(root)
    }

    pub fn from_json(&self, json: &str) -> Result<Workflow> {
        let spec: NodeSpec = serde_json::from_str(json)?;
        self.build(&spec)
    }

    pub fn from_toml(&self, content: &str) -> Result<Workflow> {
        let spec: NodeSpec =
            toml::from_str(content).map_err(|e| WeftError::Config(e.to_string()))?;
        self.build(&spec)
    }

    fn build_node(&self, spec: &NodeSpec) -> Result<WorkflowNode> {
        match spec {
            NodeSpec::Agent {
                name,
                instruction,
                output_key,
                capability,
                timeout_secs,
                retry,
            } => {
                let mut cap = self.registry.capability(capability).ok_or_else(|| {
                    WeftError::Build(format!(
                        "agent '{}' references unknown capability '{}'",
                        name, capability
                    ))
                })?;
                if let Some(retry) = retry {
                    cap = Arc::new(RetryingCapability::new(cap, retry.clone()));
                }
                let mut agent = Agent::new(name.as_str(), instruction.as_str(), output_key.as_str(), cap)?;
                if let Some(secs) = timeout_secs {
                    agent = agent.with_timeout(Duration::from_secs(*secs));
                }
                Ok(WorkflowNode::leaf(agent))
            }
            NodeSpec::Sequential { name, children } => {
                WorkflowNode::sequential(name.as_str(), self.build_children(children)?)
            }
            NodeSpec::Parallel {
                name,
                children,
                merge_policy,
            } => {
                let children = self.build_children(children)?;
                match merge_policy {
                    Some(policy) => WorkflowNode::parallel_with_policy(name.as_str(), children, *policy),
                    None => WorkflowNode::parallel(name.as_str(), children),
                }
            }
            NodeSpec::Loop {
                name,
                body,
                max_iterations,
                until,
                predicate,
            } => {
                let max = u32::try_from(*max_iterations)
                    .ok()
                    .filter(|n| *n >= 1)
                    .ok_or_else(|| {
                        WeftError::LoopConfig(format!(
                            "loop '{}': max_iterations must be between 1 and {}, got {}",
                            name,
                            u32::MAX,
                            max_iterations
                        ))
                    })?;
                let predicate = self.loop_predicate(name, until.as_deref(), predicate.as_deref())?;
                debug!(loop_name = %name, max_iterations = max, "Building loop");
                WorkflowNode::looping(name.as_str(), self.build_children(body)?, max, predicate)
            }
        }
    }

    fn build_children(&self, specs: &[NodeSpec]) -> Result<Vec<WorkflowNode>> {
        specs.iter().map(|s| self.build_node(s)).collect()
    }

    fn loop_predicate(
        &self,
        loop_name: &str,
        until: Option<&str>,
        predicate: Option<&str>,
    ) -> Result<Option<Predicate>> {
        match (until, predicate) {
            (Some(_), Some(_)) => Err(WeftError::LoopConfig(format!(
                "loop '{}' sets both 'until' and 'predicate'",
                loop_name
            ))),
            (Some(expr), None) => {
                let condition: Condition = expr.parse()?;
                Ok(Some(Predicate::until(expr, move |store| {
                    condition.evaluate(store)
                })))
            }
            (None, Some(name)) => self
                .registry
                .predicate(name)
                .cloned()
                .map(Some)
                .ok_or_else(|| {
                    WeftError::LoopConfig(format!(
                        "loop '{}' references unknown predicate '{}'",
                        loop_name, name
                    ))
                }),
            (None, None) => Ok(None),
        }
    }
}
