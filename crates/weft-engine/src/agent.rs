use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info};

use weft_core::error::{CapabilityError, Result, WeftError};
use weft_core::state::StateStore;
use weft_core::traits::Capability;
use weft_core::types::{NodeKind, NodePath};
use weft_core::value::Value;

use crate::context::RunContext;
use crate::template;

/// A leaf of the workflow tree: one templated call to an external capability.
///
/// Agents hold no per-run state. The instruction template is resolved against
/// the store at execution time and the capability's result is written under
/// `output_key`.
#[derive(Clone)]
pub struct Agent {
    name: String,
    instruction: String,
    output_key: String,
    capability: Arc<dyn Capability>,
    timeout: Option<Duration>,
}

impl Agent {
    /// Create an agent. Name and output key must be non-empty.
    pub fn new(
        name: impl Into<String>,
        instruction: impl Into<String>,
        output_key: impl Into<String>,
        capability: Arc<dyn Capability>,
    ) -> Result<Self> {
        let name = name.into();
        let output_key = output_key.into();
        if name.trim().is_empty() {
            return Err(WeftError::Build("agent name must not be empty".into()));
        }
        if output_key.trim().is_empty() {
            return Err(WeftError::Build(format!(
                "agent '{}' must declare a non-empty output key",
                name
            )));
        }
        Ok(Self {
            name,
            instruction: instruction.into(),
            output_key,
            capability,
            timeout: None,
        })
    }

    /// Bound the capability call. Overrides the engine-wide leaf timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instruction(&self) -> &str {
        &self.instruction
    }

    pub fn output_key(&self) -> &str {
        &self.output_key
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Keys the instruction requires to be present in the store.
    pub fn input_keys(&self) -> Vec<String> {
        template::placeholders(&self.instruction)
            .into_iter()
            .filter(|p| !p.optional)
            .map(|p| p.key)
            .collect()
    }

    /// Resolve, invoke, write. Emits start before the call and complete/error after.
    pub(crate) async fn execute(
        &self,
        ctx: &RunContext,
        store: &mut StateStore,
        path: &NodePath,
    ) -> Result<()> {
        if ctx.is_cancelled() {
            return Err(WeftError::Cancelled {
                path: path.to_string(),
            });
        }

        ctx.started(path, NodeKind::Leaf);
        debug!(run_id = %ctx.run_id(), agent = %self.name, path = %path, capability = self.capability.name(), "Agent started");
        let start = Instant::now();
        // Suspend before the call so parallel siblings start before any of them completes.
        tokio::task::yield_now().await;

        match self.invoke(ctx, store).await {
            Ok(value) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                store.set(self.output_key.clone(), value.clone());
                info!(
                    agent = %self.name,
                    output_key = %self.output_key,
                    elapsed_ms,
                    "Agent completed"
                );
                ctx.completed(path, NodeKind::Leaf, vec![(self.output_key.clone(), value)]);
                Ok(())
            }
            Err(cause) => {
                error!(agent = %self.name, path = %path, error = %cause, "Agent failed");
                let err = WeftError::AgentExecution {
                    agent: self.name.clone(),
                    path: path.to_string(),
                    cause: Box::new(cause),
                };
                ctx.failed(path, NodeKind::Leaf, &err);
                Err(err)
            }
        }
    }

    async fn invoke(&self, ctx: &RunContext, store: &StateStore) -> Result<Value> {
        let instruction = template::resolve(&self.instruction, store)?;
        let call = self.capability.invoke(instruction);

        let value = match self.timeout.or(ctx.leaf_timeout()) {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| CapabilityError::Timeout {
                    timeout_ms: limit.as_millis() as u64,
                })??,
            None => call.await?,
        };
        Ok(value)
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("instruction", &self.instruction)
            .field("output_key", &self.output_key)
            .field("capability", &self.capability.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}
