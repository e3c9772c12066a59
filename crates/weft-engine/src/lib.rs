pub mod agent;
pub mod builder;
pub mod condition;
mod compose;
mod context;
pub mod executor;
pub mod node;
pub mod retry;
pub mod run_log;
pub mod template;

pub use agent::Agent;
pub use builder::{NodeSpec, Registry, WorkflowBuilder};
pub use condition::{CmpOp, Condition};
pub use executor::{Executor, RunOutcome};
pub use node::{LoopNode, ParallelNode, Predicate, SequentialNode, Workflow, WorkflowNode};
pub use retry::RetryingCapability;
pub use run_log::RunLogger;
