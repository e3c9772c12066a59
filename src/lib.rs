//! Weft composes agents (templated calls to external capabilities) into
//! workflow trees: sequential pipelines, parallel fan-out with a merge at the
//! join, and bounded refinement loops, all over one shared key-value store.

pub use weft_core::*;
pub use weft_engine::*;

pub mod prelude {
    pub use weft_core::{
        CapabilityError, EngineConfig, EventSink, ExecutionEvent, LoopReport, LoopState,
        MergePolicy, NodePath, StateStore, Value, WeftError,
    };
    pub use weft_engine::{Agent, Executor, Predicate, RunOutcome, Workflow, WorkflowNode};
}
