pub mod config;
pub mod error;
pub mod event;
pub mod state;
pub mod traits;
pub mod types;
pub mod value;

pub use config::{EngineConfig, RetryConfig};
pub use error::{BranchFailure, CapabilityError, Result, WeftError};
pub use event::EventBus;
pub use state::StateStore;
pub use traits::{Capability, EventSink, FnCapability};
pub use types::*;
pub use value::Value;
