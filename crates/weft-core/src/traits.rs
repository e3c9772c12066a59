use std::future::Future;

use futures::future::BoxFuture;

use crate::error::CapabilityError;
use crate::types::ExecutionEvent;
use crate::value::Value;

/// Capability: the opaque unit of work a leaf delegates to
/// (model inference, tool call, anything else).
///
/// The engine only calls this; implementations live outside the engine.
pub trait Capability: Send + Sync + 'static {
    /// Run with a fully resolved instruction.
    fn invoke(&self, instruction: String) -> BoxFuture<'_, Result<Value, CapabilityError>>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "capability"
    }
}

/// Observer registered by the caller to receive execution events as they happen.
pub trait EventSink: Send + Sync + 'static {
    fn on_event(&self, event: &ExecutionEvent);
}

/// Adapter turning an async closure into a [`Capability`].
pub struct FnCapability<F> {
    name: String,
    f: F,
}

impl<F, Fut> FnCapability<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CapabilityError>> + Send + 'static,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F, Fut> Capability for FnCapability<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CapabilityError>> + Send + 'static,
{
    fn invoke(&self, instruction: String) -> BoxFuture<'_, Result<Value, CapabilityError>> {
        Box::pin((self.f)(instruction))
    }

    fn name(&self) -> &str {
        &self.name
    }
}
