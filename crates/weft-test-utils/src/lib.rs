//! Mock capabilities and sinks shared by the Weft test suites.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use weft_core::error::CapabilityError;
use weft_core::traits::{Capability, EventSink};
use weft_core::types::{EventKind, ExecutionEvent};
use weft_core::value::Value;

/// Install a test subscriber honouring `RUST_LOG`. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Returns the resolved instruction as text, optionally after a delay.
#[derive(Default)]
pub struct EchoCapability {
    delay: Option<Duration>,
    prefix: String,
    instructions: Mutex<Vec<String>>,
}

impl EchoCapability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep before answering, so concurrent branches overlap.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Prepend `prefix` to every answer.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Every instruction received, in call order.
    pub fn instructions(&self) -> Vec<String> {
        self.instructions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn calls(&self) -> usize {
        self.instructions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Capability for EchoCapability {
    fn invoke(&self, instruction: String) -> BoxFuture<'_, Result<Value, CapabilityError>> {
        Box::pin(async move {
            self.instructions
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(instruction.clone());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(Value::Text(format!("{}{}", self.prefix, instruction)))
        })
    }

    fn name(&self) -> &str {
        "echo"
    }
}

/// Always fails permanently with the same message.
pub struct FailingCapability {
    message: String,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FailingCapability {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Capability for FailingCapability {
    fn invoke(&self, _instruction: String) -> BoxFuture<'_, Result<Value, CapabilityError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Err(CapabilityError::failed(self.message.clone()))
        })
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Answers from a fixed script, one entry per call. The last entry repeats
/// once the script runs out.
pub struct ScriptedCapability {
    script: Mutex<VecDeque<Value>>,
    last: Mutex<Value>,
    instructions: Mutex<Vec<String>>,
}

impl ScriptedCapability {
    pub fn new(script: Vec<Value>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(Value::Null),
            instructions: Mutex::new(Vec::new()),
        }
    }

    pub fn from_json(script: Vec<serde_json::Value>) -> Self {
        Self::new(script.into_iter().map(Value::from).collect())
    }

    pub fn calls(&self) -> usize {
        self.instructions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn instructions(&self) -> Vec<String> {
        self.instructions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Capability for ScriptedCapability {
    fn invoke(&self, instruction: String) -> BoxFuture<'_, Result<Value, CapabilityError>> {
        Box::pin(async move {
            self.instructions
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(instruction);
            let next = self
                .script
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            let mut last = self.last.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(value) = next {
                *last = value;
            }
            Ok(last.clone())
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Fails transiently `failures` times, then succeeds with `value`.
pub struct FlakyCapability {
    failures: usize,
    value: Value,
    calls: AtomicUsize,
}

impl FlakyCapability {
    pub fn new(failures: usize, value: impl Into<Value>) -> Self {
        Self {
            failures,
            value: value.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Capability for FlakyCapability {
    fn invoke(&self, _instruction: String) -> BoxFuture<'_, Result<Value, CapabilityError>> {
        Box::pin(async move {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(CapabilityError::transient(format!(
                    "attempt {} unavailable",
                    call + 1
                )));
            }
            Ok(self.value.clone())
        })
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

/// Sleeps for a fixed duration before answering. Used to trip timeouts.
pub struct SlowCapability {
    delay: Duration,
}

impl SlowCapability {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Capability for SlowCapability {
    fn invoke(&self, instruction: String) -> BoxFuture<'_, Result<Value, CapabilityError>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(Value::Text(instruction))
        })
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// Event sink that keeps every event it sees.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ExecutionEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExecutionEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(path, kind)` pairs, e.g. `("root/a", "start")`, for compact assertions.
    pub fn trace(&self) -> Vec<(String, &'static str)> {
        self.events()
            .iter()
            .map(|e| {
                let kind = match e.kind {
                    EventKind::Start => "start",
                    EventKind::Complete => "complete",
                    EventKind::Error => "error",
                };
                (e.path.to_string(), kind)
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn on_event(&self, event: &ExecutionEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_repeats_last_entry() {
        let cap = ScriptedCapability::new(vec![Value::from(1), Value::from(2)]);
        assert_eq!(cap.invoke("a".into()).await.unwrap(), Value::from(1));
        assert_eq!(cap.invoke("b".into()).await.unwrap(), Value::from(2));
        assert_eq!(cap.invoke("c".into()).await.unwrap(), Value::from(2));
        assert_eq!(cap.calls(), 3);
        assert_eq!(cap.instructions(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_flaky_recovers() {
        let cap = FlakyCapability::new(1, "ok");
        assert!(cap.invoke("x".into()).await.unwrap_err().is_retryable());
        assert_eq!(cap.invoke("x".into()).await.unwrap(), Value::from("ok"));
    }

    #[tokio::test]
    async fn test_echo_prefix() {
        let cap = EchoCapability::new().with_prefix("> ");
        assert_eq!(cap.invoke("hi".into()).await.unwrap(), Value::from("> hi"));
        assert_eq!(cap.instructions(), vec!["hi"]);
    }
}
