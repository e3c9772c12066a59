use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use weft_core::config::EngineConfig;
use weft_core::error::WeftError;
use weft_core::traits::EventSink;
use weft_core::types::{
    EventKind, ExecutionEvent, LoopReport, MergePolicy, NodeKind, NodePath, RunId, StateDelta,
};

/// Optional payload attached to an event.
#[derive(Debug, Default)]
pub(crate) struct EventDetail {
    pub delta: StateDelta,
    pub error: Option<String>,
    pub loop_report: Option<LoopReport>,
}

/// Per-run state shared by every node of one execution: settings, the
/// cancellation signal, and the event log.
pub(crate) struct RunContext {
    run_id: RunId,
    cancel: CancellationToken,
    merge_policy: MergePolicy,
    leaf_timeout: Option<Duration>,
    log: Mutex<Vec<ExecutionEvent>>,
    sinks: Vec<Arc<dyn EventSink>>,
}

impl RunContext {
    pub fn new(
        run_id: RunId,
        config: &EngineConfig,
        sinks: Vec<Arc<dyn EventSink>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            cancel,
            merge_policy: config.engine.merge_policy,
            leaf_timeout: config.leaf_timeout(),
            log: Mutex::new(Vec::new()),
            sinks,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn merge_policy(&self) -> MergePolicy {
        self.merge_policy
    }

    pub fn leaf_timeout(&self) -> Option<Duration> {
        self.leaf_timeout
    }

    pub fn started(&self, path: &NodePath, node_kind: NodeKind) {
        self.emit(path, node_kind, EventKind::Start, EventDetail::default());
    }

    pub fn completed(&self, path: &NodePath, node_kind: NodeKind, delta: StateDelta) {
        self.emit(
            path,
            node_kind,
            EventKind::Complete,
            EventDetail {
                delta,
                ..Default::default()
            },
        );
    }

    pub fn failed(&self, path: &NodePath, node_kind: NodeKind, error: &WeftError) {
        self.emit(
            path,
            node_kind,
            EventKind::Error,
            EventDetail {
                error: Some(error.to_string()),
                ..Default::default()
            },
        );
    }

    /// Append an event to the run log and deliver it to every sink.
    ///
    /// Delivery happens under the log lock so sinks observe events in log order.
    pub fn emit(&self, path: &NodePath, node_kind: NodeKind, kind: EventKind, detail: EventDetail) {
        let mut log = self.log.lock().unwrap_or_else(|e| e.into_inner());
        let event = ExecutionEvent {
            run_id: self.run_id.clone(),
            seq: log.len() as u64,
            path: path.clone(),
            node_kind,
            kind,
            timestamp: Utc::now(),
            delta: detail.delta,
            error: detail.error,
            loop_report: detail.loop_report,
        };
        for sink in &self.sinks {
            sink.on_event(&event);
        }
        log.push(event);
    }

    pub fn into_events(self) -> Vec<ExecutionEvent> {
        self.log.into_inner().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Collect(Mutex<Vec<u64>>);

    impl EventSink for Collect {
        fn on_event(&self, event: &ExecutionEvent) {
            self.0.lock().unwrap().push(event.seq);
        }
    }

    #[test]
    fn test_events_are_sequenced_and_delivered() {
        let sink = Arc::new(Collect(Mutex::new(Vec::new())));
        let ctx = RunContext::new(
            RunId::new(),
            &EngineConfig::default(),
            vec![sink.clone()],
            CancellationToken::new(),
        );
        let path = NodePath::root("root");
        ctx.started(&path, NodeKind::Sequential);
        ctx.failed(&path, NodeKind::Sequential, &WeftError::Build("x".into()));

        assert_eq!(*sink.0.lock().unwrap(), vec![0, 1]);
        let events = ctx.into_events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, EventKind::Error);
        assert!(events[1].error.as_deref().unwrap().contains("x"));
    }

    #[test]
    fn test_settings_come_from_config() {
        let mut config = EngineConfig::default();
        config.engine.merge_policy = MergePolicy::DeclarationOrder;
        config.engine.leaf_timeout_secs = Some(2);
        let ctx = RunContext::new(RunId::new(), &config, vec![], CancellationToken::new());
        assert_eq!(ctx.merge_policy(), MergePolicy::DeclarationOrder);
        assert_eq!(ctx.leaf_timeout(), Some(Duration::from_secs(2)));
        assert!(!ctx.is_cancelled());
    }
}
