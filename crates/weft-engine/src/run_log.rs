use std::path::PathBuf;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use weft_core::config::LogConfig;
use weft_core::event::EventBus;
use weft_core::types::{EventKind, ExecutionEvent, LoopReport, NodeKind};

/// JSONL run logger.
///
/// Subscribes to the EventBus and writes one JSON object per event to
/// `{log_dir}/{run_id}.jsonl`. Lines are flushed as they are written, so a
/// crashed run still leaves every earlier event on disk.
pub struct RunLogger {
    log_dir: PathBuf,
}

/// A single log entry written to the JSONL file.
#[derive(Serialize)]
struct LogEntry<'a> {
    timestamp: String,
    run_id: &'a str,
    seq: u64,
    path: String,
    node_kind: NodeKind,
    event_type: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    delta: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    loop_report: Option<LoopReport>,
}

impl<'a> From<&'a ExecutionEvent> for LogEntry<'a> {
    fn from(event: &'a ExecutionEvent) -> Self {
        let delta = (!event.delta.is_empty()).then(|| {
            serde_json::Value::Object(
                event
                    .delta
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            )
        });
        Self {
            timestamp: event.timestamp.to_rfc3339(),
            run_id: &event.run_id.0,
            seq: event.seq,
            path: event.path.to_string(),
            node_kind: event.node_kind,
            event_type: event.kind,
            delta,
            error: event.error.as_deref(),
            loop_report: event.loop_report,
        }
    }
}

impl RunLogger {
    pub fn new(log_dir: PathBuf) -> Self {
        Self { log_dir }
    }

    pub fn from_config(config: &LogConfig) -> Self {
        Self::new(config.dir_path())
    }

    /// Subscribe now and write in a background task.
    ///
    /// Subscribing before the task starts means no event published after this
    /// call is missed. The task resolves to the log file path, if one was written.
    pub fn spawn(self, event_bus: &EventBus, cancel: CancellationToken) -> JoinHandle<Option<PathBuf>> {
        let rx = event_bus.subscribe();
        tokio::spawn(self.run(rx, cancel))
    }

    /// Write events until cancellation or the root node of the run terminates.
    pub async fn run(
        self,
        mut rx: broadcast::Receiver<ExecutionEvent>,
        cancel: CancellationToken,
    ) -> Option<PathBuf> {
        if let Err(e) = tokio::fs::create_dir_all(&self.log_dir).await {
            error!(error = %e, "Failed to create log directory");
            return None;
        }

        let mut writer: Option<(PathBuf, tokio::io::BufWriter<tokio::fs::File>)> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("RunLogger cancelled");
                    break;
                }
                result = rx.recv() => {
                    match result {
                        Ok(event) => {
                            // The file is named after the run, known from the first event.
                            if writer.is_none() {
                                let log_path = self.log_dir.join(format!("{}.jsonl", event.run_id));
                                let file = match tokio::fs::OpenOptions::new()
                                    .create(true)
                                    .append(true)
                                    .open(&log_path)
                                    .await
                                {
                                    Ok(f) => f,
                                    Err(e) => {
                                        error!(error = %e, path = %log_path.display(), "Failed to open log file");
                                        return None;
                                    }
                                };
                                info!(path = %log_path.display(), "RunLogger started");
                                writer = Some((log_path, tokio::io::BufWriter::new(file)));
                            }
                            let Some((_, w)) = writer.as_mut() else { break };

                            match serde_json::to_string(&LogEntry::from(&event)) {
                                Ok(json) => {
                                    let line = format!("{}\n", json);
                                    if let Err(e) = w.write_all(line.as_bytes()).await {
                                        error!(error = %e, "Failed to write log entry");
                                        break;
                                    }
                                    if let Err(e) = w.flush().await {
                                        error!(error = %e, "Failed to flush log");
                                    }
                                }
                                Err(e) => {
                                    error!(error = %e, seq = event.seq, path = %event.path, "Failed to serialize log entry");
                                }
                            }

                            if event.path.is_root() && event.is_terminal() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            debug!(skipped = n, "RunLogger lagged, skipped events");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("EventBus closed, RunLogger stopping");
                            break;
                        }
                    }
                }
            }
        }

        let (log_path, mut w) = writer?;
        w.flush().await.ok();
        debug!(path = %log_path.display(), "RunLogger finished");
        Some(log_path)
    }
}
