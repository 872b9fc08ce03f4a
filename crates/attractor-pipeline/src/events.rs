//! Pipeline event system for observability.
//!
//! Emits [`PipelineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! external observers (loggers, metrics collectors, UI, etc.) can subscribe to
//! pipeline execution progress without coupling to the engine internals.

use serde::{Deserialize, Serialize};

/// Events emitted during pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    PipelineStarted {
        pipeline_name: String,
        node_count: usize,
    },
    PipelineCompleted {
        pipeline_name: String,
        completed_nodes: Vec<String>,
        duration_ms: u64,
    },
    PipelineFailed {
        pipeline_name: String,
        error: String,
    },
    StageStarted {
        node_id: String,
        handler_type: String,
    },
    StageCompleted {
        node_id: String,
        status: String,
        duration_ms: u64,
    },
    StageFailed {
        node_id: String,
        error: String,
    },
    StageRetrying {
        node_id: String,
        attempt: usize,
    },
    EdgeSelected {
        from_node: String,
        to_node: String,
        edge_label: Option<String>,
    },
    GoalGateChecked {
        node_id: String,
        satisfied: bool,
    },
    CheckpointSaved {
        node_id: String,
    },
    ContextUpdated {
        node_id: String,
        keys: Vec<String>,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

/// Appends NDJSON progress records to `{logs_root}/progress.ndjson`: one JSON
/// object per line, each carrying at minimum `event` and `ts` (RFC 3339)
/// alongside whatever event-specific fields the caller supplies. This is the
/// on-disk record a run leaves behind for external tailers; `EventEmitter` is
/// the in-process complement for live subscribers.
pub struct NdjsonProgressSink {
    path: std::path::PathBuf,
}

impl NdjsonProgressSink {
    pub fn new(logs_root: impl Into<std::path::PathBuf>) -> Self {
        Self {
            path: logs_root.into().join("progress.ndjson"),
        }
    }

    /// Append one record. `fields` supplies the event-specific keys; `event`
    /// and `ts` are added automatically and win on key collision.
    pub fn append(
        &self,
        event: &str,
        mut fields: serde_json::Map<String, serde_json::Value>,
    ) -> attractor_types::Result<()> {
        use std::io::Write;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        fields.insert("event".to_string(), serde_json::Value::String(event.to_string()));
        fields.insert(
            "ts".to_string(),
            serde_json::Value::String(chrono::Utc::now().to_rfc3339()),
        );
        let line = serde_json::to_string(&serde_json::Value::Object(fields))?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(attractor_types::AttractorError::Io)?;
        writeln!(file, "{line}").map_err(attractor_types::AttractorError::Io)?;
        Ok(())
    }
}
