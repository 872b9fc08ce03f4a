//! CXDB sink: an append-only record of context snapshots taken at each
//! completed node, independent of the checkpoint file. Checkpoints capture
//! "resume from here"; a CXDB sink captures "what did the context look like
//! at every step", for forking a new run from any earlier head rather than
//! just the latest one.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use attractor_types::Result;

/// One recorded context snapshot, keyed by the node that produced it.
#[derive(Debug, Clone)]
pub struct ContextRecord {
    pub run_id: String,
    pub node_id: String,
    pub values: HashMap<String, Value>,
}

#[async_trait]
pub trait CxdbSink: Send + Sync {
    /// Record the context snapshot taken right after `node_id` completed.
    async fn record_context(&self, run_id: &str, node_id: &str, values: HashMap<String, Value>) -> Result<()>;

    /// Fetch the most recently recorded snapshot for `run_id`, the "head",
    /// to fork a new run's initial context from.
    async fn fork_from_head(&self, run_id: &str) -> Result<Option<HashMap<String, Value>>>;
}

/// Discards everything. Used when a run doesn't need fork support.
pub struct NullCxdbSink;

#[async_trait]
impl CxdbSink for NullCxdbSink {
    async fn record_context(&self, _run_id: &str, _node_id: &str, _values: HashMap<String, Value>) -> Result<()> {
        Ok(())
    }

    async fn fork_from_head(&self, _run_id: &str) -> Result<Option<HashMap<String, Value>>> {
        Ok(None)
    }
}

/// In-memory sink that keeps every recorded snapshot, in order, per run.
/// Useful for tests and for short-lived local runs that want fork support
/// without a real datastore.
#[derive(Default)]
pub struct RecordingCxdbSink {
    records: std::sync::Mutex<Vec<ContextRecord>>,
}

impl RecordingCxdbSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records_for(&self, run_id: &str) -> Vec<ContextRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.run_id == run_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl CxdbSink for RecordingCxdbSink {
    async fn record_context(&self, run_id: &str, node_id: &str, values: HashMap<String, Value>) -> Result<()> {
        self.records.lock().unwrap().push(ContextRecord {
            run_id: run_id.to_string(),
            node_id: node_id.to_string(),
            values,
        });
        Ok(())
    }

    async fn fork_from_head(&self, run_id: &str) -> Result<Option<HashMap<String, Value>>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|r| r.run_id == run_id)
            .map(|r| r.values.clone()))
    }
}
