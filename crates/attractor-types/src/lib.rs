//! Shared types, errors, context, and outcome for the Attractor pipeline engine.
//!
//! This crate provides the foundational types used across all other Attractor crates:
//! - `AttractorError` — unified error taxonomy
//! - `Context` — thread-safe key-value store for pipeline state
//! - `Outcome` — result of executing a node handler
//! - `Checkpoint` — serializable snapshot for crash recovery

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Unified error type for all Attractor subsystems.
#[derive(Debug, thiserror::Error)]
pub enum AttractorError {
    // === LLM Provider Errors ===
    #[error("Provider {provider} returned HTTP {status}: {message}")]
    ProviderError {
        provider: String,
        status: u16,
        message: String,
        retryable: bool,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: u64,
    },

    #[error("Authentication failed for provider {provider}")]
    AuthError { provider: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    RequestTimeout {
        provider: String,
        timeout_ms: u64,
    },

    #[error("Context length exceeded for {provider}: {message}")]
    ContextLengthExceeded { provider: String, message: String },

    // === Parser Errors ===
    #[error("DOT parse error at line {line}, col {col}: {message}")]
    ParseError {
        line: usize,
        col: usize,
        message: String,
        source_snippet: Option<String>,
    },

    // === Pipeline Errors ===
    #[error("Pipeline validation failed: {0}")]
    ValidationError(String),

    #[error("Handler '{handler}' failed on node '{node}': {message}")]
    HandlerError {
        handler: String,
        node: String,
        message: String,
    },

    #[error("Goal gate unsatisfied: node '{node}' did not reach SUCCESS")]
    GoalGateUnsatisfied { node: String },

    #[error("No retry target for failed goal gate '{node}'")]
    NoRetryTarget { node: String },

    #[error("Max retries exhausted for node '{node}' after {attempts} attempts")]
    RetriesExhausted { node: String, attempts: usize },

    // === Tool Errors ===
    #[error("Tool '{tool}' error: {message}")]
    ToolError { tool: String, message: String },

    #[error("Command timed out after {timeout_ms}ms")]
    CommandTimeout { timeout_ms: u64 },

    // === Agent Errors ===
    #[error("Agent loop detected after {window} consecutive identical tool calls")]
    LoopDetected { window: usize },

    #[error("Turn limit reached: {turns} turns")]
    TurnLimitReached { turns: usize },

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl AttractorError {
    /// Returns `true` if the error is transient and the operation may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AttractorError::RateLimited { .. }
                | AttractorError::CommandTimeout { .. }
                | AttractorError::ProviderError { retryable: true, .. }
        )
    }

    /// Returns `true` if the error is permanent and retrying will not help.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttractorError::AuthError { .. }
                | AttractorError::ValidationError(_)
                | AttractorError::ContextLengthExceeded { .. }
        )
    }

    /// Maps the error to an HTTP status code for server mode.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            AttractorError::RateLimited { .. } => Some(429),
            AttractorError::AuthError { .. } => Some(401),
            AttractorError::ProviderError { status, .. } => Some(*status),
            AttractorError::RequestTimeout { .. } | AttractorError::CommandTimeout { .. } => {
                Some(504)
            }
            AttractorError::ValidationError(_) => Some(400),
            AttractorError::ContextLengthExceeded { .. } => Some(413),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, AttractorError>`.
pub type Result<T> = std::result::Result<T, AttractorError>;

// ---------------------------------------------------------------------------
// Context — thread-safe key-value store for pipeline state
// ---------------------------------------------------------------------------

use std::collections::HashMap;
use std::sync::Arc;

/// Thread-safe key-value store shared across pipeline nodes.
///
/// Cloning a `Context` yields another handle to the **same** inner state.
/// Use [`clone_isolated`](Context::clone_isolated) to get a deep copy for
/// parallel branch isolation.
#[derive(Clone)]
pub struct Context {
    inner: Arc<tokio::sync::RwLock<ContextInner>>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct ContextInner {
    values: HashMap<String, serde_json::Value>,
    logs: Vec<String>,
}

impl Context {
    /// Create an empty context.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(tokio::sync::RwLock::new(ContextInner {
                values: HashMap::new(),
                logs: Vec::new(),
            })),
        }
    }

    /// Insert or overwrite a key.
    pub async fn set(&self, key: impl Into<String>, value: serde_json::Value) {
        self.inner.write().await.values.insert(key.into(), value);
    }

    /// Read a value by key (cloned).
    pub async fn get(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.read().await.values.get(key).cloned()
    }

    /// Convenience accessor that returns a `String`. Falls back to `default`
    /// when the key is absent or not a JSON string.
    pub async fn get_string(&self, key: &str, default: &str) -> String {
        self.inner
            .read()
            .await
            .values
            .get(key)
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_else(|| default.to_owned())
    }

    /// Append a free-form log entry.
    pub async fn append_log(&self, entry: impl Into<String>) {
        self.inner.write().await.logs.push(entry.into());
    }

    /// Shallow copy of the current values map.
    pub async fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        self.inner.read().await.values.clone()
    }

    /// Deep copy that is fully independent of the original context.
    pub async fn clone_isolated(&self) -> Context {
        let guard = self.inner.read().await;
        Context {
            inner: Arc::new(tokio::sync::RwLock::new(guard.clone())),
        }
    }

    /// Merge `updates` into the context. Existing keys not present in
    /// `updates` are preserved.
    pub async fn apply_updates(&self, updates: HashMap<String, serde_json::Value>) {
        let mut guard = self.inner.write().await;
        guard.values.extend(updates);
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// StageStatus — outcome status of a pipeline node
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    PartialSuccess,
    Retry,
    Fail,
    Skipped,
}

// ---------------------------------------------------------------------------
// Outcome — result of executing a node handler
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub status: StageStatus,
    pub preferred_label: Option<String>,
    pub suggested_next_ids: Vec<String>,
    pub context_updates: HashMap<String, serde_json::Value>,
    pub notes: String,
    pub failure_reason: Option<String>,
}

impl Outcome {
    /// Create a successful outcome with the given notes.
    pub fn success(notes: impl Into<String>) -> Self {
        Self {
            status: StageStatus::Success,
            preferred_label: None,
            suggested_next_ids: Vec::new(),
            context_updates: HashMap::new(),
            notes: notes.into(),
            failure_reason: None,
        }
    }

    /// Create a failed outcome with the given reason.
    pub fn fail(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            status: StageStatus::Fail,
            preferred_label: None,
            suggested_next_ids: Vec::new(),
            context_updates: HashMap::new(),
            notes: String::new(),
            failure_reason: Some(reason),
        }
    }

    /// Create an outcome with a specific status and preferred label.
    pub fn with_label(status: StageStatus, label: impl Into<String>) -> Self {
        Self {
            status,
            preferred_label: Some(label.into()),
            suggested_next_ids: Vec::new(),
            context_updates: HashMap::new(),
            notes: String::new(),
            failure_reason: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Checkpoint — serializable snapshot for crash recovery
// ---------------------------------------------------------------------------

/// The canonical durable run checkpoint.
///
/// Written atomically (temp-file + rename) after every completed node and
/// after every parallel join, so a reader never observes a half-written file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    #[serde(default = "default_checkpoint_version")]
    pub version: u32,
    #[serde(default)]
    pub run_id: String,
    #[serde(default)]
    pub git_commit_sha: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub current_node: String,
    pub completed_nodes: Vec<String>,
    pub node_retries: HashMap<String, usize>,
    pub context_values: HashMap<String, serde_json::Value>,
    pub logs: Vec<String>,
    /// Versioned envelopes for snapshot-on-resume data, e.g.
    /// `extra["artifact_policy_resolved"] = {"version": 1, "policy": {...}}`.
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

fn default_checkpoint_version() -> u32 {
    1
}

impl Checkpoint {
    /// Serialize this checkpoint to JSON and write it atomically to `path`.
    ///
    /// Writes to a sibling temp file first, then renames it into place, so a
    /// reader never observes a partially-written checkpoint (invariant 6).
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let tmp_name = format!(
            ".{}.tmp-{}",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("checkpoint"),
            uuid::Uuid::new_v4()
        );
        let tmp_path = dir.join(tmp_name);
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    }

    /// Read a checkpoint from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let checkpoint: Self = serde_json::from_str(&data)?;
        Ok(checkpoint)
    }
}

// ---------------------------------------------------------------------------
// FailureClass — closed-set failure classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    TransientInfra,
    Canceled,
    BudgetExhausted,
    CompilationLoop,
    Structural,
    Deterministic,
}

impl FailureClass {
    /// `true` only for `TransientInfra` — the only class that may traverse a
    /// retry-target hop or a `loop_restart` edge.
    pub fn permits_retry_routing(&self) -> bool {
        matches!(self, FailureClass::TransientInfra)
    }
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureClass::TransientInfra => "transient_infra",
            FailureClass::Canceled => "canceled",
            FailureClass::BudgetExhausted => "budget_exhausted",
            FailureClass::CompilationLoop => "compilation_loop",
            FailureClass::Structural => "structural",
            FailureClass::Deterministic => "deterministic",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for FailureClass {
    type Err = ();

    /// Normalizes the alias table from spec §4.4: whitespace-trimmed,
    /// case-insensitive. Unknown aliases fall back to `Deterministic` rather
    /// than erroring — callers that need "no classification" for `<nil>`/empty
    /// should check for that before calling `parse`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        Ok(match normalized.as_str() {
            "transient_infra" | "transient" | "transient-infra" | "infrastructure_transient"
            | "retryable" => FailureClass::TransientInfra,
            "canceled" | "cancelled" => FailureClass::Canceled,
            "budget_exhausted" | "budget" => FailureClass::BudgetExhausted,
            "compilation_loop" | "compile_loop" => FailureClass::CompilationLoop,
            "structural" | "structure" | "scope_violation" => FailureClass::Structural,
            "deterministic" | "non_transient" | "permanent" => FailureClass::Deterministic,
            _ => FailureClass::Deterministic,
        })
    }
}

// ---------------------------------------------------------------------------
// ResolvedArtifactPolicy / InputManifest / FailureDossier
// ---------------------------------------------------------------------------

/// Per-run managed roots and env overrides, computed once and snapshotted in
/// the checkpoint envelope (`checkpoint.extra["artifact_policy_resolved"]`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolvedArtifactPolicy {
    pub profiles: Vec<String>,
    pub managed_roots: HashMap<String, std::path::PathBuf>,
    pub env_vars: HashMap<String, String>,
    pub checkpoint_exclude_globs: Vec<String>,
}

/// One resolved source→target copy performed by the input closure materializer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceTargetEntry {
    pub source: std::path::PathBuf,
    pub target: std::path::PathBuf,
}

/// The deterministic record of everything the input closure materializer
/// copied into the worktree and snapshot roots for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputManifest {
    pub sources: Vec<String>,
    pub resolved_files: Vec<std::path::PathBuf>,
    pub source_target_map: Vec<SourceTargetEntry>,
    pub discovered_references: Vec<std::path::PathBuf>,
    pub warnings: Vec<String>,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

/// A path the failure dossier flags as referenced but missing, along with
/// enough context to judge whether the absence is expected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissingPath {
    pub path: String,
    pub absolute_path: std::path::PathBuf,
    pub inside_repo: bool,
    pub exists_now: bool,
    pub exists_in_input_snapshot: bool,
}

/// The shell-command context captured in a failure dossier, when the failed
/// stage was tool-shaped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolFailureContext {
    pub command: String,
    pub working_dir: std::path::PathBuf,
    pub exit_code: Option<i32>,
    pub stderr_excerpt: String,
}

/// A structured snapshot of a loop-restart-eligible failure, persisted at
/// `{logs_root}/failure_dossier.json` and injected into the next prompt's
/// preamble via `context.failure_dossier.summary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureDossier {
    #[serde(default = "default_dossier_version")]
    pub version: u32,
    pub failed_node_id: String,
    pub handler_type: String,
    pub status: StageStatus,
    pub failure_class: FailureClass,
    pub failure_reason: String,
    pub attempts_used: usize,
    pub max_attempts: usize,
    pub stage_dir: std::path::PathBuf,
    pub missing_paths: Vec<MissingPath>,
    pub missing_executables: Vec<String>,
    pub tool: Option<ToolFailureContext>,
    pub summary: String,
}

fn default_dossier_version() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// FidelityMode — controls output fidelity/compression level
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FidelityMode {
    Full,
    Truncate,
    Compact,
    SummaryLow,
    SummaryMedium,
    SummaryHigh,
}
