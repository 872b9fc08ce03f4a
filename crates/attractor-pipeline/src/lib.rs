//! Pipeline execution engine, node handlers, validation, and edge selection.
//!
//! This crate implements the core Attractor pipeline runner: DOT graph traversal,
//! handler dispatch, edge selection, goal gate enforcement, checkpoint/resume,
//! and the 11 built-in lint rules.

pub mod artifact_policy;
pub mod codergen_backend;
pub mod condition;
pub mod cxdb;
pub mod edge_selection;
pub mod engine;
pub mod events;
pub mod failure_classifier;
pub mod goal_gate;
pub mod graph;
pub mod handler;
pub mod handlers;
pub mod input_closure;
pub mod interviewer;
pub mod config;
pub mod preflight;
pub mod resume;
pub mod retry;
pub mod stage_runtime;
pub mod stylesheet;
pub mod transforms;
pub mod validation;

pub use condition::{
    parse_condition, evaluate_condition, Clause, ConditionExpr, Operator,
};
pub use edge_selection::{
    resolve_next_hop, select_all_eligible_edges, select_edge, Hop, HopSource,
};
pub use failure_classifier::{classify, normalize_alias, SignatureCircuitBreaker};
pub use goal_gate::{check_goal_gates, enforce_goal_gates, GoalGateResult};
pub use graph::{CodergenMode, PipelineEdge, PipelineGraph, PipelineNode};
pub use handler::{
    default_registry, default_registry_with_backend, default_registry_with_interviewer,
    ConditionalHandler, DynHandler, ExitHandler, HandlerRegistry, NodeHandler, StartHandler,
};
pub use handlers::{CodergenHandler, FanInHandler, ParallelHandler, ToolHandler};
pub use handlers::wait_human::WaitHumanHandler;
pub use interviewer::{
    Answer, AutoApproveInterviewer, ConsoleInterviewer, Interviewer, Question,
    RecordingInterviewer,
};
pub use engine::{PipelineConfig, PipelineExecutor, PipelineResult};
pub use stylesheet::{apply_stylesheet, parse_stylesheet, Declaration, Rule, Selector, Stylesheet};
pub use transforms::{apply_transforms, expand_variables};
pub use validation::{validate, validate_or_raise, validate_with_catalog, Diagnostic, LintRule, Severity};
pub use codergen_backend::{CodergenBackend, LlmCodergenBackend};
pub use events::{EventEmitter, NdjsonProgressSink, PipelineEvent};
pub use retry::{execute_with_retry, BackoffPolicy};
pub use config::RunConfig;
pub use artifact_policy::{resolve as resolve_artifact_policy, resolve_or_restore as resolve_or_restore_artifact_policy, to_checkpoint_envelope};
pub use input_closure::{materialize as materialize_input_closure, ClosureConfig, DefaultReferenceScanner, ReferenceScanner};
pub use preflight::{run_preflight, PreflightFinding, PreflightReport, PreflightSeverity};
pub use resume::{resume as resume_run_state, resume_with_cxdb, RunState};
pub use cxdb::{ContextRecord, CxdbSink, NullCxdbSink, RecordingCxdbSink};
pub use stage_runtime::{run_stage, stage_dir, StageResult};
