//! Stage runtime: wraps a single handler invocation with stage-directory
//! bookkeeping, attempt archival, retry/escalation, and failure-dossier
//! construction. This is what `engine::run` calls per node instead of
//! invoking the handler directly — the handler itself stays a pure
//! node-in, outcome-out function.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use attractor_types::{
    Context, FailureClass, FailureDossier, Outcome, Result, StageStatus,
};

use crate::events::NdjsonProgressSink;
use crate::failure_classifier::{classify, SignatureCircuitBreaker};
use crate::graph::PipelineNode;
use crate::handler::DynHandler;
use crate::retry::BackoffPolicy;

/// Outcome of running a node through the stage runtime: either it resolved
/// within budget, or it exhausted its attempts and a dossier was written.
pub struct StageResult {
    pub outcome: Outcome,
    pub attempts_used: usize,
    pub dossier: Option<FailureDossier>,
}

/// Per-node stage directory layout: `{logs_root}/{node_id}/`. Prior files at
/// the top level of the stage dir are archived into `attempt_{n}/` before a
/// retry starts so nothing from a previous attempt is silently overwritten.
pub fn stage_dir(logs_root: &Path, node_id: &str) -> PathBuf {
    logs_root.join(node_id)
}

fn status_str(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Success => "success",
        StageStatus::PartialSuccess => "partial_success",
        StageStatus::Retry => "retry",
        StageStatus::Fail => "fail",
        StageStatus::Skipped => "skipped",
    }
}

fn progress_fields(entries: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn archive_prior_attempt(dir: &Path, attempt_index: usize) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let mut top_level = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if name_str.starts_with("attempt_") {
            continue;
        }
        top_level.push(entry.path());
    }
    if top_level.is_empty() {
        return Ok(());
    }
    let archive_dir = dir.join(format!("attempt_{}", attempt_index));
    std::fs::create_dir_all(&archive_dir)?;
    for path in top_level {
        let file_name = path.file_name().unwrap().to_owned();
        std::fs::rename(&path, archive_dir.join(file_name))?;
    }
    Ok(())
}

/// Run `handler` against `node` under the stage runtime's attempt loop.
/// Allows up to `node.max_restarts + 1` attempts, escalating through
/// `node.escalation_models` on successive attempts when the handler honors
/// `context.model_override`, and tripping a per-node signature circuit
/// breaker after `node.restart_signature_limit` distinct failure reasons.
///
/// Each attempt runs under a stall watchdog bounded by `node.timeout`
/// (default 300s, matching the tool handler's subprocess timeout). A handler
/// that produces no outcome before the deadline is treated as a Fail attempt
/// with a `"stall watchdog"` failure reason, so it flows through the same
/// retry/escalation/circuit-breaker machinery as any other failure rather
/// than aborting the run outright. Every attempt's outcome is harvested to
/// `{stage_dir}/outcome.json`, which is what actually makes attempt archival
/// observable in a real run rather than only in tests that pre-seed a file.
/// `stage_attempt_start`/`stage_attempt_end`/`stall_watchdog_timeout`/
/// `failure_dossier_updated` records are appended to
/// `{logs_root}/progress.ndjson` as they happen.
///
/// Writes a [`FailureDossier`] to `{logs_root}/failure_dossier.json` and into
/// `context.failure_dossier` the moment a failure is eligible for
/// loop-restart routing but the stage runtime itself gives up (attempts
/// exhausted or circuit breaker tripped), so the *next* attempt at this node
/// (reached via a `loop_restart` edge) sees why the last one failed.
pub async fn run_stage(
    handler: &DynHandler,
    node: &PipelineNode,
    context: &Context,
    graph: &crate::graph::PipelineGraph,
    logs_root: &Path,
) -> Result<StageResult> {
    let dir = stage_dir(logs_root, &node.id);
    std::fs::create_dir_all(&dir)?;
    let progress = NdjsonProgressSink::new(logs_root);

    let max_attempts = if node.max_restarts > 0 {
        node.max_restarts + 1
    } else {
        node.max_retries + 1
    };
    let policy = BackoffPolicy::default();
    let mut breaker = SignatureCircuitBreaker::new(node.restart_signature_limit);

    let mut last_outcome: Option<Outcome> = None;
    let mut last_class = FailureClass::Deterministic;

    for attempt in 0..max_attempts {
        if attempt > 0 {
            archive_prior_attempt(&dir, attempt - 1)?;
            if !node.escalation_models.is_empty() {
                let idx = (attempt - 1).min(node.escalation_models.len() - 1);
                context
                    .set("model_override", serde_json::json!(node.escalation_models[idx]))
                    .await;
            }
            let delay = policy.delay_for_attempt(attempt - 1);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        progress.append("stage_attempt_start", progress_fields(&[("node_id", node.id.clone().into()), ("attempt", attempt.into())]))?;

        let stall_timeout = node.timeout.unwrap_or(std::time::Duration::from_secs(300));
        let outcome = match tokio::time::timeout(stall_timeout, handler.execute(node, context, graph)).await {
            Ok(result) => result?,
            Err(_) => {
                progress.append(
                    "stall_watchdog_timeout",
                    progress_fields(&[
                        ("node_id", node.id.clone().into()),
                        ("timeout_ms", (stall_timeout.as_millis() as u64).into()),
                    ]),
                )?;
                Outcome::fail(format!(
                    "stall watchdog idle timeout after {}s",
                    stall_timeout.as_secs()
                ))
            }
        };
        let class = classify(&outcome, None);
        std::fs::write(dir.join("outcome.json"), serde_json::to_string_pretty(&outcome)?)?;
        progress.append(
            "stage_attempt_end",
            progress_fields(&[
                ("node_id", node.id.clone().into()),
                ("status", status_str(outcome.status).into()),
            ]),
        )?;

        if outcome.status != StageStatus::Fail && outcome.status != StageStatus::Retry {
            return Ok(StageResult {
                outcome,
                attempts_used: attempt + 1,
                dossier: None,
            });
        }

        let reason = outcome.failure_reason.clone().unwrap_or_default();
        let tripped = breaker.record(&node.id, &reason);

        last_class = class;
        last_outcome = Some(outcome);

        if tripped || !class.permits_retry_routing() || attempt + 1 >= max_attempts {
            break;
        }
    }

    let outcome = last_outcome.unwrap_or_else(|| Outcome::fail("stage runtime produced no outcome"));
    let dossier = build_dossier(node, &outcome, last_class, max_attempts, &dir);
    context
        .set("failure_dossier", serde_json::to_value(&dossier)?)
        .await;
    let dossier_path = logs_root.join("failure_dossier.json");
    std::fs::write(&dossier_path, serde_json::to_string_pretty(&dossier)?)?;
    progress.append(
        "failure_dossier_updated",
        progress_fields(&[("node_id", node.id.clone().into())]),
    )?;

    Ok(StageResult {
        outcome,
        attempts_used: max_attempts,
        dossier: Some(dossier),
    })
}

fn build_dossier(
    node: &PipelineNode,
    outcome: &Outcome,
    failure_class: FailureClass,
    max_attempts: usize,
    stage_dir: &Path,
) -> FailureDossier {
    let reason = outcome
        .failure_reason
        .clone()
        .unwrap_or_else(|| "no failure_reason provided".to_string());
    FailureDossier {
        version: 1,
        failed_node_id: node.id.clone(),
        handler_type: node
            .node_type
            .clone()
            .unwrap_or_else(|| node.shape.clone()),
        status: outcome.status,
        failure_class,
        failure_reason: reason.clone(),
        attempts_used: max_attempts,
        max_attempts,
        stage_dir: stage_dir.to_path_buf(),
        missing_paths: Vec::new(),
        missing_executables: Vec::new(),
        tool: None,
        summary: format!(
            "node '{}' failed after {} attempt(s): {}",
            node.id, max_attempts, reason
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{CodergenMode, PipelineGraph};
    use crate::handler::{DynHandler, HandlerRegistry};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn make_node(id: &str, max_restarts: usize, restart_signature_limit: usize) -> PipelineNode {
        PipelineNode {
            id: id.into(),
            label: id.into(),
            shape: "box".into(),
            node_type: Some("test_handler".into()),
            prompt: None,
            max_retries: 0,
            goal_gate: false,
            retry_target: None,
            fallback_retry_target: None,
            fidelity: None,
            thread_id: None,
            classes: Vec::new(),
            timeout: None,
            llm_model: None,
            llm_provider: None,
            reasoning_effort: None,
            auto_status: true,
            allow_partial: false,
            codergen_mode: CodergenMode::OneShot,
            max_restarts,
            escalation_models: Vec::new(),
            restart_signature_limit,
            tool_hooks_pre: Vec::new(),
            tool_hooks_post: Vec::new(),
            raw_attrs: HashMap::new(),
        }
    }

    fn make_graph() -> PipelineGraph {
        let dot = r#"digraph G { start [shape=Mdiamond]; n [shape=box]; done [shape=Msquare]; start -> n -> done; }"#;
        PipelineGraph::from_dot(attractor_dot::parse(dot).unwrap()).unwrap()
    }

    struct AlwaysFails;

    #[async_trait]
    impl crate::handler::NodeHandler for AlwaysFails {
        fn handler_type(&self) -> &str {
            "test_handler"
        }
        async fn execute(
            &self,
            _node: &PipelineNode,
            _ctx: &Context,
            _graph: &PipelineGraph,
        ) -> Result<Outcome> {
            Ok(Outcome::fail("timeout contacting provider"))
        }
    }

    struct SucceedsOnSecondTry {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl crate::handler::NodeHandler for SucceedsOnSecondTry {
        fn handler_type(&self) -> &str {
            "test_handler"
        }
        async fn execute(
            &self,
            _node: &PipelineNode,
            _ctx: &Context,
            _graph: &PipelineGraph,
        ) -> Result<Outcome> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n == 0 {
                Ok(Outcome::fail("timeout waiting for response"))
            } else {
                Ok(Outcome::success("recovered"))
            }
        }
    }

    #[tokio::test]
    async fn exhausts_attempts_and_writes_dossier() {
        let handler = DynHandler::new(AlwaysFails);
        let node = make_node("n", 1, 5);
        let ctx = Context::new();
        let graph = make_graph();
        let dir = tempfile::tempdir().unwrap();

        let result = run_stage(&handler, &node, &ctx, &graph, dir.path()).await.unwrap();
        assert_eq!(result.attempts_used, 2);
        assert!(result.dossier.is_some());
        assert!(dir.path().join("failure_dossier.json").exists());
        assert!(ctx.get("failure_dossier").await.is_some());
    }

    #[tokio::test]
    async fn writes_progress_ndjson_records_for_each_attempt() {
        let handler = DynHandler::new(AlwaysFails);
        let node = make_node("n", 1, 5);
        let ctx = Context::new();
        let graph = make_graph();
        let dir = tempfile::tempdir().unwrap();

        run_stage(&handler, &node, &ctx, &graph, dir.path()).await.unwrap();

        let raw = std::fs::read_to_string(dir.path().join("progress.ndjson")).unwrap();
        let events: Vec<String> = raw
            .lines()
            .map(|line| serde_json::from_str::<serde_json::Value>(line).unwrap()["event"].as_str().unwrap().to_string())
            .collect();

        assert_eq!(
            events.iter().filter(|e| *e == "stage_attempt_start").count(),
            2
        );
        assert_eq!(
            events.iter().filter(|e| *e == "stage_attempt_end").count(),
            2
        );
        assert!(events.contains(&"failure_dossier_updated".to_string()));
    }

    #[tokio::test]
    async fn succeeds_on_retry_within_budget() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = DynHandler::new(SucceedsOnSecondTry { calls: calls.clone() });
        let node = make_node("n", 2, 5);
        let ctx = Context::new();
        let graph = make_graph();
        let dir = tempfile::tempdir().unwrap();

        let result = run_stage(&handler, &node, &ctx, &graph, dir.path()).await.unwrap();
        assert_eq!(result.outcome.status, StageStatus::Success);
        assert_eq!(result.attempts_used, 2);
        assert!(result.dossier.is_none());
    }

    #[tokio::test]
    async fn archives_prior_attempt_artifacts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler = DynHandler::new(SucceedsOnSecondTry { calls: calls.clone() });
        let node = make_node("n", 2, 5);
        let ctx = Context::new();
        let graph = make_graph();
        let dir = tempfile::tempdir().unwrap();
        let node_dir = stage_dir(dir.path(), "n");
        std::fs::create_dir_all(&node_dir).unwrap();
        std::fs::write(node_dir.join("output.txt"), "first attempt output").unwrap();

        run_stage(&handler, &node, &ctx, &graph, dir.path()).await.unwrap();

        assert!(node_dir.join("attempt_0").join("output.txt").exists());
    }

    #[test]
    fn registry_resolves_known_handler_type() {
        let mut reg = HandlerRegistry::new();
        reg.register(AlwaysFails);
        assert!(reg.has("test_handler"));
    }

    struct NeverResolves;

    #[async_trait]
    impl crate::handler::NodeHandler for NeverResolves {
        fn handler_type(&self) -> &str {
            "test_handler"
        }
        async fn execute(
            &self,
            _node: &PipelineNode,
            _ctx: &Context,
            _graph: &PipelineGraph,
        ) -> Result<Outcome> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    #[tokio::test]
    async fn stall_watchdog_times_out_hung_handler() {
        let handler = DynHandler::new(NeverResolves);
        let mut node = make_node("n", 0, 5);
        node.timeout = Some(std::time::Duration::from_millis(20));
        let ctx = Context::new();
        let graph = make_graph();
        let dir = tempfile::tempdir().unwrap();

        let result = run_stage(&handler, &node, &ctx, &graph, dir.path()).await.unwrap();
        assert_eq!(result.outcome.status, StageStatus::Fail);
        assert!(result.outcome.failure_reason.as_deref().unwrap_or("").contains("stall watchdog"));
        assert!(result.dossier.is_some());
    }
}
