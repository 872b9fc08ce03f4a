//! Pipeline execution engine — the core traversal loop.
//!
//! Implements the 5-phase lifecycle: parse, validate, initialize, execute, finalize.
//! Hop selection goes through [`classify`]/[`resolve_next_hop`] rather than raw
//! edge selection, so fan-in retry routing and failure classification are
//! first-class parts of the loop. Every completed node (and every parallel
//! join) writes a [`Checkpoint`], and nodes run through the stage runtime so
//! stage directories, attempt archival, and failure dossiers happen for real.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use attractor_types::{AttractorError, Checkpoint, Context, Outcome, Result, StageStatus};

use crate::cxdb::{CxdbSink, NullCxdbSink};
use crate::edge_selection::resolve_next_hop;
use crate::failure_classifier::classify;
use crate::goal_gate::enforce_goal_gates;
use crate::graph::{PipelineGraph, PipelineNode};
use crate::handler::{default_registry, HandlerRegistry};
use crate::stage_runtime::run_stage;
use crate::validation::validate_or_raise;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// The core pipeline executor. Owns a handler registry and drives graph traversal.
pub struct PipelineExecutor {
    registry: HandlerRegistry,
    logs_root: PathBuf,
    cxdb_sink: Arc<dyn CxdbSink>,
}

/// Configuration for a pipeline run.
pub struct PipelineConfig {
    pub logs_root: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            logs_root: PathBuf::from(".attractor/logs"),
        }
    }
}

/// The result of a completed pipeline execution.
#[derive(Debug)]
pub struct PipelineResult {
    pub completed_nodes: Vec<String>,
    pub node_outcomes: HashMap<String, Outcome>,
    pub final_context: HashMap<String, serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Convert an `attractor_dot::AttributeValue` to a `serde_json::Value`.
fn attr_to_json(val: &attractor_dot::AttributeValue) -> serde_json::Value {
    match val {
        attractor_dot::AttributeValue::String(s) => serde_json::Value::String(s.clone()),
        attractor_dot::AttributeValue::Integer(i) => serde_json::json!(*i),
        attractor_dot::AttributeValue::Float(f) => serde_json::json!(*f),
        attractor_dot::AttributeValue::Boolean(b) => serde_json::Value::Bool(*b),
        attractor_dot::AttributeValue::Duration(d) => serde_json::json!(d.as_millis() as u64),
    }
}

/// Map a `StageStatus` to the lowercase string used in edge conditions.
fn status_to_string(status: StageStatus) -> String {
    match status {
        StageStatus::Success => "success".to_string(),
        StageStatus::PartialSuccess => "partial_success".to_string(),
        StageStatus::Retry => "retry".to_string(),
        StageStatus::Fail => "fail".to_string(),
        StageStatus::Skipped => "skipped".to_string(),
    }
}

fn resolver(outcome: &Outcome) -> impl Fn(&str) -> String + '_ {
    move |key: &str| -> String {
        match key {
            "outcome" => status_to_string(outcome.status),
            "preferred_label" => outcome.preferred_label.clone().unwrap_or_default(),
            _ => String::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// PipelineExecutor
// ---------------------------------------------------------------------------

impl PipelineExecutor {
    /// Create an executor with the given handler registry.
    pub fn new(registry: HandlerRegistry) -> Self {
        Self {
            registry,
            logs_root: PipelineConfig::default().logs_root,
            cxdb_sink: Arc::new(NullCxdbSink),
        }
    }

    /// Create an executor pre-loaded with the default built-in handlers.
    pub fn with_default_registry() -> Self {
        Self::new(default_registry())
    }

    /// Set the directory checkpoints, stage directories, and failure
    /// dossiers are written under.
    pub fn with_logs_root(mut self, logs_root: impl Into<PathBuf>) -> Self {
        self.logs_root = logs_root.into();
        self
    }

    /// Record a context snapshot after every completed node into `sink`, in
    /// addition to the per-node checkpoint. Used to support forking a new run
    /// from any earlier head rather than just the latest checkpoint.
    pub fn with_cxdb_sink(mut self, sink: Arc<dyn CxdbSink>) -> Self {
        self.cxdb_sink = sink;
        self
    }

    /// Run the full 5-phase pipeline lifecycle on the given graph, starting
    /// from a freshly initialized context.
    pub async fn run(&self, graph: &PipelineGraph) -> Result<PipelineResult> {
        validate_or_raise(graph)?;
        let context = Context::new();
        for (key, val) in &graph.attrs {
            context.set(key, attr_to_json(val)).await;
        }
        let start = graph
            .start_node()
            .ok_or_else(|| AttractorError::ValidationError("No start node found".into()))?;
        self.run_internal(graph, context, start.id.clone(), Vec::new(), HashMap::new())
            .await
    }

    /// Run the pipeline with a caller-supplied initial context (e.g. one
    /// seeded with CLI flags or a prior materialization pass) instead of a
    /// bare `Context::new()`.
    pub async fn run_with_context(&self, graph: &PipelineGraph, context: Context) -> Result<PipelineResult> {
        validate_or_raise(graph)?;
        let start = graph
            .start_node()
            .ok_or_else(|| AttractorError::ValidationError("No start node found".into()))?;
        self.run_internal(graph, context, start.id.clone(), Vec::new(), HashMap::new())
            .await
    }

    /// Resume a previously checkpointed run: continues from
    /// `state.current_node_id` with `state.context` and the checkpoint's
    /// `completed_nodes`, rather than starting over from the graph's start
    /// node.
    pub async fn resume_run(&self, state: crate::resume::RunState) -> Result<PipelineResult> {
        validate_or_raise(&state.graph)?;
        let completed_nodes = state.checkpoint.completed_nodes.clone();
        self.run_internal(
            &state.graph,
            state.context,
            state.current_node_id,
            completed_nodes,
            HashMap::new(),
        )
        .await
    }

    async fn checkpoint_after(
        &self,
        run_id: &str,
        current_node_id: &str,
        context: &Context,
        completed_nodes: &[String],
    ) -> Result<()> {
        std::fs::create_dir_all(&self.logs_root)?;
        let context_values = context.snapshot().await;
        let mut extra = HashMap::new();
        if let Some(policy_envelope) = context_values.get("artifact_policy") {
            extra.insert("artifact_policy_resolved".to_string(), policy_envelope.clone());
        }
        let checkpoint = Checkpoint {
            version: 1,
            run_id: run_id.to_string(),
            git_commit_sha: None,
            timestamp: chrono::Utc::now(),
            current_node: current_node_id.to_string(),
            completed_nodes: completed_nodes.to_vec(),
            node_retries: HashMap::new(),
            context_values,
            logs: Vec::new(),
            extra,
        };
        checkpoint.save(&self.logs_root.join("checkpoint.json"))?;
        self.cxdb_sink
            .record_context(run_id, current_node_id, context.snapshot().await)
            .await?;
        Ok(())
    }

    async fn execute_node(&self, node: &PipelineNode, context: &Context, graph: &PipelineGraph) -> Result<Outcome> {
        let handler_type = self.registry.resolve_type(node);
        let handler = self.registry.get(&handler_type).ok_or_else(|| AttractorError::HandlerError {
            handler: handler_type.clone(),
            node: node.id.clone(),
            message: format!("No handler registered for type '{}'", handler_type),
        })?;
        let result = run_stage(handler, node, context, graph, &self.logs_root).await?;
        Ok(result.outcome)
    }

    /// Run a single fan-out branch to completion: a linear chain of nodes
    /// starting at `start_id`, stopping the moment it reaches a fan-in
    /// (`tripleoctagon`) node. Nested `component` nodes inside a branch are
    /// executed as ordinary handlers (their own fan-out is not expanded) —
    /// only the top-level parallel dispatch forks real concurrent work.
    async fn run_branch(
        &self,
        start_id: &str,
        context: &Context,
        graph: &PipelineGraph,
    ) -> Result<(Outcome, Option<String>, Vec<String>, HashMap<String, Outcome>)> {
        let mut current = graph
            .node(start_id)
            .ok_or_else(|| AttractorError::Other(format!("branch target '{}' not found", start_id)))?;
        let mut visited = Vec::new();
        let mut outcomes = HashMap::new();

        loop {
            if current.shape == "tripleoctagon" {
                return Ok((Outcome::success("branch reached join"), Some(current.id.clone()), visited, outcomes));
            }

            let outcome = self.execute_node(current, context, graph).await?;
            context.apply_updates(outcome.context_updates.clone()).await;
            visited.push(current.id.clone());
            outcomes.insert(current.id.clone(), outcome.clone());

            let failure_class = classify(&outcome, None);
            let resolve = resolver(&outcome);
            let hop = resolve_next_hop(graph, &current.id, &outcome, &resolve, failure_class);

            match hop {
                Some(hop) => {
                    let next_id = hop.edge.to.clone();
                    if graph.node(&next_id).map(|n| n.shape == "tripleoctagon").unwrap_or(false) {
                        return Ok((outcome, Some(next_id), visited, outcomes));
                    }
                    current = graph
                        .node(&next_id)
                        .ok_or_else(|| AttractorError::Other(format!("Edge target '{}' not found", next_id)))?;
                }
                None => return Ok((outcome, None, visited, outcomes)),
            }
        }
    }

    /// Fan a `component` node out into one concurrently-run branch per
    /// outgoing edge, join at the shared fan-in node (if all branches agree
    /// on one), and return the join node's outcome plus where to continue
    /// traversal from.
    async fn run_parallel_node(
        &self,
        node: &PipelineNode,
        context: &Context,
        graph: &PipelineGraph,
        run_id: &str,
    ) -> Result<(Outcome, PipelineNode, Vec<String>, HashMap<String, Outcome>)> {
        let branches = graph.outgoing_edges(&node.id).to_vec();
        if branches.is_empty() {
            return Err(AttractorError::HandlerError {
                handler: "parallel".into(),
                node: node.id.clone(),
                message: "component node has no outgoing branches".into(),
            });
        }

        let branch_futures = branches.iter().map(|edge| {
            let branch_id = edge.to.clone();
            let branch_context = context.clone_isolated();
            async move {
                let ctx = branch_context.await;
                let result = self.run_branch(&branch_id, &ctx, graph).await;
                (branch_id, ctx, result)
            }
        });

        let branch_results = futures::future::join_all(branch_futures).await;

        let mut branch_statuses = HashMap::new();
        let mut branch_outcomes = HashMap::new();
        let mut join_node_id: Option<String> = None;
        let mut merged_updates: HashMap<String, serde_json::Value> = HashMap::new();
        let mut visited_nodes = Vec::new();
        let mut visited_outcomes = HashMap::new();

        for (branch_id, branch_ctx, result) in branch_results {
            let (outcome, branch_join, branch_visited, branch_node_outcomes) = result?;
            branch_statuses.insert(branch_id.clone(), status_to_string(outcome.status));
            merged_updates.extend(branch_ctx.snapshot().await);
            branch_outcomes.insert(branch_id, serde_json::to_value(&outcome)?);
            visited_nodes.extend(branch_visited);
            visited_outcomes.extend(branch_node_outcomes);
            if join_node_id.is_none() {
                join_node_id = branch_join;
            }
        }

        context.apply_updates(merged_updates).await;
        context
            .set("parallel.branch_outcomes", serde_json::to_value(&branch_statuses)?)
            .await;

        let results_path = self.logs_root.join(format!("{}_parallel_results.json", node.id));
        std::fs::create_dir_all(&self.logs_root)?;
        std::fs::write(&results_path, serde_json::to_string_pretty(&branch_outcomes)?)?;

        let join_id = join_node_id.ok_or_else(|| AttractorError::HandlerError {
            handler: "parallel".into(),
            node: node.id.clone(),
            message: "no branch reached a shared fan-in node".into(),
        })?;
        let join_node = graph
            .node(&join_id)
            .ok_or_else(|| AttractorError::Other(format!("fan-in node '{}' not found", join_id)))?
            .clone();

        tracing::info!(node = %node.id, run_id, branches = branch_statuses.len(), join = %join_id, "Parallel fan-out joined");

        let join_outcome = self.execute_node(&join_node, context, graph).await?;
        Ok((join_outcome, join_node, visited_nodes, visited_outcomes))
    }

    async fn run_internal(
        &self,
        graph: &PipelineGraph,
        context: Context,
        start_node_id: String,
        mut completed_nodes: Vec<String>,
        mut node_outcomes: HashMap<String, Outcome>,
    ) -> Result<PipelineResult> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let mut current_node = graph
            .node(&start_node_id)
            .ok_or_else(|| AttractorError::Other(format!("start node '{}' not found", start_node_id)))?;

        loop {
            // Terminal check (exit node)
            if current_node.shape == "Msquare" {
                let gate_result = enforce_goal_gates(graph, &node_outcomes)?;
                if !gate_result.all_satisfied {
                    if let Some(ref target) = gate_result.retry_target {
                        current_node = graph
                            .node(target)
                            .ok_or_else(|| AttractorError::Other(format!("Retry target '{}' not found", target)))?;
                        continue;
                    }
                }

                let outcome = self.execute_node(current_node, &context, graph).await?;
                completed_nodes.push(current_node.id.clone());
                node_outcomes.insert(current_node.id.clone(), outcome);
                self.checkpoint_after(&run_id, &current_node.id, &context, &completed_nodes)
                    .await?;
                break;
            }

            // Fan-out dispatch for parallel ("component") nodes
            if current_node.shape == "component" {
                let (outcome, join_node, branch_visited, branch_outcomes) =
                    self.run_parallel_node(current_node, &context, graph, &run_id).await?;
                completed_nodes.push(current_node.id.clone());
                node_outcomes.insert(current_node.id.clone(), outcome.clone());
                completed_nodes.extend(branch_visited);
                node_outcomes.extend(branch_outcomes);
                completed_nodes.push(join_node.id.clone());
                node_outcomes.insert(join_node.id.clone(), outcome.clone());
                self.checkpoint_after(&run_id, &join_node.id, &context, &completed_nodes)
                    .await?;

                let failure_class = classify(&outcome, None);
                let resolve = resolver(&outcome);
                let hop = resolve_next_hop(graph, &join_node.id, &outcome, &resolve, failure_class);
                match hop {
                    Some(hop) => {
                        let next_id = hop.edge.to.clone();
                        current_node = graph
                            .node(&next_id)
                            .ok_or_else(|| AttractorError::Other(format!("Edge target '{}' not found", next_id)))?;
                        continue;
                    }
                    None => {
                        if outcome.status == StageStatus::Fail {
                            return Err(AttractorError::HandlerError {
                                handler: "parallel.fan_in".into(),
                                node: join_node.id.clone(),
                                message: "Fan-in failed with no outgoing edge".into(),
                            });
                        }
                        break;
                    }
                }
            }

            // Execute handler
            let outcome = self.execute_node(current_node, &context, graph).await?;

            completed_nodes.push(current_node.id.clone());
            node_outcomes.insert(current_node.id.clone(), outcome.clone());

            context.apply_updates(outcome.context_updates.clone()).await;
            context
                .set("outcome", serde_json::Value::String(status_to_string(outcome.status)))
                .await;
            if let Some(ref label) = outcome.preferred_label {
                context.set("preferred_label", serde_json::Value::String(label.clone())).await;
            }

            self.checkpoint_after(&run_id, &current_node.id, &context, &completed_nodes)
                .await?;

            let failure_class = classify(&outcome, None);
            let resolve = resolver(&outcome);
            let hop = resolve_next_hop(graph, &current_node.id, &outcome, &resolve, failure_class);

            match hop {
                Some(hop) => {
                    if hop.edge.loop_restart {
                        completed_nodes.clear();
                        node_outcomes.clear();
                    }
                    let next_id = hop.edge.to.clone();
                    current_node = graph
                        .node(&next_id)
                        .ok_or_else(|| AttractorError::Other(format!("Edge target '{}' not found", next_id)))?;
                }
                None => {
                    if outcome.status == StageStatus::Fail {
                        let handler_type = self.registry.resolve_type(current_node);
                        return Err(AttractorError::HandlerError {
                            handler: handler_type,
                            node: current_node.id.clone(),
                            message: "Handler failed with no outgoing edge".into(),
                        });
                    }
                    break;
                }
            }
        }

        // Phase 5: Finalize
        let final_context = context.snapshot().await;
        Ok(PipelineResult {
            completed_nodes,
            node_outcomes,
            final_context,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::PipelineGraph;

    fn parse_graph(dot: &str) -> PipelineGraph {
        let parsed = attractor_dot::parse(dot).unwrap();
        PipelineGraph::from_dot(parsed).unwrap()
    }

    fn executor_in_temp_dir() -> (PipelineExecutor, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let executor = PipelineExecutor::with_default_registry().with_logs_root(dir.path().to_path_buf());
        (executor, dir)
    }

    // Test 1: Linear pipeline (start -> A -> exit) completes successfully
    #[tokio::test]
    async fn linear_pipeline_completes() {
        let graph = parse_graph(
            r#"digraph G {
                start [shape="Mdiamond"]
                process [shape="box", label="Process", prompt="Do work", llm_provider="anthropic"]
                done [shape="Msquare"]
                start -> process -> done
            }"#,
        );
        let (executor, _dir) = executor_in_temp_dir();
        let result = executor.run(&graph).await.unwrap();

        assert_eq!(result.completed_nodes, vec!["start", "process", "done"]);
        assert!(result.node_outcomes.contains_key("start"));
        assert!(result.node_outcomes.contains_key("process"));
        assert!(result.node_outcomes.contains_key("done"));
        assert_eq!(result.node_outcomes["start"].status, StageStatus::Success);
        assert_eq!(result.node_outcomes["process"].status, StageStatus::Success);
        assert_eq!(result.node_outcomes["done"].status, StageStatus::Success);
    }

    // Test 2: Branching pipeline routes based on conditions
    #[tokio::test]
    async fn branching_pipeline_routes_on_condition() {
        let graph = parse_graph(
            r#"digraph G {
                start [shape="Mdiamond"]
                check [shape="box", label="Check", prompt="Check something", llm_provider="anthropic"]
                yes_path [shape="box", label="Yes Path", prompt="Yes", llm_provider="anthropic"]
                no_path [shape="box", label="No Path", prompt="No", llm_provider="anthropic"]
                done [shape="Msquare"]
                start -> check
                check -> yes_path [condition="outcome=success"]
                check -> no_path [condition="outcome=fail"]
                yes_path -> done
                no_path -> done
            }"#,
        );
        let (executor, _dir) = executor_in_temp_dir();
        let result = executor.run(&graph).await.unwrap();

        assert!(result.completed_nodes.contains(&"yes_path".to_string()));
        assert!(!result.completed_nodes.contains(&"no_path".to_string()));
    }

    // Test 3: Pipeline with no start node returns error
    #[tokio::test]
    async fn no_start_node_returns_error() {
        let graph = parse_graph(
            r#"digraph G {
                process [shape="box", label="Do work"]
                done [shape="Msquare"]
                process -> done
            }"#,
        );
        let (executor, _dir) = executor_in_temp_dir();
        let result = executor.run(&graph).await;

        assert!(result.is_err());
        let err = result.unwrap_err();
        match err {
            AttractorError::ValidationError(msg) => {
                assert!(msg.contains("start node"), "Expected error about start node, got: {msg}");
            }
            other => panic!("Expected ValidationError, got: {other:?}"),
        }
    }

    // Test 4: Context updates from one node visible to next (verify via final_context)
    #[tokio::test]
    async fn context_updates_propagate() {
        let graph = parse_graph(
            r#"digraph G {
                start [shape="Mdiamond"]
                step [shape="box", label="Step", prompt="Generate code", llm_provider="anthropic"]
                done [shape="Msquare"]
                start -> step -> done
            }"#,
        );
        let (executor, _dir) = executor_in_temp_dir();
        let result = executor.run(&graph).await.unwrap();

        assert_eq!(
            result.final_context.get("step.prompt"),
            Some(&serde_json::Value::String("Generate code".into())),
        );
        assert_eq!(
            result.final_context.get("outcome"),
            Some(&serde_json::Value::String("success".into())),
        );
    }

    // Test 5: Goal gate satisfied pipeline completes
    #[tokio::test]
    async fn goal_gate_failure_with_retry_loops_back() {
        let graph = parse_graph(
            r#"digraph G {
                start [shape="Mdiamond"]
                review [shape="box", goal_gate=true, retry_target="start", label="Review", prompt="Review code", llm_provider="anthropic"]
                done [shape="Msquare"]
                start -> review -> done
            }"#,
        );
        let (executor, _dir) = executor_in_temp_dir();
        let result = executor.run(&graph).await.unwrap();

        assert!(result.completed_nodes.contains(&"done".to_string()));
    }

    // Test 6: Goal gate failure without retry target returns error
    #[tokio::test]
    async fn goal_gate_failure_without_retry_returns_error() {
        use async_trait::async_trait;
        use crate::handler::NodeHandler;
        use crate::graph::PipelineNode;

        struct FailHandler;

        #[async_trait]
        impl NodeHandler for FailHandler {
            fn handler_type(&self) -> &str {
                "codergen"
            }
            async fn execute(
                &self,
                _node: &PipelineNode,
                _ctx: &Context,
                _graph: &PipelineGraph,
            ) -> Result<Outcome> {
                Ok(Outcome::fail("intentional failure"))
            }
        }

        let graph = parse_graph(
            r#"digraph G {
                start [shape="Mdiamond"]
                review [shape="box", goal_gate=true, label="Review", prompt="Review", llm_provider="anthropic"]
                done [shape="Msquare"]
                start -> review -> done
            }"#,
        );

        let mut registry = HandlerRegistry::new();
        registry.register(crate::handler::StartHandler);
        registry.register(crate::handler::ExitHandler);
        registry.register(crate::handler::ConditionalHandler);
        registry.register(FailHandler);

        let dir = tempfile::tempdir().unwrap();
        let executor = PipelineExecutor::new(registry).with_logs_root(dir.path().to_path_buf());
        let result = executor.run(&graph).await;

        assert!(result.is_err());
        let err = result.unwrap_err();
        match err {
            AttractorError::GoalGateUnsatisfied { node } => {
                assert_eq!(node, "review");
            }
            other => panic!("Expected GoalGateUnsatisfied, got: {other:?}"),
        }
    }

    // Test 7: Goal gate failure with retry target retries correctly
    #[tokio::test]
    async fn goal_gate_failure_with_retry_target_retries() {
        use async_trait::async_trait;
        use crate::handler::NodeHandler;
        use crate::graph::PipelineNode;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct RetryableHandler {
            call_count: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl NodeHandler for RetryableHandler {
            fn handler_type(&self) -> &str {
                "codergen"
            }
            async fn execute(
                &self,
                _node: &PipelineNode,
                _ctx: &Context,
                _graph: &PipelineGraph,
            ) -> Result<Outcome> {
                let count = self.call_count.fetch_add(1, Ordering::SeqCst);
                if count == 0 {
                    Ok(Outcome::fail("first attempt fails"))
                } else {
                    Ok(Outcome::success("retry succeeded"))
                }
            }
        }

        let graph = parse_graph(
            r#"digraph G {
                start [shape="Mdiamond"]
                review [shape="box", goal_gate=true, retry_target="start", label="Review", prompt="Review", llm_provider="anthropic"]
                done [shape="Msquare"]
                start -> review -> done
            }"#,
        );

        let call_count = Arc::new(AtomicUsize::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register(crate::handler::StartHandler);
        registry.register(crate::handler::ExitHandler);
        registry.register(crate::handler::ConditionalHandler);
        registry.register(RetryableHandler {
            call_count: call_count.clone(),
        });

        let dir = tempfile::tempdir().unwrap();
        let executor = PipelineExecutor::new(registry).with_logs_root(dir.path().to_path_buf());
        let result = executor.run(&graph).await.unwrap();

        assert!(result.completed_nodes.contains(&"done".to_string()));
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    // Test 8: PipelineExecutor::new and with_default_registry
    #[test]
    fn executor_constructors() {
        let executor = PipelineExecutor::with_default_registry();
        assert!(executor.registry.has("start"));
        assert!(executor.registry.has("exit"));
        assert!(executor.registry.has("codergen"));

        let custom = PipelineExecutor::new(HandlerRegistry::new());
        assert!(!custom.registry.has("start"));
    }

    // Test 9: checkpoint.json is written after every completed node
    #[tokio::test]
    async fn checkpoint_is_written_during_run() {
        let graph = parse_graph(
            r#"digraph G {
                start [shape="Mdiamond"]
                process [shape="box", label="Process", prompt="Do work", llm_provider="anthropic"]
                done [shape="Msquare"]
                start -> process -> done
            }"#,
        );
        let (executor, dir) = executor_in_temp_dir();
        executor.run(&graph).await.unwrap();

        let checkpoint_path = dir.path().join("checkpoint.json");
        assert!(checkpoint_path.exists());
        let checkpoint = Checkpoint::load(&checkpoint_path).unwrap();
        assert_eq!(checkpoint.current_node, "done");
        assert!(checkpoint.completed_nodes.contains(&"process".to_string()));
    }

    // Test 10: parallel fan-out dispatches real concurrent branches and joins
    #[tokio::test]
    async fn parallel_fan_out_dispatches_and_joins() {
        let graph = parse_graph(
            r#"digraph G {
                start [shape="Mdiamond"]
                fork [shape="component", llm_provider="anthropic"]
                branch_a [shape="box", prompt="A", llm_provider="anthropic"]
                branch_b [shape="box", prompt="B", llm_provider="anthropic"]
                merge [shape="tripleoctagon"]
                done [shape="Msquare"]
                start -> fork
                fork -> branch_a -> merge
                fork -> branch_b -> merge
                merge -> done
            }"#,
        );
        let (executor, dir) = executor_in_temp_dir();
        let result = executor.run(&graph).await.unwrap();

        assert!(result.completed_nodes.contains(&"branch_a".to_string()));
        assert!(result.completed_nodes.contains(&"branch_b".to_string()));
        assert!(result.completed_nodes.contains(&"merge".to_string()));
        assert!(result.completed_nodes.contains(&"done".to_string()));
        assert_eq!(
            result.final_context.get("branch_a.prompt"),
            Some(&serde_json::Value::String("A".into()))
        );
        assert_eq!(
            result.final_context.get("branch_b.prompt"),
            Some(&serde_json::Value::String("B".into()))
        );
        assert!(dir.path().join("fork_parallel_results.json").exists());
    }
}
