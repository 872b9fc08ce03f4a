use async_trait::async_trait;
use attractor_types::{Context, Outcome, Result, StageStatus};

use crate::graph::{PipelineGraph, PipelineNode};
use crate::handler::NodeHandler;

/// Handler for "parallel" type nodes (shape="component").
/// Represents a fan-out point where multiple branches can execute.
/// In the current implementation, branches are identified by outgoing edges.
pub struct ParallelHandler;

#[async_trait]
impl NodeHandler for ParallelHandler {
    fn handler_type(&self) -> &str {
        "parallel"
    }

    async fn execute(
        &self,
        node: &PipelineNode,
        _context: &Context,
        graph: &PipelineGraph,
    ) -> Result<Outcome> {
        let outgoing = graph.outgoing_edges(&node.id);
        let branch_count = outgoing.len();
        let branch_targets: Vec<String> = outgoing.iter().map(|e| e.to.clone()).collect();

        tracing::info!(
            node = %node.id,
            branches = branch_count,
            targets = ?branch_targets,
            "Parallel fan-out"
        );

        // The parallel handler itself just passes through.
        // The execution engine is responsible for actually forking execution.
        // For now, suggest the first branch and let the engine handle routing.
        Ok(Outcome {
            status: StageStatus::Success,
            preferred_label: None,
            suggested_next_ids: branch_targets,
            context_updates: std::collections::HashMap::new(),
            notes: format!("Fan-out to {} branches", branch_count),
            failure_reason: None,
        })
    }
}

/// Handler for "parallel.fan_in" type nodes (shape="tripleoctagon").
/// Collects results from parallel branches.
///
/// When the engine has populated `context["parallel.branch_outcomes"]` (a map
/// of branch id -> last-observed `StageStatus` string for that branch), the
/// join applies a simple majority quorum: at least half the branches must
/// have succeeded (or partially succeeded) for the join itself to succeed.
/// With no such key present — a fan-in reached outside of real fan-out
/// dispatch, e.g. a standalone graph fragment — it stays a pass-through, the
/// same as before.
pub struct FanInHandler;

#[async_trait]
impl NodeHandler for FanInHandler {
    fn handler_type(&self) -> &str {
        "parallel.fan_in"
    }

    async fn execute(
        &self,
        node: &PipelineNode,
        context: &Context,
        _graph: &PipelineGraph,
    ) -> Result<Outcome> {
        tracing::info!(node = %node.id, "Fan-in merge point");

        let Some(raw) = context.get("parallel.branch_outcomes").await else {
            return Ok(Outcome {
                status: StageStatus::Success,
                preferred_label: None,
                suggested_next_ids: vec![],
                context_updates: std::collections::HashMap::new(),
                notes: "Fan-in merge completed".to_string(),
                failure_reason: None,
            });
        };

        let branch_statuses: std::collections::HashMap<String, String> =
            serde_json::from_value(raw).unwrap_or_default();

        if branch_statuses.is_empty() {
            return Ok(Outcome {
                status: StageStatus::Success,
                preferred_label: None,
                suggested_next_ids: vec![],
                context_updates: std::collections::HashMap::new(),
                notes: "Fan-in merge completed".to_string(),
                failure_reason: None,
            });
        }

        let total = branch_statuses.len();
        let succeeded = branch_statuses
            .values()
            .filter(|s| s.as_str() == "success" || s.as_str() == "partial_success")
            .count();

        if succeeded * 2 >= total {
            Ok(Outcome {
                status: StageStatus::Success,
                preferred_label: None,
                suggested_next_ids: vec![],
                context_updates: std::collections::HashMap::new(),
                notes: format!("Fan-in merge completed: {}/{} branches succeeded", succeeded, total),
                failure_reason: None,
            })
        } else {
            Ok(Outcome {
                status: StageStatus::Fail,
                preferred_label: None,
                suggested_next_ids: vec![],
                context_updates: std::collections::HashMap::new(),
                notes: format!("Fan-in merge failed: {}/{} branches succeeded", succeeded, total),
                failure_reason: Some(format!(
                    "fan-in quorum not met: {}/{} branches succeeded",
                    succeeded, total
                )),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_node(id: &str, shape: &str) -> PipelineNode {
        PipelineNode {
            id: id.to_string(),
            label: id.to_string(),
            shape: shape.to_string(),
            node_type: None,
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
            codergen_mode: crate::graph::CodergenMode::OneShot,
            max_restarts: 0,
            escalation_models: Vec::new(),
            restart_signature_limit: 3,
            tool_hooks_pre: Vec::new(),
            tool_hooks_post: Vec::new(),
            raw_attrs: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn parallel_handler_returns_branch_targets() {
        let handler = ParallelHandler;
        let dot = r#"digraph G {
            fork [shape="component"]
            branch_a [shape="box"]
            branch_b [shape="box"]
            fork -> branch_a
            fork -> branch_b
        }"#;
        let parsed = attractor_dot::parse(dot).unwrap();
        let graph = PipelineGraph::from_dot(parsed).unwrap();
        let node = graph.node("fork").unwrap().clone();
        let ctx = Context::default();

        let outcome = handler.execute(&node, &ctx, &graph).await.unwrap();
        assert_eq!(outcome.status, StageStatus::Success);
        assert_eq!(outcome.suggested_next_ids.len(), 2);
        assert!(outcome.suggested_next_ids.contains(&"branch_a".to_string()));
        assert!(outcome.suggested_next_ids.contains(&"branch_b".to_string()));
        assert!(outcome.notes.contains("2 branches"));
    }

    #[tokio::test]
    async fn fan_in_handler_returns_success() {
        let handler = FanInHandler;
        let dot = r#"digraph G { A -> B }"#;
        let parsed = attractor_dot::parse(dot).unwrap();
        let graph = PipelineGraph::from_dot(parsed).unwrap();
        let node = make_node("merge", "tripleoctagon");
        let ctx = Context::default();

        let outcome = handler.execute(&node, &ctx, &graph).await.unwrap();
        assert_eq!(outcome.status, StageStatus::Success);
        assert!(outcome.suggested_next_ids.is_empty());
        assert_eq!(outcome.notes, "Fan-in merge completed");
    }

    #[tokio::test]
    async fn fan_in_succeeds_when_majority_of_branches_succeed() {
        let handler = FanInHandler;
        let dot = r#"digraph G { A -> B }"#;
        let graph = PipelineGraph::from_dot(attractor_dot::parse(dot).unwrap()).unwrap();
        let node = make_node("merge", "tripleoctagon");
        let ctx = Context::default();
        ctx.set(
            "parallel.branch_outcomes",
            serde_json::json!({"branch_a": "success", "branch_b": "fail"}),
        )
        .await;

        let outcome = handler.execute(&node, &ctx, &graph).await.unwrap();
        assert_eq!(outcome.status, StageStatus::Success);
    }

    #[tokio::test]
    async fn fan_in_fails_when_majority_of_branches_fail() {
        let handler = FanInHandler;
        let dot = r#"digraph G { A -> B }"#;
        let graph = PipelineGraph::from_dot(attractor_dot::parse(dot).unwrap()).unwrap();
        let node = make_node("merge", "tripleoctagon");
        let ctx = Context::default();
        ctx.set(
            "parallel.branch_outcomes",
            serde_json::json!({"branch_a": "fail", "branch_b": "fail", "branch_c": "success"}),
        )
        .await;

        let outcome = handler.execute(&node, &ctx, &graph).await.unwrap();
        assert_eq!(outcome.status, StageStatus::Fail);
        assert!(outcome.failure_reason.is_some());
    }
}
