use async_trait::async_trait;
use attractor_types::{Context, Outcome, Result, StageStatus};

use crate::codergen_backend::CodergenBackend;
use crate::graph::{CodergenMode, PipelineGraph, PipelineNode};
use crate::handler::NodeHandler;

use std::sync::Arc;

// ---------------------------------------------------------------------------
// CodergenHandler — builds the stage prompt and drives a CodergenBackend
// ---------------------------------------------------------------------------

/// Runs a box/cds/component/note-shaped node through a [`CodergenBackend`].
/// The handler's own job ends at prompt assembly and outcome mapping; stage
/// directory layout, attempt archival, and status-file harvesting belong to
/// the stage runtime that wraps handler execution.
pub struct CodergenHandler {
    backend: Arc<dyn CodergenBackend>,
}

impl CodergenHandler {
    pub fn new(backend: Arc<dyn CodergenBackend>) -> Self {
        Self { backend }
    }

    /// A deterministic stub backend that never leaves the process: useful
    /// for exercising graph traversal, routing, and goal gates without a
    /// configured provider.
    pub fn stub() -> Self {
        Self::new(Arc::new(StubBackend))
    }

    /// Prefixes the node's prompt with the failure-dossier and
    /// input-manifest preambles when the context carries them from a prior
    /// attempt or a prior materialization pass.
    async fn build_prompt(&self, node: &PipelineNode, ctx: &Context) -> String {
        let mut sections = Vec::new();

        if let Some(dossier) = ctx.get("failure_dossier").await {
            sections.push(format!(
                "# Prior failure\n\n{}\n",
                serde_json::to_string_pretty(&dossier).unwrap_or_default()
            ));
        }
        if let Some(manifest) = ctx.get("input_manifest").await {
            sections.push(format!(
                "# Input manifest\n\n{}\n",
                serde_json::to_string_pretty(&manifest).unwrap_or_default()
            ));
        }

        sections.push(node.prompt.clone().unwrap_or_else(|| node.label.clone()));
        sections.join("\n")
    }
}

#[async_trait]
impl NodeHandler for CodergenHandler {
    fn handler_type(&self) -> &str {
        "codergen"
    }

    fn requires_provider(&self) -> bool {
        true
    }

    async fn execute(
        &self,
        node: &PipelineNode,
        context: &Context,
        _graph: &PipelineGraph,
    ) -> Result<Outcome> {
        let prompt = self.build_prompt(node, context).await;

        tracing::info!(
            node = %node.id,
            mode = ?node.codergen_mode,
            "Dispatching codergen node"
        );

        let (response_text, parsed_outcome) = self.backend.run(node, &prompt).await?;

        if let Some(outcome) = parsed_outcome {
            return Ok(outcome);
        }

        Ok(Outcome {
            status: StageStatus::Success,
            preferred_label: None,
            suggested_next_ids: Vec::new(),
            context_updates: std::collections::HashMap::new(),
            notes: response_text,
            failure_reason: None,
        })
    }
}

/// Backend used by [`CodergenHandler::stub`]. Echoes the prompt back as the
/// response text and always reports success — no network I/O, no API keys.
struct StubBackend;

#[async_trait]
impl CodergenBackend for StubBackend {
    async fn run(&self, node: &PipelineNode, prompt: &str) -> Result<(String, Option<Outcome>)> {
        let _ = prompt;
        Ok((format!("stub response for {}", node.id), None))
    }
}
