//! The `CodergenBackend` boundary: the entire LLM abstraction the codergen
//! handler depends on. Provider/CLI/API fan-out, session events, and tool-call
//! turns all live behind this trait — the handler only sees response text and
//! an optional pre-parsed [`Outcome`].

use async_trait::async_trait;
use attractor_llm::{LlmClient, Message, Request};
use attractor_types::{AttractorError, Outcome, Result};

use crate::graph::PipelineNode;

/// One invocation of an LLM-backed stage. Implementations may run a single
/// request/response round (`one_shot`) or drive a full tool-call loop
/// (`agent_loop`); either way they return the raw response text plus an
/// optional `Outcome` when the backend itself already parsed a status
/// contract (e.g. an agent loop that read `status.json` mid-session).
#[async_trait]
pub trait CodergenBackend: Send + Sync {
    async fn run(&self, node: &PipelineNode, prompt: &str) -> Result<(String, Option<Outcome>)>;
}

/// Default backend: a single `LlmClient::complete` call per invocation,
/// regardless of `codergen_mode` — the agent-loop variant of this backend is
/// `attractor_agent::AgentSession`-backed and selected by the handler when
/// `codergen_mode=agent_loop`, not by this type.
pub struct LlmCodergenBackend {
    client: LlmClient,
}

impl LlmCodergenBackend {
    pub fn new(client: LlmClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CodergenBackend for LlmCodergenBackend {
    async fn run(&self, node: &PipelineNode, prompt: &str) -> Result<(String, Option<Outcome>)> {
        let model = node
            .llm_model
            .clone()
            .ok_or_else(|| AttractorError::HandlerError {
                handler: "codergen".into(),
                node: node.id.clone(),
                message: "Missing llm_model for codergen node".into(),
            })?;

        let request = Request {
            model,
            messages: vec![Message::user(prompt)],
            tools: Vec::new(),
            tool_choice: None,
            max_tokens: None,
            temperature: None,
            stop_sequences: Vec::new(),
            reasoning_effort: None,
            provider: node.llm_provider.clone(),
            provider_options: None,
        };

        let response = self.client.complete(&request).await?;
        Ok((response.text, None))
    }
}
