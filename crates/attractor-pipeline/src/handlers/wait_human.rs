//! WaitHumanHandler — pauses pipeline execution for human input.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use attractor_types::{Context, Outcome, Result, StageStatus};

use crate::graph::{PipelineGraph, PipelineNode};
use crate::handler::NodeHandler;
use crate::interviewer::{Interviewer, Question};

pub struct WaitHumanHandler {
    interviewer: Arc<dyn Interviewer>,
}

impl WaitHumanHandler {
    pub fn new(interviewer: Arc<dyn Interviewer>) -> Self {
        Self { interviewer }
    }
}

#[async_trait]
impl NodeHandler for WaitHumanHandler {
    fn handler_type(&self) -> &str {
        "wait.human"
    }

    async fn execute(
        &self,
        node: &PipelineNode,
        _ctx: &Context,
        graph: &PipelineGraph,
    ) -> Result<Outcome> {
        let edges = graph.outgoing_edges(&node.id);
        let choices: Vec<String> = edges.iter().filter_map(|e| e.label.clone()).collect();

        let prompt = node
            .prompt
            .clone()
            .unwrap_or_else(|| node.label.clone());

        let question = Question {
            prompt,
            choices: if choices.is_empty() {
                vec!["Continue".into()]
            } else {
                choices
            },
            default: None,
            timeout: node.timeout,
        };

        let answer = self.interviewer.ask(&question).await?;

        Ok(Outcome {
            status: StageStatus::Success,
            preferred_label: Some(answer.choice),
            suggested_next_ids: vec![],
            context_updates: HashMap::new(),
            notes: "Human responded".into(),
            failure_reason: None,
        })
    }
}
