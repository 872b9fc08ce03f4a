//! Crash recovery: rehydrate a `Context`, graph, and run config from a
//! checkpoint written by a previous, interrupted run, so execution can
//! continue from `checkpoint.current_node` instead of restarting.

use std::path::Path;

use attractor_types::{AttractorError, Checkpoint, Context, Result};

use crate::config::RunConfig;
use crate::cxdb::CxdbSink;
use crate::graph::PipelineGraph;

/// Everything the scheduler needs to pick back up where a prior run left
/// off.
pub struct RunState {
    pub checkpoint: Checkpoint,
    pub graph: PipelineGraph,
    pub run_config: RunConfig,
    pub context: Context,
    pub current_node_id: String,
}

/// Reads `{logs_root}/checkpoint.json` and `{logs_root}/run_config.json`,
/// re-parses the original `.dot` file referenced by the run config, and
/// rebuilds a `Context` from the checkpoint's `context_values`/`logs`.
pub async fn resume(logs_root: &Path) -> Result<RunState> {
    resume_with_cxdb(logs_root, &crate::cxdb::NullCxdbSink).await
}

/// Same as [`resume`], but also reattaches to `sink`'s context head for this
/// run (if one was ever recorded) before the checkpoint's own
/// `context_values` are applied on top. The checkpoint stays authoritative
/// for anything it recorded; the CXDB head only fills in values the
/// checkpoint itself never captured.
pub async fn resume_with_cxdb(logs_root: &Path, sink: &dyn CxdbSink) -> Result<RunState> {
    let checkpoint_path = logs_root.join("checkpoint.json");
    let checkpoint = Checkpoint::load(&checkpoint_path)?;
    let run_config = RunConfig::read(logs_root)?;

    let dot_source = std::fs::read_to_string(&run_config.pipeline_path).map_err(AttractorError::Io)?;
    let parsed = attractor_dot::parse(&dot_source)?;
    let mut graph = PipelineGraph::from_dot(parsed)?;
    crate::transforms::apply_transforms(&mut graph)?;

    if graph.node(&checkpoint.current_node).is_none() {
        return Err(AttractorError::Other(format!(
            "checkpoint current_node '{}' not found in resumed graph",
            checkpoint.current_node
        )));
    }

    let context = Context::new();
    if let Some(head) = sink.fork_from_head(&checkpoint.run_id).await? {
        context.apply_updates(head).await;
    }
    context.apply_updates(checkpoint.context_values.clone()).await;
    for entry in &checkpoint.logs {
        context.append_log(entry.clone()).await;
    }

    let artifact_policy = crate::artifact_policy::resolve_or_restore(
        Some(&checkpoint),
        &run_config.artifact_profiles,
        logs_root,
    )?;
    context
        .set(
            "artifact_policy",
            crate::artifact_policy::to_checkpoint_envelope(&artifact_policy),
        )
        .await;

    let current_node_id = checkpoint.current_node.clone();

    Ok(RunState {
        checkpoint,
        graph,
        run_config,
        context,
        current_node_id,
    })
}
