//! CLI binary for running and validating Attractor pipelines.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "attractor", version, about = "DOT-based pipeline runner for AI workflows")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline from a .dot file
    Run {
        /// Path to the pipeline .dot file
        pipeline: PathBuf,

        /// Working directory for tool execution
        #[arg(short, long)]
        workdir: Option<PathBuf>,

        /// Logs output directory
        #[arg(short, long, default_value = ".attractor/logs")]
        logs: PathBuf,

        /// Don't actually call LLMs (dry run)
        #[arg(long)]
        dry_run: bool,

        /// Maximum total spend across all nodes (USD). Pipeline aborts if exceeded.
        #[arg(long)]
        max_budget_usd: Option<f64>,

        /// Maximum number of node executions before aborting. Prevents runaway loops. Default: 200.
        #[arg(long, default_value = "200")]
        max_steps: u64,

        /// Artifact policy profile(s) to resolve for this run
        #[arg(long = "artifact-profile")]
        artifact_profiles: Vec<String>,
    },

    /// Resume a previously checkpointed run from its logs directory
    Resume {
        /// Logs directory containing checkpoint.json and run_config.json
        #[arg(short, long, default_value = ".attractor/logs")]
        logs: PathBuf,
    },

    /// Validate a pipeline .dot file
    Validate {
        /// Path to the pipeline .dot file
        pipeline: PathBuf,
    },

    /// Show information about a pipeline
    Info {
        /// Path to the pipeline .dot file
        pipeline: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    match cli.command {
        Commands::Run {
            pipeline,
            workdir,
            logs,
            dry_run,
            max_budget_usd,
            max_steps,
            artifact_profiles,
        } => {
            cmd_run(
                &pipeline,
                workdir.as_deref(),
                &logs,
                dry_run,
                max_budget_usd,
                max_steps,
                artifact_profiles,
            )
            .await?;
        }
        Commands::Resume { logs } => {
            cmd_resume(&logs).await?;
        }
        Commands::Validate { pipeline } => {
            cmd_validate(&pipeline)?;
        }
        Commands::Info { pipeline } => {
            cmd_info(&pipeline)?;
        }
    }

    Ok(())
}

fn load_pipeline(path: &std::path::Path) -> anyhow::Result<attractor_pipeline::PipelineGraph> {
    let source = std::fs::read_to_string(path)?;
    let dot = attractor_dot::parse(&source)?;
    let mut graph = attractor_pipeline::PipelineGraph::from_dot(dot)?;
    attractor_pipeline::apply_transforms(&mut graph)?;
    Ok(graph)
}

fn cmd_validate(path: &std::path::Path) -> anyhow::Result<()> {
    let graph = load_pipeline(path)?;
    let registry = attractor_pipeline::default_registry();
    let catalog = attractor_llm::ModelCatalog::new();
    let diagnostics = attractor_pipeline::validate_with_catalog(&graph, &registry, &catalog);

    if diagnostics.is_empty() {
        println!("Pipeline is valid");
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            attractor_pipeline::Severity::Error => {
                has_error = true;
                "ERROR"
            }
            attractor_pipeline::Severity::Warning => "WARN",
            attractor_pipeline::Severity::Info => "INFO",
        };
        println!("[{}] {}: {}", severity, diag.rule, diag.message);
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_info(path: &std::path::Path) -> anyhow::Result<()> {
    let graph = load_pipeline(path)?;

    println!("Pipeline: {}", graph.name);
    if !graph.goal.is_empty() {
        println!("Goal: {}", graph.goal);
    }

    let node_count = graph.all_nodes().count();
    let edge_count = graph.all_edges().len();
    println!("Nodes: {}", node_count);
    println!("Edges: {}", edge_count);

    if let Some(start) = graph.start_node() {
        println!("Start: {} ({})", start.id, start.label);
    }
    if let Some(exit) = graph.exit_node() {
        println!("Exit: {} ({})", exit.id, exit.label);
    }

    // List nodes with their types
    println!("\nNodes:");
    for node in graph.all_nodes() {
        let node_type = node.node_type.as_deref().unwrap_or("(default)");
        println!(
            "  {} [{}] shape={} type={}",
            node.id, node.label, node.shape, node_type
        );
    }

    Ok(())
}

fn print_run_summary(result: &attractor_pipeline::PipelineResult) {
    println!("\nPipeline completed");
    println!("Completed nodes: {:?}", result.completed_nodes);

    let total_cost: f64 = result
        .final_context
        .iter()
        .filter(|(k, _)| k.ends_with(".cost_usd"))
        .filter_map(|(_, v)| v.as_f64())
        .sum();
    if total_cost > 0.0 {
        println!("Total cost: ${:.4}", total_cost);
    }
}

async fn cmd_run(
    path: &std::path::Path,
    workdir: Option<&std::path::Path>,
    logs: &std::path::Path,
    dry_run: bool,
    max_budget_usd: Option<f64>,
    max_steps: u64,
    artifact_profiles: Vec<String>,
) -> anyhow::Result<()> {
    let graph = load_pipeline(path)?;

    println!("Running pipeline: {}", graph.name);
    if !graph.goal.is_empty() {
        println!("Goal: {}", graph.goal);
    }
    if dry_run {
        println!("(dry run mode -- no LLM calls)");
    }

    std::fs::create_dir_all(logs)?;

    let mut run_config = attractor_pipeline::RunConfig::new(path.to_path_buf(), logs.to_path_buf());
    run_config.workdir = workdir.map(|w| w.to_path_buf());
    run_config.dry_run = dry_run;
    run_config.max_budget_usd = max_budget_usd;
    run_config.max_steps = max_steps;
    run_config.artifact_profiles = artifact_profiles.clone();
    run_config.write()?;

    let artifact_policy = attractor_pipeline::resolve_artifact_policy(&artifact_profiles, logs);

    // Set up the pipeline context with workdir
    let context = attractor_types::Context::new();
    if let Some(dir) = workdir {
        let abs = std::fs::canonicalize(dir)?;
        context
            .set(
                "workdir",
                serde_json::Value::String(abs.to_string_lossy().into_owned()),
            )
            .await;
        println!("Working directory: {}", abs.display());
    }
    if dry_run {
        context
            .set("dry_run", serde_json::Value::Bool(true))
            .await;
    }

    // Safety limits
    if let Some(budget) = max_budget_usd {
        context
            .set("max_budget_usd", serde_json::json!(budget))
            .await;
        println!("Budget limit: ${:.2}", budget);
    }
    context
        .set("max_steps", serde_json::json!(max_steps))
        .await;
    println!("Step limit: {}", max_steps);
    context
        .set("artifact_policy", attractor_pipeline::to_checkpoint_envelope(&artifact_policy))
        .await;

    if let Some(pipeline_dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let closure_cfg = attractor_pipeline::ClosureConfig {
            include: Vec::new(),
            default_include: vec!["*.md".to_string()],
            source_roots: vec![pipeline_dir.to_path_buf()],
        };
        let snapshot_root = logs.join("input_closure");
        let scanner = attractor_pipeline::DefaultReferenceScanner::default();
        if let Ok(manifest) =
            attractor_pipeline::materialize_input_closure(&closure_cfg, &snapshot_root, &snapshot_root, &scanner)
        {
            context.set("input_manifest", serde_json::to_value(&manifest)?).await;
        }
    }

    let preflight_registry = attractor_pipeline::default_registry();
    let report = attractor_pipeline::run_preflight(&graph, &preflight_registry, workdir.unwrap_or_else(|| std::path::Path::new(".")), logs)?;
    if !report.is_clean() {
        for finding in &report.findings {
            println!("[preflight] {:?}: {}", finding.severity, finding.message);
        }
        anyhow::bail!("Preflight checks failed");
    }

    let interviewer = std::sync::Arc::new(attractor_pipeline::ConsoleInterviewer);
    let registry = build_registry(interviewer, dry_run);
    let executor = attractor_pipeline::PipelineExecutor::new(registry).with_logs_root(logs.to_path_buf());
    let result = executor.run_with_context(&graph, context).await?;

    print_run_summary(&result);
    Ok(())
}

/// Builds the handler registry for a real run. Dry runs keep the no-op
/// codergen stub (so `--dry-run` never costs a token); otherwise codergen
/// nodes dispatch through a real `LlmCodergenBackend`.
fn build_registry(
    interviewer: std::sync::Arc<dyn attractor_pipeline::Interviewer>,
    dry_run: bool,
) -> attractor_pipeline::HandlerRegistry {
    if dry_run {
        attractor_pipeline::default_registry_with_interviewer(interviewer)
    } else {
        let backend = std::sync::Arc::new(attractor_pipeline::LlmCodergenBackend::new(
            attractor_llm::LlmClient::new(),
        ));
        let mut registry = attractor_pipeline::default_registry_with_backend(backend);
        registry.register(attractor_pipeline::WaitHumanHandler::new(interviewer));
        registry
    }
}

async fn cmd_resume(logs: &std::path::Path) -> anyhow::Result<()> {
    println!("Resuming run from {}", logs.display());
    let state = attractor_pipeline::resume_run_state(logs).await?;
    println!("Resuming at node: {}", state.current_node_id);

    let dry_run = state.run_config.dry_run;
    let interviewer = std::sync::Arc::new(attractor_pipeline::ConsoleInterviewer);
    let registry = build_registry(interviewer, dry_run);
    let executor = attractor_pipeline::PipelineExecutor::new(registry).with_logs_root(logs.to_path_buf());
    let result = executor.resume_run(state).await?;

    print_run_summary(&result);
    Ok(())
}
