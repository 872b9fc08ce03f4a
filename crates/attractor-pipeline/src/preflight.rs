//! Preflight checks: catch a misconfigured run before it burns a node
//! attempt on something that was never going to work — a dirty working
//! tree, a codergen node with no provider, an unwritable logs root.

use std::path::Path;

use serde::{Deserialize, Serialize};

use attractor_types::Result;

use crate::graph::PipelineGraph;
use crate::handler::HandlerRegistry;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PreflightSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightFinding {
    pub severity: PreflightSeverity,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PreflightReport {
    pub findings: Vec<PreflightFinding>,
}

impl PreflightReport {
    pub fn is_clean(&self) -> bool {
        !self
            .findings
            .iter()
            .any(|f| f.severity == PreflightSeverity::Error)
    }

    fn push_error(&mut self, message: impl Into<String>) {
        self.findings.push(PreflightFinding {
            severity: PreflightSeverity::Error,
            message: message.into(),
        });
    }

    fn push_warning(&mut self, message: impl Into<String>) {
        self.findings.push(PreflightFinding {
            severity: PreflightSeverity::Warning,
            message: message.into(),
        });
    }

    /// Persist the report to `{logs_root}/preflight_report.json`.
    pub fn write(&self, logs_root: &Path) -> Result<std::path::PathBuf> {
        std::fs::create_dir_all(logs_root)?;
        let path = logs_root.join("preflight_report.json");
        std::fs::write(&path, serde_json::to_string_pretty(self)?)?;
        Ok(path)
    }
}

/// Run every preflight check against `graph`/`registry`/`workdir`, returning
/// a report rather than erroring directly so the CLI can decide whether to
/// abort or proceed past warnings.
pub fn run_preflight(
    graph: &PipelineGraph,
    registry: &HandlerRegistry,
    workdir: &Path,
    logs_root: &Path,
) -> Result<PreflightReport> {
    let mut report = PreflightReport::default();

    check_working_tree(workdir, &mut report);
    check_provider_config(graph, registry, &mut report);
    check_logs_writable(logs_root, &mut report);

    Ok(report)
}

fn check_working_tree(workdir: &Path, report: &mut PreflightReport) {
    if !workdir.exists() {
        report.push_error(format!("workdir {} does not exist", workdir.display()));
        return;
    }
    let git_dir = workdir.join(".git");
    if !git_dir.exists() {
        report.push_warning(format!(
            "workdir {} is not a git repository; artifact snapshots will be best-effort",
            workdir.display()
        ));
        return;
    }
    let status = std::process::Command::new("git")
        .arg("-C")
        .arg(workdir)
        .args(["status", "--porcelain"])
        .output();
    match status {
        Ok(out) if out.status.success() && !out.stdout.is_empty() => {
            report.push_warning("workdir has uncommitted changes before the run started".to_string());
        }
        Ok(out) if !out.status.success() => {
            report.push_warning("failed to read git status for workdir".to_string());
        }
        Err(e) => report.push_warning(format!("failed to invoke git: {}", e)),
        _ => {}
    }
}

fn check_provider_config(graph: &PipelineGraph, registry: &HandlerRegistry, report: &mut PreflightReport) {
    for node in graph.all_nodes() {
        let handler_type = registry.resolve_type(node);
        let Some(handler) = registry.get(&handler_type) else {
            report.push_error(format!(
                "node {} resolves to unregistered handler type '{}'",
                node.id, handler_type
            ));
            continue;
        };
        if !handler.requires_provider() {
            continue;
        }
        if node.llm_model.is_none() {
            report.push_error(format!(
                "node {} uses a provider-backed handler but has no llm_model configured",
                node.id
            ));
        }
    }
}

fn check_logs_writable(logs_root: &Path, report: &mut PreflightReport) {
    if let Err(e) = std::fs::create_dir_all(logs_root) {
        report.push_error(format!(
            "logs_root {} is not writable: {}",
            logs_root.display(),
            e
        ));
        return;
    }
    let probe = logs_root.join(".preflight_write_probe");
    if let Err(e) = std::fs::write(&probe, b"ok") {
        report.push_error(format!(
            "logs_root {} rejected a test write: {}",
            logs_root.display(),
            e
        ));
        return;
    }
    let _ = std::fs::remove_file(&probe);
}
