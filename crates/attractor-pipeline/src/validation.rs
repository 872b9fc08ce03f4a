//! Pipeline validation: lint rules and diagnostics.
//!
//! Provides 11 built-in rules that check structural and semantic correctness of
//! a [`PipelineGraph`].  Call [`validate`] for advisory diagnostics or
//! [`validate_or_raise`] to fail on the first `Error`-severity issue.

use std::collections::{HashSet, VecDeque};

use attractor_llm::ModelCatalog;

use crate::graph::PipelineGraph;
use crate::parse_condition;
use crate::stylesheet::parse_stylesheet;

// ---------------------------------------------------------------------------
// Diagnostic types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub rule: String,
    pub severity: Severity,
    pub message: String,
    pub node_id: Option<String>,
    pub edge: Option<(String, String)>,
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

// ---------------------------------------------------------------------------
// LintRule trait
// ---------------------------------------------------------------------------

pub trait LintRule: Send + Sync {
    fn name(&self) -> &str;
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic>;
}

// ---------------------------------------------------------------------------
// Helper predicates
// ---------------------------------------------------------------------------

fn is_start_node(id: &str, shape: &str) -> bool {
    shape == "Mdiamond" || id == "start" || id == "Start"
}

fn is_terminal_node(id: &str, shape: &str) -> bool {
    shape == "Msquare" || id == "exit" || id == "end" || id == "done"
}

const VALID_FIDELITY_PREFIXES: &[&str] = &["full", "truncate", "compact", "summary"];

fn is_valid_fidelity(val: &str) -> bool {
    let val = val.trim();
    if val.is_empty() {
        return false;
    }
    // "summary:low", "summary:medium", etc. or bare prefix
    if let Some((prefix, _suffix)) = val.split_once(':') {
        VALID_FIDELITY_PREFIXES.contains(&prefix)
    } else {
        VALID_FIDELITY_PREFIXES.contains(&val)
    }
}

fn is_llm_node(shape: &str) -> bool {
    matches!(shape, "box" | "cds" | "component" | "note")
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

struct StartNodeRule;
impl LintRule for StartNodeRule {
    fn name(&self) -> &str { "start_node" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        let starts: Vec<_> = graph
            .all_nodes()
            .filter(|n| is_start_node(&n.id, &n.shape))
            .collect();
        if starts.is_empty() {
            vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: "Pipeline has no start node (shape=Mdiamond or id start/Start)".into(),
                node_id: None,
                edge: None,
                fix: Some("Add a node with shape=\"Mdiamond\" or id=\"start\"".into()),
            }]
        } else if starts.len() > 1 {
            vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!(
                    "Pipeline has {} start nodes: {}; expected exactly one",
                    starts.len(),
                    starts.iter().map(|n| n.id.as_str()).collect::<Vec<_>>().join(", ")
                ),
                node_id: None,
                edge: None,
                fix: Some("Remove extra start nodes so only one remains".into()),
            }]
        } else {
            vec![]
        }
    }
}

struct TerminalNodeRule;
impl LintRule for TerminalNodeRule {
    fn name(&self) -> &str { "terminal_node" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        let has_terminal = graph
            .all_nodes()
            .any(|n| is_terminal_node(&n.id, &n.shape));
        if !has_terminal {
            vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: "Pipeline has no terminal node (shape=Msquare or id exit/end/done)".into(),
                node_id: None,
                edge: None,
                fix: Some("Add a node with shape=\"Msquare\" or id=\"done\"".into()),
            }]
        } else {
            vec![]
        }
    }
}

struct ReachabilityRule;
impl LintRule for ReachabilityRule {
    fn name(&self) -> &str { "reachability" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        let start = graph.start_node();
        let start_id = match start {
            Some(n) => n.id.clone(),
            None => return vec![], // StartNodeRule will catch this
        };

        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        visited.insert(start_id.clone());
        queue.push_back(start_id);

        while let Some(current) = queue.pop_front() {
            for edge in graph.outgoing_edges(&current) {
                if visited.insert(edge.to.clone()) {
                    queue.push_back(edge.to.clone());
                }
            }
        }

        let all_ids: HashSet<_> = graph.all_nodes().map(|n| n.id.clone()).collect();
        let unreachable: Vec<_> = all_ids.difference(&visited).collect();

        unreachable
            .into_iter()
            .map(|id| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("Node '{id}' is not reachable from the start node"),
                node_id: Some(id.clone()),
                edge: None,
                fix: Some(format!("Add an edge leading to '{id}' or remove it")),
            })
            .collect()
    }
}

struct EdgeTargetExistsRule;
impl LintRule for EdgeTargetExistsRule {
    fn name(&self) -> &str { "edge_target_exists" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        graph
            .all_edges()
            .iter()
            .filter(|e| graph.node(&e.to).is_none())
            .map(|e| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("Edge {} -> {} references non-existent target '{}'", e.from, e.to, e.to),
                node_id: None,
                edge: Some((e.from.clone(), e.to.clone())),
                fix: Some(format!("Add node '{}' or fix the edge target", e.to)),
            })
            .collect()
    }
}

struct StartNoIncomingRule;
impl LintRule for StartNoIncomingRule {
    fn name(&self) -> &str { "start_no_incoming" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        let start = match graph.start_node() {
            Some(n) => n.id.clone(),
            None => return vec![],
        };
        let has_incoming = graph.all_edges().iter().any(|e| e.to == start);
        if has_incoming {
            vec![Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("Start node '{start}' has incoming edges"),
                node_id: Some(start),
                edge: None,
                fix: Some("Remove edges pointing to the start node".into()),
            }]
        } else {
            vec![]
        }
    }
}

struct ExitNoOutgoingRule;
impl LintRule for ExitNoOutgoingRule {
    fn name(&self) -> &str { "exit_no_outgoing" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        graph
            .all_nodes()
            .filter(|n| is_terminal_node(&n.id, &n.shape))
            .filter(|n| !graph.outgoing_edges(&n.id).is_empty())
            .map(|n| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("Terminal node '{}' has outgoing edges", n.id),
                node_id: Some(n.id.clone()),
                edge: None,
                fix: Some(format!("Remove outgoing edges from '{}'", n.id)),
            })
            .collect()
    }
}

struct ConditionSyntaxRule;
impl LintRule for ConditionSyntaxRule {
    fn name(&self) -> &str { "condition_syntax" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        graph
            .all_edges()
            .iter()
            .filter_map(|e| {
                let cond = e.condition.as_deref()?;
                match parse_condition(cond) {
                    Ok(_) => None,
                    Err(err) => Some(Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Error,
                        message: format!(
                            "Edge {} -> {} has invalid condition '{}': {}",
                            e.from, e.to, cond, err
                        ),
                        node_id: None,
                        edge: Some((e.from.clone(), e.to.clone())),
                        fix: Some("Fix the condition expression syntax".into()),
                    }),
                }
            })
            .collect()
    }
}

struct FidelityValidRule;
impl LintRule for FidelityValidRule {
    fn name(&self) -> &str { "fidelity_valid" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for node in graph.all_nodes() {
            if let Some(ref f) = node.fidelity {
                if !is_valid_fidelity(f) {
                    diags.push(Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Warning,
                        message: format!(
                            "Node '{}' has invalid fidelity value '{f}'",
                            node.id
                        ),
                        node_id: Some(node.id.clone()),
                        edge: None,
                        fix: Some("Use one of: full, truncate, compact, summary, summary:<level>".into()),
                    });
                }
            }
        }
        for edge in graph.all_edges() {
            if let Some(ref f) = edge.fidelity {
                if !is_valid_fidelity(f) {
                    diags.push(Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Warning,
                        message: format!(
                            "Edge {} -> {} has invalid fidelity value '{f}'",
                            edge.from, edge.to
                        ),
                        node_id: None,
                        edge: Some((edge.from.clone(), edge.to.clone())),
                        fix: Some("Use one of: full, truncate, compact, summary, summary:<level>".into()),
                    });
                }
            }
        }
        diags
    }
}

struct RetryTargetExistsRule;
impl LintRule for RetryTargetExistsRule {
    fn name(&self) -> &str { "retry_target_exists" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for node in graph.all_nodes() {
            if let Some(ref target) = node.retry_target {
                if graph.node(target).is_none() {
                    diags.push(Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Warning,
                        message: format!(
                            "Node '{}' has retry_target '{}' which does not exist",
                            node.id, target
                        ),
                        node_id: Some(node.id.clone()),
                        edge: None,
                        fix: Some(format!("Add node '{target}' or fix retry_target")),
                    });
                }
            }
            if let Some(ref target) = node.fallback_retry_target {
                if graph.node(target).is_none() {
                    diags.push(Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Warning,
                        message: format!(
                            "Node '{}' has fallback_retry_target '{}' which does not exist",
                            node.id, target
                        ),
                        node_id: Some(node.id.clone()),
                        edge: None,
                        fix: Some(format!("Add node '{target}' or fix fallback_retry_target")),
                    });
                }
            }
        }
        diags
    }
}

struct GoalGateHasRetryRule;
impl LintRule for GoalGateHasRetryRule {
    fn name(&self) -> &str { "goal_gate_has_retry" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        graph
            .all_nodes()
            .filter(|n| n.goal_gate && n.retry_target.is_none())
            .map(|n| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!(
                    "Node '{}' has goal_gate=true but no retry_target",
                    n.id
                ),
                node_id: Some(n.id.clone()),
                edge: None,
                fix: Some("Add a retry_target attribute so the goal gate can retry".into()),
            })
            .collect()
    }
}

struct AllConditionalEdgesRule;
impl LintRule for AllConditionalEdgesRule {
    fn name(&self) -> &str { "all_conditional_edges" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        graph
            .all_nodes()
            .filter(|n| !is_terminal_node(&n.id, &n.shape))
            .filter(|n| {
                let edges = graph.outgoing_edges(&n.id);
                !edges.is_empty() && edges.iter().all(|e| e.condition.is_some())
            })
            .map(|n| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!(
                    "Node '{}' has only conditional outgoing edges and no unconditional fallback",
                    n.id
                ),
                node_id: Some(n.id.clone()),
                edge: None,
                fix: Some("Add at least one unconditional outgoing edge".into()),
            })
            .collect()
    }
}

struct LlmProviderRequiredRule;
impl LintRule for LlmProviderRequiredRule {
    fn name(&self) -> &str { "llm_provider_required" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        graph
            .all_nodes()
            .filter(|n| is_llm_node(&n.shape) && n.node_type.as_deref() != Some("tool"))
            .filter(|n| n.llm_provider.is_none())
            .map(|n| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("Codergen node '{}' is missing llm_provider", n.id),
                node_id: Some(n.id.clone()),
                edge: None,
                fix: Some("Set llm_provider on the node or via the model stylesheet".into()),
            })
            .collect()
    }
}

struct ToolCommandRequiredRule;
impl LintRule for ToolCommandRequiredRule {
    fn name(&self) -> &str { "tool_command_required" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        graph
            .all_nodes()
            .filter(|n| n.node_type.as_deref() == Some("tool") || n.shape == "parallelogram")
            .filter(|n| !n.raw_attrs.contains_key("tool_command"))
            .map(|n| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!("Tool node '{}' is missing tool_command", n.id),
                node_id: Some(n.id.clone()),
                edge: None,
                fix: Some("Set the tool_command attribute".into()),
            })
            .collect()
    }
}

struct StatusContractInPromptRule;
impl LintRule for StatusContractInPromptRule {
    fn name(&self) -> &str { "status_contract_in_prompt" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        graph
            .all_nodes()
            .filter(|n| is_llm_node(&n.shape) && !n.auto_status)
            .filter(|n| {
                !n.prompt
                    .as_deref()
                    .is_some_and(|p| p.contains("KILROY_STAGE_STATUS_PATH"))
            })
            .map(|n| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!(
                    "Node '{}' has auto_status=false but its prompt doesn't reference KILROY_STAGE_STATUS_PATH",
                    n.id
                ),
                node_id: Some(n.id.clone()),
                edge: None,
                fix: Some("Reference $KILROY_STAGE_STATUS_PATH in the prompt or set auto_status=true".into()),
            })
            .collect()
    }
}

struct StatusFallbackInPromptRule;
impl LintRule for StatusFallbackInPromptRule {
    fn name(&self) -> &str { "status_fallback_in_prompt" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        graph
            .all_nodes()
            .filter(|n| is_llm_node(&n.shape) && !n.auto_status)
            .filter(|n| {
                !n.prompt
                    .as_deref()
                    .is_some_and(|p| p.contains("KILROY_STAGE_STATUS_FALLBACK_PATH"))
            })
            .map(|n| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!(
                    "Node '{}' has auto_status=false but its prompt doesn't reference KILROY_STAGE_STATUS_FALLBACK_PATH",
                    n.id
                ),
                node_id: Some(n.id.clone()),
                edge: None,
                fix: Some("Reference $KILROY_STAGE_STATUS_FALLBACK_PATH in the prompt or set auto_status=true".into()),
            })
            .collect()
    }
}

fn is_restart_eligible_edge(edge: &crate::graph::PipelineEdge) -> bool {
    edge.loop_restart
        || edge
            .condition
            .as_deref()
            .is_some_and(|c| c.contains("outcome") && c.contains("fail"))
}

struct LoopRestartFailureClassGuardRule;
impl LintRule for LoopRestartFailureClassGuardRule {
    fn name(&self) -> &str { "loop_restart_failure_class_guard" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        graph
            .all_edges()
            .iter()
            .filter(|e| e.loop_restart)
            .filter(|e| {
                !e.condition
                    .as_deref()
                    .is_some_and(|c| c.contains("context.failure_class=transient_infra"))
            })
            .map(|e| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!(
                    "loop_restart edge {} -> {} is not guarded by context.failure_class=transient_infra",
                    e.from, e.to
                ),
                node_id: None,
                edge: Some((e.from.clone(), e.to.clone())),
                fix: Some(
                    "Add && context.failure_class=transient_infra to the edge condition".into(),
                ),
            })
            .collect()
    }
}

struct FailLoopFailureClassGuardRule;
impl LintRule for FailLoopFailureClassGuardRule {
    fn name(&self) -> &str { "fail_loop_failure_class_guard" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        let mut diags = Vec::new();
        for edge in graph.all_edges() {
            if !is_restart_eligible_edge(edge) {
                continue;
            }
            let has_fallback = graph
                .outgoing_edges(&edge.from)
                .iter()
                .any(|e| !is_restart_eligible_edge(e));
            if !has_fallback {
                diags.push(Diagnostic {
                    rule: self.name().into(),
                    severity: Severity::Error,
                    message: format!(
                        "Node '{}' has a restart/fail-loop edge to '{}' with no deterministic fallback edge",
                        edge.from, edge.to
                    ),
                    node_id: Some(edge.from.clone()),
                    edge: Some((edge.from.clone(), edge.to.clone())),
                    fix: Some("Add a companion non-restart edge from the same source".into()),
                });
            }
        }
        diags
    }
}

struct GoalGateExitStatusContractRule;
impl LintRule for GoalGateExitStatusContractRule {
    fn name(&self) -> &str { "goal_gate_exit_status_contract" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        graph
            .all_nodes()
            .filter(|n| n.goal_gate)
            .filter(|n| {
                let edges = graph.outgoing_edges(&n.id);
                let to_terminal: Vec<_> = edges
                    .iter()
                    .filter(|e| {
                        graph
                            .node(&e.to)
                            .is_some_and(|t| is_terminal_node(&t.id, &t.shape))
                    })
                    .collect();
                to_terminal.iter().any(|e| {
                    e.condition.is_none()
                        || !e.condition.as_deref().is_some_and(|c| {
                            c.contains("outcome=success") || c.contains("outcome=partial_success")
                        })
                })
            })
            .map(|n| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!(
                    "Goal-gate node '{}' has an exit-bound edge not conditioned on a canonical success outcome",
                    n.id
                ),
                node_id: Some(n.id.clone()),
                edge: None,
                fix: Some(
                    "Condition the exit edge on outcome=success or outcome=partial_success".into(),
                ),
            })
            .collect()
    }
}

struct GoalGateMissingNodeRetryTargetRule;
impl LintRule for GoalGateMissingNodeRetryTargetRule {
    fn name(&self) -> &str { "goal_gate_missing_node_retry_target" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        graph
            .all_nodes()
            .filter(|n| n.goal_gate)
            .filter(|n| {
                n.retry_target.is_none()
                    && n.fallback_retry_target.is_none()
                    && !graph.attrs.contains_key("retry_target")
                    && !graph.attrs.contains_key("fallback_retry_target")
            })
            .map(|n| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!(
                    "Goal-gate node '{}' has no retry target at any level (node, node fallback, graph, graph fallback)",
                    n.id
                ),
                node_id: Some(n.id.clone()),
                edge: None,
                fix: Some("Add a retry_target at the node or graph level".into()),
            })
            .collect()
    }
}

struct TypeKnownRule {
    known_types: HashSet<String>,
}
impl LintRule for TypeKnownRule {
    fn name(&self) -> &str { "type_known" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        graph
            .all_nodes()
            .filter_map(|n| n.node_type.as_ref().map(|t| (n, t)))
            .filter(|(_, t)| !self.known_types.contains(t.as_str()))
            .map(|(n, t)| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!("Node '{}' has unknown type override '{}'", n.id, t),
                node_id: Some(n.id.clone()),
                edge: None,
                fix: Some("Use a registered handler type or register a custom one".into()),
            })
            .collect()
    }
}

struct PromptFileConflictRule;
impl LintRule for PromptFileConflictRule {
    fn name(&self) -> &str { "prompt_file_conflict" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        graph
            .all_nodes()
            .filter(|n| n.prompt.is_some() && n.raw_attrs.contains_key("prompt_file"))
            .map(|n| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Error,
                message: format!(
                    "Node '{}' sets both prompt/llm_prompt and prompt_file",
                    n.id
                ),
                node_id: Some(n.id.clone()),
                edge: None,
                fix: Some("Set only one of prompt/llm_prompt or prompt_file".into()),
            })
            .collect()
    }
}

struct PromptOnLlmNodesRule;
impl LintRule for PromptOnLlmNodesRule {
    fn name(&self) -> &str { "prompt_on_llm_nodes" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        graph
            .all_nodes()
            .filter(|n| is_llm_node(&n.shape))
            .filter(|n| {
                // Skip start/terminal nodes — they don't need prompts
                !is_start_node(&n.id, &n.shape) && !is_terminal_node(&n.id, &n.shape)
            })
            .filter(|n| n.prompt.is_none() && n.label == n.id)
            .map(|n| Diagnostic {
                rule: self.name().into(),
                severity: Severity::Warning,
                message: format!(
                    "Node '{}' (shape={}) has no prompt and label matches id",
                    n.id, n.shape
                ),
                node_id: Some(n.id.clone()),
                edge: None,
                fix: Some("Add a prompt or a descriptive label attribute".into()),
            })
            .collect()
    }
}

struct StylesheetUnknownModelRule<'a> {
    catalog: &'a ModelCatalog,
}
impl LintRule for StylesheetUnknownModelRule<'_> {
    fn name(&self) -> &str { "stylesheet_unknown_model" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        let Some(raw) = graph.attrs.get("model_stylesheet") else {
            return vec![];
        };
        let attractor_dot::AttributeValue::String(src) = raw else {
            return vec![];
        };
        let Ok(sheet) = parse_stylesheet(src) else {
            return vec![];
        };
        let mut diags = Vec::new();
        for rule in &sheet.rules {
            for decl in &rule.declarations {
                if decl.property != "llm_model" {
                    continue;
                }
                let provider_decl = rule
                    .declarations
                    .iter()
                    .find(|d| d.property == "llm_provider")
                    .map(|d| d.value.as_str());
                if let Some(provider) = provider_decl {
                    if !self.catalog.models_for_provider_exist(provider) {
                        continue;
                    }
                }
                if self.catalog.lookup(&decl.value).is_none() {
                    diags.push(Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Warning,
                        message: format!(
                            "model_stylesheet declares unknown model id '{}'",
                            decl.value
                        ),
                        node_id: None,
                        edge: None,
                        fix: Some("Check the model id against the model catalog".into()),
                    });
                }
            }
        }
        diags
    }
}

struct StylesheetNoncanonicalModelIdRule<'a> {
    catalog: &'a ModelCatalog,
}
impl LintRule for StylesheetNoncanonicalModelIdRule<'_> {
    fn name(&self) -> &str { "stylesheet_noncanonical_model_id" }
    fn apply(&self, graph: &PipelineGraph) -> Vec<Diagnostic> {
        let Some(raw) = graph.attrs.get("model_stylesheet") else {
            return vec![];
        };
        let attractor_dot::AttributeValue::String(src) = raw else {
            return vec![];
        };
        let Ok(sheet) = parse_stylesheet(src) else {
            return vec![];
        };
        let mut diags = Vec::new();
        for rule in &sheet.rules {
            for decl in &rule.declarations {
                if decl.property != "llm_model" {
                    continue;
                }
                if self.catalog.lookup(&decl.value).is_some() {
                    continue;
                }
                if self.catalog.canonical_id_for(&decl.value).is_some() {
                    diags.push(Diagnostic {
                        rule: self.name().into(),
                        severity: Severity::Warning,
                        message: format!(
                            "model_stylesheet uses non-canonical model id '{}'",
                            decl.value
                        ),
                        node_id: None,
                        edge: None,
                        fix: Some("Use the catalog's canonical model id casing".into()),
                    });
                }
            }
        }
        diags
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

fn base_rules(known_types: HashSet<String>) -> Vec<Box<dyn LintRule>> {
    vec![
        Box::new(StartNodeRule),
        Box::new(TerminalNodeRule),
        Box::new(ReachabilityRule),
        Box::new(EdgeTargetExistsRule),
        Box::new(StartNoIncomingRule),
        Box::new(ExitNoOutgoingRule),
        Box::new(ConditionSyntaxRule),
        Box::new(FidelityValidRule),
        Box::new(RetryTargetExistsRule),
        Box::new(GoalGateHasRetryRule),
        Box::new(PromptOnLlmNodesRule),
        Box::new(AllConditionalEdgesRule),
        Box::new(LlmProviderRequiredRule),
        Box::new(ToolCommandRequiredRule),
        Box::new(StatusContractInPromptRule),
        Box::new(StatusFallbackInPromptRule),
        Box::new(LoopRestartFailureClassGuardRule),
        Box::new(FailLoopFailureClassGuardRule),
        Box::new(GoalGateExitStatusContractRule),
        Box::new(GoalGateMissingNodeRetryTargetRule),
        Box::new(PromptFileConflictRule),
        Box::new(TypeKnownRule { known_types }),
    ]
}

/// Run all built-in lint rules and return collected diagnostics. Uses an
/// empty known-types set (so `type_known` only flags non-builtin overrides)
/// and skips the catalog-backed stylesheet rules — use
/// [`validate_with_catalog`] to include those.
pub fn validate(graph: &PipelineGraph) -> Vec<Diagnostic> {
    let rules = base_rules(crate::handler::default_registry().known_types());
    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(graph));
    }
    diagnostics
}

/// Run all built-in lint rules plus the model-catalog-backed stylesheet
/// rules, against a caller-supplied `HandlerRegistry` (for `type_known`) and
/// `ModelCatalog` (for the stylesheet rules).
pub fn validate_with_catalog(
    graph: &PipelineGraph,
    registry: &crate::handler::HandlerRegistry,
    catalog: &ModelCatalog,
) -> Vec<Diagnostic> {
    let mut rules = base_rules(registry.known_types());
    rules.push(Box::new(StylesheetUnknownModelRule { catalog }));
    rules.push(Box::new(StylesheetNoncanonicalModelIdRule { catalog }));

    let mut diagnostics = Vec::new();
    for rule in &rules {
        diagnostics.extend(rule.apply(graph));
    }
    diagnostics
}

/// Run all lint rules; return `Err` if any `Error`-severity diagnostic found.
pub fn validate_or_raise(graph: &PipelineGraph) -> attractor_types::Result<Vec<Diagnostic>> {
    let diagnostics = validate(graph);
    let errors: Vec<_> = diagnostics
        .iter()
        .filter(|d| d.severity == Severity::Error)
        .collect();
    if !errors.is_empty() {
        let messages: Vec<_> = errors.iter().map(|d| d.message.clone()).collect();
        return Err(attractor_types::AttractorError::ValidationError(
            messages.join("; "),
        ));
    }
    Ok(diagnostics)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_and_build(dot: &str) -> PipelineGraph {
        let graph = attractor_dot::parse(dot).unwrap();
        PipelineGraph::from_dot(graph).unwrap()
    }

    #[test]
    fn valid_pipeline_passes() {
        let pg = parse_and_build(r#"digraph G {
            start [shape="Mdiamond"]
            process [label="Do work", prompt="Do the thing", llm_provider="anthropic"]
            done [shape="Msquare"]
            start -> process -> done
        }"#);
        let diags = validate(&pg);
        let errors: Vec<_> = diags.iter().filter(|d| d.severity == Severity::Error).collect();
        assert!(errors.is_empty(), "Expected no errors, got: {errors:?}");
    }

    #[test]
    fn missing_start_node_error() {
        let pg = parse_and_build(r#"digraph G {
            process [label="Do work"]
            done [shape="Msquare"]
            process -> done
        }"#);
        let diags = validate(&pg);
        assert!(diags.iter().any(|d| d.rule == "start_node" && d.severity == Severity::Error));
    }

    #[test]
    fn missing_terminal_node_error() {
        let pg = parse_and_build(r#"digraph G {
            start [shape="Mdiamond"]
            process [label="Do work"]
            start -> process
        }"#);
        let diags = validate(&pg);
        assert!(diags.iter().any(|d| d.rule == "terminal_node" && d.severity == Severity::Error));
    }

    #[test]
    fn unreachable_node_error() {
        let pg = parse_and_build(r#"digraph G {
            start [shape="Mdiamond"]
            process [label="Do work"]
            orphan [label="Orphan"]
            done [shape="Msquare"]
            start -> process -> done
        }"#);
        let diags = validate(&pg);
        assert!(
            diags.iter().any(|d| d.rule == "reachability"
                && d.severity == Severity::Error
                && d.message.contains("orphan")),
            "Expected unreachable diagnostic for orphan, got: {diags:?}"
        );
    }

    #[test]
    fn edge_to_nonexistent_node_error() {
        // Build a graph where an edge target does not have a node definition.
        // DOT parser may auto-create nodes for edge endpoints, so we test via
        // the edge_target_exists rule directly on a graph with a missing target.
        // In practice the DOT parser creates implicit nodes, so we verify
        // the rule at least runs cleanly on a normal graph.
        let pg = parse_and_build(r#"digraph G {
            start [shape="Mdiamond"]
            done [shape="Msquare"]
            start -> done
        }"#);
        let rule = EdgeTargetExistsRule;
        let diags = rule.apply(&pg);
        // All targets exist — no diagnostics expected.
        assert!(diags.is_empty());
    }

    #[test]
    fn start_with_incoming_edges_error() {
        let pg = parse_and_build(r#"digraph G {
            start [shape="Mdiamond"]
            process [label="Do work"]
            done [shape="Msquare"]
            start -> process -> done
            process -> start
        }"#);
        let diags = validate(&pg);
        assert!(
            diags.iter().any(|d| d.rule == "start_no_incoming" && d.severity == Severity::Error),
            "Expected start_no_incoming error, got: {diags:?}"
        );
    }

    #[test]
    fn invalid_condition_syntax_error() {
        let pg = parse_and_build(r#"digraph G {
            start [shape="Mdiamond"]
            a [label="A"]
            done [shape="Msquare"]
            start -> a [condition="no_operator_here"]
            a -> done
        }"#);
        let diags = validate(&pg);
        assert!(
            diags.iter().any(|d| d.rule == "condition_syntax" && d.severity == Severity::Error),
            "Expected condition_syntax error, got: {diags:?}"
        );
    }

    #[test]
    fn goal_gate_without_retry_target_warning() {
        let pg = parse_and_build(r#"digraph G {
            start [shape="Mdiamond"]
            gate [goal_gate=true, label="Check"]
            done [shape="Msquare"]
            start -> gate -> done
        }"#);
        let diags = validate(&pg);
        assert!(
            diags.iter().any(|d| d.rule == "goal_gate_has_retry" && d.severity == Severity::Warning),
            "Expected goal_gate_has_retry warning, got: {diags:?}"
        );
    }

    #[test]
    fn validate_or_raise_ok_for_valid_graph() {
        let pg = parse_and_build(r#"digraph G {
            start [shape="Mdiamond"]
            process [label="Do work", prompt="Do it", llm_provider="anthropic"]
            done [shape="Msquare"]
            start -> process -> done
        }"#);
        let result = validate_or_raise(&pg);
        assert!(result.is_ok(), "Expected Ok, got: {result:?}");
    }

    #[test]
    fn validate_or_raise_errors_for_invalid_graph() {
        let pg = parse_and_build(r#"digraph G {
            process [label="Do work"]
        }"#);
        let result = validate_or_raise(&pg);
        assert!(result.is_err());
    }

    #[test]
    fn fidelity_valid_rule() {
        let pg = parse_and_build(r#"digraph G {
            start [shape="Mdiamond"]
            a [fidelity="garbage"]
            done [shape="Msquare"]
            start -> a -> done
        }"#);
        let diags = validate(&pg);
        assert!(
            diags.iter().any(|d| d.rule == "fidelity_valid" && d.severity == Severity::Warning),
            "Expected fidelity_valid warning, got: {diags:?}"
        );
    }

    #[test]
    fn valid_fidelity_values_accepted() {
        assert!(is_valid_fidelity("full"));
        assert!(is_valid_fidelity("truncate"));
        assert!(is_valid_fidelity("compact"));
        assert!(is_valid_fidelity("summary"));
        assert!(is_valid_fidelity("summary:low"));
        assert!(is_valid_fidelity("summary:medium"));
        assert!(!is_valid_fidelity("bogus"));
        assert!(!is_valid_fidelity(""));
    }

    #[test]
    fn exit_with_outgoing_edges_error() {
        let pg = parse_and_build(r#"digraph G {
            start [shape="Mdiamond"]
            done [shape="Msquare"]
            extra [label="Extra"]
            start -> done -> extra
        }"#);
        let diags = validate(&pg);
        assert!(
            diags.iter().any(|d| d.rule == "exit_no_outgoing" && d.severity == Severity::Error),
            "Expected exit_no_outgoing error, got: {diags:?}"
        );
    }

    #[test]
    fn retry_target_nonexistent_warning() {
        let pg = parse_and_build(r#"digraph G {
            start [shape="Mdiamond"]
            gate [goal_gate=true, retry_target="nonexistent"]
            done [shape="Msquare"]
            start -> gate -> done
        }"#);
        let diags = validate(&pg);
        assert!(
            diags.iter().any(|d| d.rule == "retry_target_exists" && d.severity == Severity::Warning),
            "Expected retry_target_exists warning, got: {diags:?}"
        );
    }
}
