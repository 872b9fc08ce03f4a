//! Edge selection: the 6-step cascade, implicit fan-out, and the fan-in hop
//! resolver.
//!
//! After a node completes, this module determines which outgoing edge to follow
//! based on a priority cascade: condition match, preferred label, suggested next
//! IDs, highest weight, and lexical tiebreak.

use attractor_types::{FailureClass, Outcome};

use crate::condition::{evaluate_condition, parse_condition};
use crate::goal_gate::resolve_retry_target;
use crate::graph::{PipelineEdge, PipelineGraph};

/// Select the next edge to follow after a node completes.
/// Returns `None` if no edges are available (terminal node).
pub fn select_edge<'a>(
    node_id: &str,
    outcome: &attractor_types::Outcome,
    resolve: &dyn Fn(&str) -> String,
    graph: &'a PipelineGraph,
) -> Option<&'a PipelineEdge> {
    let edges = graph.outgoing_edges(node_id);
    if edges.is_empty() {
        return None;
    }

    // Step 1: Condition-matching edges
    let condition_edges: Vec<_> = edges
        .iter()
        .filter(|e| {
            if let Some(ref cond) = e.condition {
                if let Ok(expr) = parse_condition(cond) {
                    evaluate_condition(&expr, resolve)
                } else {
                    false
                }
            } else {
                false
            }
        })
        .collect();
    if !condition_edges.is_empty() {
        return Some(best_by_weight_then_lexical(&condition_edges));
    }

    // Step 2: Preferred label match
    if let Some(ref label) = outcome.preferred_label {
        let normalized = normalize_label(label);
        for edge in edges {
            if let Some(ref elabel) = edge.label {
                if normalize_label(elabel) == normalized {
                    return Some(edge);
                }
            }
        }
    }

    // Step 3: Suggested next IDs
    for suggested in &outcome.suggested_next_ids {
        for edge in edges {
            if edge.to == *suggested {
                return Some(edge);
            }
        }
    }

    // Step 4 & 5: Unconditional edges by weight with lexical tiebreak
    let unconditional: Vec<_> = edges.iter().filter(|e| e.condition.is_none()).collect();
    if unconditional.is_empty() {
        // Last resort: return first edge regardless
        return edges.first();
    }
    Some(best_by_weight_then_lexical(&unconditional))
}

/// Normalize a label for comparison: lowercase, strip accelerator prefixes like
/// `[Y]`, `Y)`, `Y-`.
fn normalize_label(label: &str) -> String {
    let s = label.trim().to_lowercase();
    // Strip accelerator prefixes: [Y] , Y) , Y-
    // Only match if there's an actual accelerator pattern followed by content.
    regex::Regex::new(r"^(?:\[\w\]\s*|\w\)\s*|\w-\s*)")
        .unwrap()
        .replace(&s, "")
        .to_string()
}

/// Pick the edge with the highest weight; break ties by lexicographically
/// smallest `to` field.
fn best_by_weight_then_lexical<'a>(edges: &[&'a PipelineEdge]) -> &'a PipelineEdge {
    edges
        .iter()
        .copied()
        .max_by(|a, b| {
            a.weight
                .cmp(&b.weight)
                .then(b.to.cmp(&a.to)) // lexical ascending = reverse compare
        })
        .unwrap()
}

// ---------------------------------------------------------------------------
// Implicit fan-out
// ---------------------------------------------------------------------------

/// Implements implicit fan-out: if condition-matching yields ≥2 edges, or (all
/// outgoing edges are conditional and none matched) logs
/// `step5_all_conditional_fallback` and returns every outgoing edge. Otherwise
/// returns the single edge `select_edge` would have chosen, as a one-element
/// vec, or an empty vec on a terminal node.
pub fn select_all_eligible_edges<'a>(
    node_id: &str,
    outcome: &Outcome,
    resolve: &dyn Fn(&str) -> String,
    graph: &'a PipelineGraph,
) -> Vec<&'a PipelineEdge> {
    let edges = graph.outgoing_edges(node_id);
    if edges.is_empty() {
        return Vec::new();
    }

    let condition_edges: Vec<&PipelineEdge> = edges
        .iter()
        .filter(|e| {
            e.condition.as_ref().is_some_and(|cond| {
                parse_condition(cond)
                    .map(|expr| evaluate_condition(&expr, resolve))
                    .unwrap_or(false)
            })
        })
        .copied()
        .collect();

    if condition_edges.len() >= 2 {
        return condition_edges;
    }

    let all_conditional = edges.iter().all(|e| e.condition.is_some());
    if all_conditional && condition_edges.is_empty() {
        tracing::info!(
            node = %node_id,
            event = "step5_all_conditional_fallback",
            "all outgoing edges conditional and none matched; fanning out to all"
        );
        return edges;
    }

    select_edge(node_id, outcome, resolve, graph)
        .into_iter()
        .collect()
}

// ---------------------------------------------------------------------------
// Hop resolver (fan-in / tripleoctagon)
// ---------------------------------------------------------------------------

/// Why a `Hop` was produced, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopSource {
    EdgeSelection,
    Conditional,
    RetryTarget,
}

/// The chosen outgoing edge plus metadata about why it was chosen.
#[derive(Debug, Clone)]
pub struct Hop<'a> {
    pub edge: &'a PipelineEdge,
    pub source: HopSource,
    pub retry_target_source: Option<String>,
}

/// Resolves the next hop for a fan-in (`tripleoctagon`) node. On `fail`,
/// bypasses normal edge selection and walks the retry-target hierarchy
/// (`node.retry_target > node.fallback_retry_target > graph.retry_target >
/// graph.fallback_retry_target`), honored only when `failure_class ==
/// TransientInfra`. Falls back to ordinary edge selection for non-fan-in
/// nodes or non-fail outcomes.
pub fn resolve_next_hop<'a>(
    graph: &'a PipelineGraph,
    node_id: &str,
    outcome: &Outcome,
    resolve: &dyn Fn(&str) -> String,
    failure_class: FailureClass,
) -> Option<Hop<'a>> {
    let node = graph.node(node_id)?;
    let is_fan_in = node.shape == "tripleoctagon";
    let is_fail = outcome.status == attractor_types::StageStatus::Fail;

    if is_fan_in && is_fail {
        if !failure_class.permits_retry_routing() {
            return None;
        }
        let target = resolve_retry_target(node, graph)?;
        let edges = graph.outgoing_edges(node_id);
        let edge = edges.iter().find(|e| e.to == target).copied().or_else(|| {
            // retry target may not be a direct outgoing edge of this node;
            // the caller (scheduler) treats a missing edge object as a jump
            // target by id instead. We still need an edge reference here, so
            // only produce a Hop when one exists.
            None
        })?;
        return Some(Hop {
            edge,
            source: HopSource::RetryTarget,
            retry_target_source: Some(target),
        });
    }

    let edge = select_edge(node_id, outcome, resolve, graph)?;
    let source = if edge.condition.is_some() {
        HopSource::Conditional
    } else {
        HopSource::EdgeSelection
    };
    Some(Hop {
        edge,
        source,
        retry_target_source: None,
    })
}
