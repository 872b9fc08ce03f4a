//! AST transforms for pipeline graphs.
//!
//! Processes the pipeline graph after parsing: expands `$goal`, resolves
//! `prompt_file` attributes, applies model stylesheets, and expands
//! `${variable}` references. Transforms run through a small registry so the
//! set can grow without every call site learning a new function name.

use std::collections::HashMap;

use crate::graph::PipelineGraph;
use crate::stylesheet::{apply_stylesheet, parse_stylesheet};

/// A single named, ordered step in `apply_transforms`.
pub trait Transform {
    fn id(&self) -> &str;
    fn apply(&self, graph: &mut PipelineGraph) -> attractor_types::Result<()>;
}

struct ExpandGoal;
impl Transform for ExpandGoal {
    fn id(&self) -> &str {
        "expand_goal"
    }
    fn apply(&self, graph: &mut PipelineGraph) -> attractor_types::Result<()> {
        let goal = graph.goal.clone();
        for node in graph.all_nodes_mut() {
            if let Some(ref prompt) = node.prompt {
                if prompt.contains("$goal") {
                    node.prompt = Some(prompt.replace("$goal", &goal));
                }
            }
        }
        Ok(())
    }
}

struct PromptFile;
impl Transform for PromptFile {
    fn id(&self) -> &str {
        "prompt_file"
    }
    fn apply(&self, graph: &mut PipelineGraph) -> attractor_types::Result<()> {
        for node in graph.all_nodes_mut() {
            let path = match node.raw_attrs.get("prompt_file") {
                Some(attractor_dot::AttributeValue::String(s)) => Some(s.clone()),
                _ => None,
            };
            let Some(path) = path else { continue };
            if node.prompt.is_some() {
                // Conflicting prompt/prompt_file is reported by the
                // `prompt_file_conflict` lint rule; leave the node alone here
                // so `validate()` still sees the raw conflict.
                continue;
            }
            let contents = std::fs::read_to_string(&path).map_err(attractor_types::AttractorError::Io)?;
            node.prompt = Some(contents);
        }
        Ok(())
    }
}

struct ModelStylesheet;
impl Transform for ModelStylesheet {
    fn id(&self) -> &str {
        "model_stylesheet"
    }
    fn apply(&self, graph: &mut PipelineGraph) -> attractor_types::Result<()> {
        let stylesheet_str = graph.attrs.get("model_stylesheet").and_then(|v| match v {
            attractor_dot::AttributeValue::String(s) => Some(s.clone()),
            _ => None,
        });

        if let Some(css) = stylesheet_str {
            let stylesheet = parse_stylesheet(&css)?;
            apply_stylesheet(graph, &stylesheet);
        }
        Ok(())
    }
}

struct ExpandPromptVariables;
impl Transform for ExpandPromptVariables {
    fn id(&self) -> &str {
        "expand_prompt_variables"
    }
    fn apply(&self, graph: &mut PipelineGraph) -> attractor_types::Result<()> {
        let vars: HashMap<String, String> = graph
            .attrs
            .iter()
            .filter_map(|(k, v)| match v {
                attractor_dot::AttributeValue::String(s) => Some((k.clone(), s.clone())),
                attractor_dot::AttributeValue::Integer(i) => Some((k.clone(), i.to_string())),
                attractor_dot::AttributeValue::Boolean(b) => Some((k.clone(), b.to_string())),
                attractor_dot::AttributeValue::Float(f) => Some((k.clone(), f.to_string())),
                attractor_dot::AttributeValue::Duration(_) => None,
            })
            .collect();

        for node in graph.all_nodes_mut() {
            if let Some(ref prompt) = node.prompt {
                let expanded = expand_variables(prompt, &vars);
                if expanded != *prompt {
                    node.prompt = Some(expanded);
                }
            }
        }
        Ok(())
    }
}

/// Built-in transforms, run in this order. `$goal` and `prompt_file` are
/// resolved before the stylesheet and `${var}` passes so that a goal-derived
/// or file-sourced prompt can itself still carry stylesheet-driven model
/// overrides and variable references.
fn registry() -> Vec<Box<dyn Transform>> {
    vec![
        Box::new(ExpandGoal),
        Box::new(PromptFile),
        Box::new(ModelStylesheet),
        Box::new(ExpandPromptVariables),
    ]
}

/// Apply all transforms to a pipeline graph in registration order.
///
/// Idempotent per invariant: running this twice on an already-transformed
/// graph is a no-op, since each transform keys off raw attribute/prompt
/// state that its own prior run already consumed.
pub fn apply_transforms(graph: &mut PipelineGraph) -> attractor_types::Result<()> {
    for transform in registry() {
        transform.apply(graph)?;
    }
    Ok(())
}

/// Expand `${variable}` patterns in a string.
///
/// Replaces each occurrence of `${key}` with the corresponding value from `vars`.
/// Variables that do not appear in `vars` are left as-is.
pub fn expand_variables(template: &str, vars: &HashMap<String, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        let pattern = format!("${{{}}}", key);
        result = result.replace(&pattern, value);
    }
    result
}
