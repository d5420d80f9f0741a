use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use agenticflow_core::error::{FlowError, Result};
use agenticflow_core::types::DataMap;

use super::context::Context;
use super::edge::Edge;
use super::workflow::WorkflowGraph;
use crate::behavior::{PromptBehavior, ToolBehavior};

/// Declarative workflow, loadable from TOML or JSON.
///
/// ```toml
/// name = "lookup"
///
/// [[contexts]]
/// id = "fetch"
/// name = "Fetch"
/// output_keys = ["page"]
/// tool = { name = "http_request", params = { url = "https://example.com" } }
///
/// [[edges]]
/// from = "fetch"
/// to = "summarize"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Overrides the engine's `allow_self_loops` when set.
    #[serde(default)]
    pub allow_self_loops: Option<bool>,
    #[serde(default)]
    pub contexts: Vec<ContextDefinition>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextDefinition {
    #[serde(flatten)]
    pub context: Context,
    /// Run this context by calling a registered tool.
    #[serde(default)]
    pub tool: Option<ToolBinding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolBinding {
    pub name: String,
    #[serde(default)]
    pub params: DataMap,
    /// Tool parameter name -> input key.
    #[serde(default)]
    pub bind: HashMap<String, String>,
    #[serde(default)]
    pub output_key: Option<String>,
}

impl WorkflowDefinition {
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| FlowError::InvalidWorkflow(e.to_string()))
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).map_err(|e| FlowError::InvalidWorkflow(e.to_string()))
    }

    /// Load a definition file; `.json` files are parsed as JSON, anything
    /// else as TOML.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json(&content),
            _ => Self::from_toml(&content),
        }
    }

    /// Build the graph. Tool-backed contexts get a [`ToolBehavior`], contexts
    /// with a prompt template get a [`PromptBehavior`]; anything else stays
    /// unbound until the caller binds it.
    ///
    /// Edge endpoints are not checked here; see [`WorkflowGraph::validate`].
    pub fn into_graph(self, default_allow_self_loops: bool) -> Result<WorkflowGraph> {
        let mut bindings = Vec::new();
        let mut contexts = Vec::with_capacity(self.contexts.len());
        for def in self.contexts {
            if let Some(tool) = def.tool {
                bindings.push((def.context.id.clone(), Some(tool)));
            } else if def.context.prompt_template.is_some() {
                bindings.push((def.context.id.clone(), None));
            }
            contexts.push(def.context);
        }

        let mut graph = WorkflowGraph::from_parts(self.name, contexts, self.edges)?
            .with_description(self.description)
            .with_self_loops(self.allow_self_loops.unwrap_or(default_allow_self_loops));

        for (id, tool) in bindings {
            match tool {
                Some(binding) => {
                    let mut behavior = ToolBehavior::new(binding.name);
                    for (k, v) in binding.params {
                        behavior = behavior.with_param(k, v);
                    }
                    for (param, input_key) in binding.bind {
                        behavior = behavior.bind(param, input_key);
                    }
                    if let Some(key) = binding.output_key {
                        behavior = behavior.with_output_key(key);
                    }
                    graph.bind(&id, Arc::new(behavior))?;
                }
                None => graph.bind(&id, Arc::new(PromptBehavior::new()))?,
            }
        }
        Ok(graph)
    }
}
