use serde::{Deserialize, Serialize};

use agenticflow_core::types::DataMap;

/// A unit of work in a workflow graph.
///
/// A context declares which keys it reads from the accumulated data and
/// which keys it writes back. The run behavior itself is bound separately
/// on the [`WorkflowGraph`](super::WorkflowGraph) so that contexts stay
/// plain, serializable records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Context {
    /// Unique identifier within a workflow.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Keys pulled from the accumulated data (empty = everything).
    #[serde(default)]
    pub input_keys: Vec<String>,
    /// Keys this context is expected to produce.
    #[serde(default)]
    pub output_keys: Vec<String>,
    /// Tool names this context may invoke (empty = all registered tools).
    #[serde(default)]
    pub tools: Vec<String>,
    /// Template rendered for prompt-driven contexts.
    #[serde(default)]
    pub prompt_template: Option<String>,
    /// Values used for inputs that are missing from the accumulated data.
    #[serde(default)]
    pub defaults: DataMap,
}

impl Context {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            input_keys: vec![],
            output_keys: vec![],
            tools: vec![],
            prompt_template: None,
            defaults: DataMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_inputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_outputs<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_tools<I, S>(mut self, tools: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tools = tools.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_prompt(mut self, template: impl Into<String>) -> Self {
        self.prompt_template = Some(template.into());
        self
    }

    pub fn with_default(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.defaults.insert(key.into(), value);
        self
    }

    /// Whether this context may call the named tool.
    pub fn allows_tool(&self, name: &str) -> bool {
        self.tools.is_empty() || self.tools.iter().any(|t| t == name)
    }

    /// Select this context's inputs from the accumulated data.
    ///
    /// Defaults are applied first and overwritten by present values. With
    /// no declared input keys the whole accumulated map is handed over.
    pub fn gather_inputs(&self, data: &DataMap) -> DataMap {
        let mut inputs = self.defaults.clone();
        if self.input_keys.is_empty() {
            inputs.extend(data.iter().map(|(k, v)| (k.clone(), v.clone())));
            return inputs;
        }
        for key in &self.input_keys {
            if let Some(value) = data.get(key) {
                inputs.insert(key.clone(), value.clone());
            }
        }
        inputs
    }

    /// Render the prompt for this context by injecting input data.
    ///
    /// `{key}` placeholders in the template are substituted first; any
    /// declared inputs are also listed in a context block above the task.
    pub fn build_prompt(&self, base_prompt: &str, inputs: &DataMap) -> String {
        let mut prompt = String::new();

        if !self.input_keys.is_empty() {
            prompt.push_str("## Context Data\n\n");
            for key in &self.input_keys {
                if let Some(value) = inputs.get(key) {
                    prompt.push_str(&format!("**{}**: {}\n", key, display_value(value)));
                }
            }
            prompt.push_str("\n---\n\n");
        }

        let mut task = base_prompt.to_string();
        for (key, value) in inputs {
            task = task.replace(&format!("{{{}}}", key), &display_value(value));
        }
        prompt.push_str(&task);
        prompt
    }
}

fn display_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
