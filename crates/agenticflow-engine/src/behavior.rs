use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use agenticflow_core::error::{FlowError, Result};
use agenticflow_core::traits::LlmClient;
use agenticflow_core::types::{DataMap, ExecutionId, ToolContext};
use agenticflow_tools::ToolRegistry;

use crate::graph::{Context, HandoffContext};

/// Everything a running context may reach besides its inputs.
#[derive(Clone)]
pub struct StepContext {
    pub execution_id: ExecutionId,
    pub node_id: String,
    pub tools: Arc<ToolRegistry>,
    pub llm: Option<Arc<dyn LlmClient>>,
    pub working_dir: PathBuf,
    pub cancel: CancellationToken,
}

impl StepContext {
    pub fn tool_context(&self) -> ToolContext {
        ToolContext {
            execution_id: self.execution_id.clone(),
            node_id: self.node_id.clone(),
            working_dir: self.working_dir.clone(),
            cancel: self.cancel.clone(),
        }
    }

    /// Invoke a registered tool on behalf of `context`.
    pub async fn invoke_tool(
        &self,
        context: &Context,
        name: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value> {
        if !context.allows_tool(name) {
            return Err(FlowError::ToolValidation(format!(
                "context '{}' is not allowed to call tool '{}'",
                context.id, name
            )));
        }
        self.tools.invoke(name, params, self.tool_context()).await
    }
}

/// The run behavior bound to a context.
///
/// Receives the gathered inputs and returns the outputs to merge into the
/// accumulated data. Any error is reported as a step failure of this context.
pub trait ContextBehavior: Send + Sync + 'static {
    fn run<'a>(
        &'a self,
        context: &'a Context,
        inputs: DataMap,
        step: StepContext,
    ) -> BoxFuture<'a, Result<DataMap>>;
}

/// A synchronous closure used as a run behavior.
pub struct FnBehavior<F> {
    f: F,
}

impl<F> FnBehavior<F>
where
    F: Fn(&Context, DataMap) -> Result<DataMap> + Send + Sync + 'static,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> ContextBehavior for FnBehavior<F>
where
    F: Fn(&Context, DataMap) -> Result<DataMap> + Send + Sync + 'static,
{
    fn run<'a>(
        &'a self,
        context: &'a Context,
        inputs: DataMap,
        _step: StepContext,
    ) -> BoxFuture<'a, Result<DataMap>> {
        let result = (self.f)(context, inputs);
        Box::pin(async move { result })
    }
}

/// Calls one registered tool with the context's inputs.
pub struct ToolBehavior {
    tool: String,
    params: DataMap,
    bindings: HashMap<String, String>,
    output_key: Option<String>,
}

impl ToolBehavior {
    pub fn new(tool: impl Into<String>) -> Self {
        Self {
            tool: tool.into(),
            params: DataMap::new(),
            bindings: HashMap::new(),
            output_key: None,
        }
    }

    /// Fixed parameter passed on every call.
    pub fn with_param(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    /// Feed tool parameter `param` from input `input_key`. Once any
    /// binding exists, unbound inputs are no longer forwarded.
    pub fn bind(mut self, param: impl Into<String>, input_key: impl Into<String>) -> Self {
        self.bindings.insert(param.into(), input_key.into());
        self
    }

    /// Store the tool result under this key instead of the first output key.
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    fn arguments(&self, inputs: &DataMap) -> serde_json::Value {
        let mut args = serde_json::Map::new();
        if self.bindings.is_empty() {
            for (k, v) in inputs {
                args.insert(k.clone(), v.clone());
            }
        } else {
            for (param, input_key) in &self.bindings {
                if let Some(v) = inputs.get(input_key) {
                    args.insert(param.clone(), v.clone());
                }
            }
        }
        for (k, v) in &self.params {
            args.insert(k.clone(), v.clone());
        }
        serde_json::Value::Object(args)
    }

    fn outputs(&self, context: &Context, value: serde_json::Value) -> DataMap {
        let mut outputs = DataMap::new();
        if let Some(key) = &self.output_key {
            outputs.insert(key.clone(), value);
            return outputs;
        }
        if let Some(obj) = value.as_object() {
            let declared: Vec<&String> = context
                .output_keys
                .iter()
                .filter(|k| obj.contains_key(k.as_str()))
                .collect();
            if !declared.is_empty() {
                for key in declared {
                    outputs.insert(key.clone(), obj[key.as_str()].clone());
                }
                return outputs;
            }
        }
        let key = context
            .output_keys
            .first()
            .cloned()
            .unwrap_or_else(|| self.tool.clone());
        outputs.insert(key, value);
        outputs
    }
}

impl ContextBehavior for ToolBehavior {
    fn run<'a>(
        &'a self,
        context: &'a Context,
        inputs: DataMap,
        step: StepContext,
    ) -> BoxFuture<'a, Result<DataMap>> {
        Box::pin(async move {
            let args = self.arguments(&inputs);
            debug!(node_id = %context.id, tool = %self.tool, "Tool-backed context");
            let value = step.invoke_tool(context, &self.tool, args).await?;
            Ok(self.outputs(context, value))
        })
    }
}

/// Renders the context's prompt template and asks the LLM client.
pub struct PromptBehavior {
    fallback_template: String,
}

impl PromptBehavior {
    pub fn new() -> Self {
        Self {
            fallback_template: "Complete the task.".to_string(),
        }
    }

    /// Template used when the context has no `prompt_template` of its own.
    pub fn with_template(template: impl Into<String>) -> Self {
        Self {
            fallback_template: template.into(),
        }
    }
}

impl Default for PromptBehavior {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextBehavior for PromptBehavior {
    fn run<'a>(
        &'a self,
        context: &'a Context,
        inputs: DataMap,
        step: StepContext,
    ) -> BoxFuture<'a, Result<DataMap>> {
        Box::pin(async move {
            let llm = step.llm.as_ref().ok_or_else(|| {
                FlowError::Llm(format!("no LLM client configured for context '{}'", context.id))
            })?;
            let template = context
                .prompt_template
                .as_deref()
                .unwrap_or(&self.fallback_template);
            let prompt = context.build_prompt(template, &inputs);
            let text = llm.complete(prompt).await?;

            if context.output_keys.is_empty() {
                let mut outputs = DataMap::new();
                outputs.insert("result".into(), serde_json::Value::String(text));
                return Ok(outputs);
            }
            Ok(HandoffContext::parse_output(&context.output_keys, &text))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoLlm;

    impl LlmClient for EchoLlm {
        fn complete(&self, prompt: String) -> BoxFuture<'_, Result<String>> {
            Box::pin(async move { Ok(prompt) })
        }
    }

    fn step(llm: Option<Arc<dyn LlmClient>>) -> StepContext {
        StepContext {
            execution_id: ExecutionId::new(),
            node_id: "n".into(),
            tools: Arc::new(ToolRegistry::with_builtins()),
            llm,
            working_dir: PathBuf::from("."),
            cancel: CancellationToken::new(),
        }
    }

    fn inputs(pairs: &[(&str, serde_json::Value)]) -> DataMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_fn_behavior() {
        let behavior = FnBehavior::new(|ctx: &Context, inputs: DataMap| {
            let mut out = DataMap::new();
            out.insert(format!("{}_seen", ctx.id), json!(inputs.len()));
            Ok(out)
        });
        let ctx = Context::new("a", "A");
        let out = behavior
            .run(&ctx, inputs(&[("x", json!(1))]), step(None))
            .await
            .unwrap();
        assert_eq!(out["a_seen"], json!(1));
    }

    #[tokio::test]
    async fn test_tool_behavior_binds_inputs_and_stores_first_output() {
        let ctx = Context::new("parse", "Parse")
            .with_inputs(["raw"])
            .with_outputs(["parsed"]);
        let behavior = ToolBehavior::new("json_parse").bind("json_str", "raw");

        let out = behavior
            .run(&ctx, inputs(&[("raw", json!(r#"{"a": 1}"#))]), step(None))
            .await
            .unwrap();
        assert_eq!(out["parsed"], json!({"a": 1}));
    }

    #[tokio::test]
    async fn test_tool_behavior_picks_declared_keys_from_object_result() {
        let ctx = Context::new("parse", "Parse").with_outputs(["a"]);
        let behavior = ToolBehavior::new("json_parse").with_param("json_str", json!(r#"{"a": 1, "b": 2}"#));

        let out = behavior.run(&ctx, DataMap::new(), step(None)).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out["a"], json!(1));
    }

    #[tokio::test]
    async fn test_tool_behavior_error_propagates() {
        let ctx = Context::new("parse", "Parse");
        let behavior = ToolBehavior::new("json_parse").with_param("json_str", json!("{bad"));
        let err = behavior.run(&ctx, DataMap::new(), step(None)).await.unwrap_err();
        assert!(matches!(err, FlowError::ToolExecution { .. }));
    }

    #[tokio::test]
    async fn test_tool_behavior_respects_allowed_tools() {
        let ctx = Context::new("c", "C").with_tools(["file_read"]);
        let behavior = ToolBehavior::new("json_parse").with_param("json_str", json!("1"));
        let err = behavior.run(&ctx, DataMap::new(), step(None)).await.unwrap_err();
        assert!(matches!(err, FlowError::ToolValidation(_)));
    }

    #[tokio::test]
    async fn test_prompt_behavior_renders_template() {
        let ctx = Context::new("gen", "Generate")
            .with_inputs(["topic"])
            .with_outputs(["answer"])
            .with_prompt("Explain {topic}.");
        let llm: Arc<dyn LlmClient> = Arc::new(EchoLlm);
        let out = PromptBehavior::new()
            .run(&ctx, inputs(&[("topic", json!("ownership"))]), step(Some(llm)))
            .await
            .unwrap();
        let answer = out["answer"].as_str().unwrap();
        assert!(answer.contains("**topic**: ownership"));
        assert!(answer.ends_with("Explain ownership."));
    }

    #[tokio::test]
    async fn test_prompt_behavior_without_llm_fails() {
        let ctx = Context::new("gen", "Generate");
        let err = PromptBehavior::new()
            .run(&ctx, DataMap::new(), step(None))
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Llm(_)));
    }
}
