use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use agenticflow_core::error::{FlowError, Result};
use agenticflow_core::traits::Tool;
use agenticflow_core::types::{ToolContext, ToolDefinition, ToolResult};

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
    /// Upper bound applied on top of each tool's own timeout.
    max_timeout_secs: Option<u64>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            max_timeout_secs: None,
        }
    }

    /// Cap every invocation at `secs`, whatever the tool declares.
    pub fn with_max_timeout(mut self, secs: u64) -> Self {
        self.max_timeout_secs = Some(secs);
        self
    }

    /// Register a tool. Names are unique.
    pub fn register(&mut self, tool: impl Tool) -> Result<()> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(FlowError::DuplicateTool(name));
        }
        self.tools.insert(name, Arc::new(tool));
        Ok(())
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Whether a tool with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// List all registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Get tool definitions for prompt-driven contexts.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    fn effective_timeout(&self, tool: &dyn Tool) -> u64 {
        match self.max_timeout_secs {
            Some(cap) => tool.timeout_secs().min(cap),
            None => tool.timeout_secs(),
        }
    }

    /// Execute a tool by name, returning its raw result.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| FlowError::UnknownTool(name.to_string()))?;

        let timeout_secs = self.effective_timeout(tool.as_ref());
        let timeout = Duration::from_secs(timeout_secs);
        let cancel = ctx.cancel.clone();

        debug!(tool = %name, node_id = %ctx.node_id, timeout_secs, "Invoking tool");

        tokio::select! {
            result = tokio::time::timeout(timeout, tool.execute(input, ctx)) => match result {
                Ok(result) => result,
                Err(_) => Err(FlowError::ToolTimeout {
                    tool: name.to_string(),
                    timeout_secs,
                }),
            },
            _ = cancel.cancelled() => Err(FlowError::Cancelled),
        }
    }

    /// Invoke a tool and unwrap its content; error results become `ToolExecution`.
    pub async fn invoke(
        &self,
        name: &str,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> Result<serde_json::Value> {
        let result = self.execute(name, input, ctx).await?;
        if result.is_error {
            let message = match result.content {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            return Err(FlowError::ToolExecution {
                tool: name.to_string(),
                message,
            });
        }
        Ok(result.content)
    }

    /// Create a registry with all built-in tools registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_builtins();
        registry
    }

    fn register_builtins(&mut self) {
        let builtins: Vec<Arc<dyn Tool>> = vec![
            Arc::new(crate::builtin::network::HttpRequestTool),
            Arc::new(crate::builtin::file::FileReadTool),
            Arc::new(crate::builtin::file::FileWriteTool),
            Arc::new(crate::builtin::data::JsonParseTool),
            Arc::new(crate::builtin::data::JsonStringifyTool),
        ];
        for tool in builtins {
            self.tools.insert(tool.name().to_string(), tool);
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::path::PathBuf;

    struct SleepyTool;

    impl Tool for SleepyTool {
        fn name(&self) -> &str {
            "sleepy"
        }
        fn description(&self) -> &str {
            "Sleeps for a long time."
        }
        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }
        fn timeout_secs(&self) -> u64 {
            1
        }
        fn execute(
            &self,
            _input: serde_json::Value,
            _ctx: ToolContext,
        ) -> BoxFuture<'_, Result<ToolResult>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ToolResult::success("late"))
            })
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new("node", PathBuf::from("."))
    }

    #[test]
    fn test_builtins_registered() {
        let registry = ToolRegistry::with_builtins();
        assert_eq!(
            registry.list(),
            vec!["file_read", "file_write", "http_request", "json_parse", "json_stringify"]
        );
        assert_eq!(registry.definitions().len(), 5);
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ToolRegistry::with_builtins();
        let err = registry
            .register(crate::builtin::data::JsonParseTool)
            .unwrap_err();
        assert!(matches!(err, FlowError::DuplicateTool(ref n) if n == "json_parse"));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry
            .invoke("missing", serde_json::json!({}), ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::UnknownTool(ref n) if n == "missing"));
    }

    #[tokio::test]
    async fn test_invoke_maps_error_results() {
        let registry = ToolRegistry::with_builtins();
        let err = registry
            .invoke("json_parse", serde_json::json!({"json_str": "{bad"}), ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::ToolExecution { ref tool, .. } if tool == "json_parse"));

        let value = registry
            .invoke("json_parse", serde_json::json!({"json_str": "[1]"}), ctx())
            .await
            .unwrap();
        assert_eq!(value, serde_json::json!([1]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_timeout() {
        let mut registry = ToolRegistry::new();
        registry.register(SleepyTool).unwrap();
        let err = registry
            .execute("sleepy", serde_json::json!({}), ctx())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::ToolTimeout { timeout_secs: 1, .. }));
    }

    #[tokio::test]
    async fn test_cancelled_invocation() {
        let mut registry = ToolRegistry::new();
        registry.register(SleepyTool).unwrap();
        let ctx = ctx();
        ctx.cancel.cancel();
        let err = registry
            .execute("sleepy", serde_json::json!({}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Cancelled));
    }

    #[test]
    fn test_max_timeout_caps_tool_timeout() {
        let registry = ToolRegistry::new().with_max_timeout(10);
        assert_eq!(
            registry.effective_timeout(&crate::builtin::network::HttpRequestTool),
            10
        );
        assert_eq!(registry.effective_timeout(&SleepyTool), 1);
    }
}
