use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::*;

/// A named capability a context can invoke through the registry.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (registry key).
    fn name(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// JSON Schema for tool input.
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with given input and context.
    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// LLM client used by prompt-driven contexts. The transport lives
/// outside this workspace; callers plug in their own implementation.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a fully rendered prompt and receive the completion text.
    fn complete(&self, prompt: String) -> BoxFuture<'_, Result<String>>;
}
