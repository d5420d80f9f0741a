use futures::future::BoxFuture;
use serde::Deserialize;

use agenticflow_core::error::{FlowError, Result};
use agenticflow_core::traits::Tool;
use agenticflow_core::types::{ToolContext, ToolResult};

// ── JsonParseTool ───────────────────────────────────────────────

pub struct JsonParseTool;

#[derive(Deserialize)]
struct JsonParseInput {
    json_str: String,
}

impl Tool for JsonParseTool {
    fn name(&self) -> &str {
        "json_parse"
    }
    fn description(&self) -> &str {
        "Parse a JSON string into a structured value."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "json_str": { "type": "string", "description": "JSON text to parse" }
            },
            "required": ["json_str"]
        })
    }
    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let p: JsonParseInput = serde_json::from_value(input)
                .map_err(|e| FlowError::ToolValidation(e.to_string()))?;
            match serde_json::from_str::<serde_json::Value>(&p.json_str) {
                Ok(value) => Ok(ToolResult::success(value)),
                Err(e) => Ok(ToolResult::error(format!("Invalid JSON: {}", e))),
            }
        })
    }
}

// ── JsonStringifyTool ───────────────────────────────────────────

pub struct JsonStringifyTool;

#[derive(Deserialize)]
struct JsonStringifyInput {
    obj: serde_json::Value,
    #[serde(default)]
    pretty: bool,
}

impl Tool for JsonStringifyTool {
    fn name(&self) -> &str {
        "json_stringify"
    }
    fn description(&self) -> &str {
        "Convert a structured value to a JSON string. Set pretty for indented output."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "obj": { "description": "Value to serialize" },
                "pretty": { "type": "boolean", "description": "Indent the output (default: false)" }
            },
            "required": ["obj"]
        })
    }
    fn execute(
        &self,
        input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let p: JsonStringifyInput = serde_json::from_value(input)
                .map_err(|e| FlowError::ToolValidation(e.to_string()))?;
            let text = if p.pretty {
                serde_json::to_string_pretty(&p.obj)?
            } else {
                serde_json::to_string(&p.obj)?
            };
            Ok(ToolResult::success(text))
        })
    }
}
