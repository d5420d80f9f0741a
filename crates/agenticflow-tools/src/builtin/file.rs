use std::path::{Path, PathBuf};

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use agenticflow_core::error::{FlowError, Result};
use agenticflow_core::traits::Tool;
use agenticflow_core::types::{ToolContext, ToolResult};

fn resolve_path(file_path: &str, working_dir: &Path) -> PathBuf {
    let path = PathBuf::from(file_path);
    if path.is_absolute() {
        path
    } else {
        working_dir.join(path)
    }
}

// ── FileReadTool ────────────────────────────────────────────────

pub struct FileReadTool;

#[derive(Deserialize)]
struct FileReadInput {
    filepath: String,
}

impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read the full content of a text file."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filepath": {
                    "type": "string",
                    "description": "Absolute path, or path relative to the working directory"
                }
            },
            "required": ["filepath"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: FileReadInput = serde_json::from_value(input)
                .map_err(|e| FlowError::ToolValidation(e.to_string()))?;

            let path = resolve_path(&params.filepath, &ctx.working_dir);
            debug!(path = %path.display(), node_id = %ctx.node_id, "Reading file");

            let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
                FlowError::ToolExecution {
                    tool: "file_read".to_string(),
                    message: format!("{}: {}", path.display(), e),
                }
            })?;

            Ok(ToolResult::success(content))
        })
    }
}

// ── FileWriteTool ───────────────────────────────────────────────

pub struct FileWriteTool;

#[derive(Deserialize)]
struct FileWriteInput {
    filepath: String,
    content: String,
}

impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write text content to a file, creating parent directories as needed."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "filepath": { "type": "string", "description": "Destination path" },
                "content": { "type": "string", "description": "Text to write" }
            },
            "required": ["filepath", "content"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let params: FileWriteInput = serde_json::from_value(input)
                .map_err(|e| FlowError::ToolValidation(e.to_string()))?;

            let path = resolve_path(&params.filepath, &ctx.working_dir);
            debug!(path = %path.display(), bytes = params.content.len(), "Writing file");

            let write_err = |e: std::io::Error| FlowError::ToolExecution {
                tool: "file_write".to_string(),
                message: format!("{}: {}", path.display(), e),
            };

            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
            }
            tokio::fs::write(&path, params.content.as_bytes())
                .await
                .map_err(write_err)?;

            Ok(ToolResult::success(true))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_then_read_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new("writer", dir.path().to_path_buf());

        let written = FileWriteTool
            .execute(
                serde_json::json!({"filepath": "out/notes.txt", "content": "hello"}),
                ctx.clone(),
            )
            .await
            .unwrap();
        assert_eq!(written.content, serde_json::json!(true));
        assert!(dir.path().join("out/notes.txt").exists());

        let read = FileReadTool
            .execute(serde_json::json!({"filepath": "out/notes.txt"}), ctx)
            .await
            .unwrap();
        assert_eq!(read.content, serde_json::json!("hello"));
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ToolContext::new("reader", dir.path().to_path_buf());
        let err = FileReadTool
            .execute(serde_json::json!({"filepath": "absent.txt"}), ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::ToolExecution { ref tool, .. } if tool == "file_read"));
    }
}
