use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::FlowError;

/// Key/value mapping flowing into and out of contexts.
pub type DataMap = HashMap<String, serde_json::Value>;

/// Unique identifier of one traversal.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct ExecutionId(pub String);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Traversal algorithm identifier.
#[derive(Debug, Clone, Copy, Default, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyId {
    /// Depth-first with an explicit stack.
    #[default]
    Dfs,
    /// Breadth-first with enqueue-time visited marking.
    Bfs,
    /// Monte-Carlo tree search with uniform rollouts.
    Mcts,
    /// Monte-Carlo tree search steered by a strategy policy.
    Blended,
}

impl StrategyId {
    pub const ALL: [StrategyId; 4] = [Self::Dfs, Self::Bfs, Self::Mcts, Self::Blended];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dfs => "dfs",
            Self::Bfs => "bfs",
            Self::Mcts => "mcts",
            Self::Blended => "blended",
        }
    }
}

impl std::fmt::Display for StrategyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyId {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dfs" => Ok(Self::Dfs),
            "bfs" => Ok(Self::Bfs),
            "mcts" => Ok(Self::Mcts),
            "blended" => Ok(Self::Blended),
            other => Err(FlowError::Config(format!(
                "unknown strategy '{}' (expected dfs, bfs, mcts or blended)",
                other
            ))),
        }
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: serde_json::Value,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(content: impl Into<serde_json::Value>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: serde_json::Value::String(content.into()),
            is_error: true,
        }
    }
}

/// Tool definition exposed to prompt-driven contexts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// Context passed to tool executions.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub execution_id: ExecutionId,
    /// Id of the workflow context invoking the tool.
    pub node_id: String,
    pub working_dir: PathBuf,
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(node_id: impl Into<String>, working_dir: PathBuf) -> Self {
        Self {
            execution_id: ExecutionId::new(),
            node_id: node_id.into(),
            working_dir,
            cancel: CancellationToken::new(),
        }
    }
}

/// Execution event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    /// A traversal started.
    TraversalStarted {
        execution_id: ExecutionId,
        workflow: String,
        strategy: StrategyId,
    },
    /// A context is about to run.
    NodeStarted { execution_id: ExecutionId, node_id: String },
    /// A context produced its outputs.
    NodeFinished {
        execution_id: ExecutionId,
        node_id: String,
        elapsed_ms: u64,
    },
    /// A context failed.
    NodeFailed {
        execution_id: ExecutionId,
        node_id: String,
        error: String,
    },
    /// A batch of MCTS iterations was merged into the search tree.
    MctsBatchComplete {
        execution_id: ExecutionId,
        iterations: usize,
    },
    /// A traversal ended, successfully or not.
    TraversalFinished {
        execution_id: ExecutionId,
        succeeded: bool,
        path: Vec<String>,
    },
}
