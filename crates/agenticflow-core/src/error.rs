use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
    // Structural errors (raised while building or validating a workflow)
    #[error("Duplicate context id: {0}")]
    DuplicateId(String),

    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Self-loop on node {0} is not allowed by configuration")]
    SelfLoop(String),

    #[error("Invalid workflow: {0}")]
    InvalidWorkflow(String),

    #[error("No run behavior bound to context: {0}")]
    MissingBehavior(String),

    // Traversal errors
    #[error("Depth guard exceeded ({max_depth}) while descending into {node}")]
    DepthExceeded { max_depth: usize, node: String },

    #[error("Goal unreachable: frontier exhausted after {executed} executed contexts")]
    GoalUnreachable { executed: usize },

    #[error("Traversal timed out after {0}s")]
    Timeout(u64),

    #[error("Traversal cancelled")]
    Cancelled,

    // Tool errors
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool already registered: {0}")]
    DuplicateTool(String),

    #[error("Tool execution failed: {tool}: {message}")]
    ToolExecution { tool: String, message: String },

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    #[error("Tool input validation failed: {0}")]
    ToolValidation(String),

    // LLM errors
    #[error("LLM request failed: {0}")]
    Llm(String),

    // Policy errors
    #[error("Strategy policy error: {0}")]
    Policy(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FlowError {
    /// Stable snake_case label for this error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::DuplicateId(_) => "duplicate_id",
            Self::UnknownNode(_) => "unknown_node",
            Self::SelfLoop(_) => "self_loop",
            Self::InvalidWorkflow(_) => "invalid_workflow",
            Self::MissingBehavior(_) => "missing_behavior",
            Self::DepthExceeded { .. } => "depth_exceeded",
            Self::GoalUnreachable { .. } => "goal_unreachable",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::UnknownTool(_) => "unknown_tool",
            Self::DuplicateTool(_) => "duplicate_tool",
            Self::ToolExecution { .. } => "tool_error",
            Self::ToolTimeout { .. } => "tool_timeout",
            Self::ToolValidation(_) => "tool_validation",
            Self::Llm(_) => "llm",
            Self::Policy(_) => "policy",
            Self::Config(_) => "config",
            Self::ConfigNotFound(_) => "config_not_found",
            Self::Io(_) => "io",
            Self::Json(_) => "json",
        }
    }

    /// Process exit code for a top-level failure of this kind. Never 0.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::DuplicateId(_)
            | Self::UnknownNode(_)
            | Self::SelfLoop(_)
            | Self::InvalidWorkflow(_)
            | Self::MissingBehavior(_) => 2,
            Self::DepthExceeded { .. } => 3,
            Self::GoalUnreachable { .. } => 4,
            Self::ToolExecution { .. } | Self::ToolValidation(_) | Self::Llm(_) => 5,
            Self::UnknownTool(_) | Self::DuplicateTool(_) => 6,
            Self::Timeout(_) | Self::ToolTimeout { .. } => 7,
            Self::Cancelled => 8,
            Self::Config(_) | Self::ConfigNotFound(_) | Self::Policy(_) => 9,
            Self::Io(_) | Self::Json(_) => 1,
        }
    }

    /// Whether this error must abort a traversal regardless of
    /// `halt_on_step_failure`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_)
                | Self::ToolTimeout { .. }
                | Self::Cancelled
                | Self::DepthExceeded { .. }
                | Self::MissingBehavior(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
