pub mod action_model;
pub mod behavior;
pub mod goal;
pub mod graph;
pub mod selector;
pub mod state;
pub mod strategy;

pub use action_model::{ActionModel, ExecutionFailure, ExecutionRequest, ExecutionResult};
pub use behavior::{ContextBehavior, FnBehavior, PromptBehavior, StepContext, ToolBehavior};
pub use goal::Goal;
pub use graph::{Context, Edge, EdgeCondition, HandoffContext, WorkflowDefinition, WorkflowGraph};
pub use selector::{
    LinearPolicy, Neighborhood, RequestFeatures, StrategyChoice, StrategyPolicy, StrategySelector,
    StrategyWeights, TopologyKind, UniformPolicy, WorkflowShape,
};
pub use state::{ExecutionState, NodeRecord, NodeStatus};
pub use strategy::{ChildStats, RewardFn, RolloutOutcome, SearchSummary};
