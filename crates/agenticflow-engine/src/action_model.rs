use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use agenticflow_core::config::AppConfig;
use agenticflow_core::error::{FlowError, Result};
use agenticflow_core::traits::LlmClient;
use agenticflow_core::types::{DataMap, ExecutionEvent, ExecutionId, StrategyId};
use agenticflow_core::EventBus;
use agenticflow_tools::ToolRegistry;

use crate::behavior::StepContext;
use crate::goal::Goal;
use crate::graph::{NodeIdx, WorkflowGraph};
use crate::selector::{RequestFeatures, StrategyPolicy, StrategySelector, UniformPolicy, WorkflowShape};
use crate::state::{ExecutionState, NodeRecord};
use crate::strategy::mcts::SearchParams;
use crate::strategy::{bfs, dfs, mcts, Abort, RewardFn, SearchSummary, Traversal, TraversalOptions};

/// One traversal request.
#[derive(Clone, Default)]
pub struct ExecutionRequest {
    request: String,
    initial_data: DataMap,
    strategy: Option<StrategyId>,
    goal: Option<Goal>,
    entry: Option<String>,
    halt_on_step_failure: Option<bool>,
    seed: Option<u64>,
    reward: Option<RewardFn>,
    cancel: Option<CancellationToken>,
}

impl ExecutionRequest {
    pub fn new(request: impl Into<String>) -> Self {
        Self {
            request: request.into(),
            ..Default::default()
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.initial_data.insert(key.into(), value);
        self
    }

    pub fn with_data(mut self, data: DataMap) -> Self {
        self.initial_data.extend(data);
        self
    }

    /// Force a strategy instead of asking the selector.
    pub fn with_strategy(mut self, strategy: StrategyId) -> Self {
        self.strategy = Some(strategy);
        self
    }

    pub fn with_goal(mut self, goal: Goal) -> Self {
        self.goal = Some(goal);
        self
    }

    /// Start from this context instead of the graph's roots.
    pub fn with_entry(mut self, id: impl Into<String>) -> Self {
        self.entry = Some(id.into());
        self
    }

    pub fn halt_on_step_failure(mut self, halt: bool) -> Self {
        self.halt_on_step_failure = Some(halt);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_reward(mut self, reward: RewardFn) -> Self {
        self.reward = Some(reward);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn initial_data(&self) -> &DataMap {
        &self.initial_data
    }
}

/// A completed traversal.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub workflow: String,
    pub strategy: StrategyId,
    /// Successfully executed contexts in execution order.
    pub path: Vec<String>,
    /// Entry-to-terminal chain. For BFS with a goal this is a shortest
    /// route; without a goal it equals `path`.
    pub route: Vec<String>,
    /// Initial data merged with every context's outputs.
    pub outputs: DataMap,
    pub node_outputs: HashMap<String, DataMap>,
    /// Every attempted context, failures included.
    pub trace: Vec<NodeRecord>,
    pub goal_reached: bool,
    pub search: Option<SearchSummary>,
    pub total_elapsed_ms: u64,
}

/// A traversal that stopped with an error.
#[derive(Debug, Error)]
#[error("{error}{}", at_node(.node_id))]
pub struct ExecutionFailure {
    pub error: FlowError,
    /// The context that failed, when the error belongs to one.
    pub node_id: Option<String>,
    pub strategy: Option<StrategyId>,
    /// Contexts that had succeeded before the failure.
    pub partial_path: Vec<String>,
    pub trace: Vec<NodeRecord>,
}

fn at_node(node_id: &Option<String>) -> String {
    node_id
        .as_ref()
        .map(|id| format!(" (context '{}')", id))
        .unwrap_or_default()
}

impl From<FlowError> for ExecutionFailure {
    fn from(error: FlowError) -> Self {
        Self {
            error,
            node_id: None,
            strategy: None,
            partial_path: vec![],
            trace: vec![],
        }
    }
}

/// Executes workflow graphs with a chosen traversal strategy.
///
/// Holds only configuration and shared services; every call to
/// [`execute`](Self::execute) builds fresh traversal state, so one model
/// can serve concurrent requests over the same graph.
pub struct ActionModel {
    config: AppConfig,
    tools: Arc<ToolRegistry>,
    llm: Option<Arc<dyn LlmClient>>,
    selector: StrategySelector,
    event_bus: Arc<EventBus>,
    working_dir: PathBuf,
}

impl ActionModel {
    /// Model with the built-in tools and no strategy policy.
    pub fn new(config: AppConfig) -> Self {
        let tools = ToolRegistry::with_builtins().with_max_timeout(config.tools.timeout_secs);
        Self {
            selector: StrategySelector::new(config.engine.default_strategy),
            working_dir: config.working_dir(),
            tools: Arc::new(tools),
            llm: None,
            event_bus: Arc::new(EventBus::default()),
            config,
        }
    }

    /// Like [`new`](Self::new), also loading `policy_path` when configured.
    pub fn from_config(config: AppConfig) -> Result<Self> {
        let selector = match config.policy_path.as_deref() {
            Some(path) => StrategySelector::from_policy_file(
                std::path::Path::new(path),
                config.engine.default_strategy,
            )?,
            None => StrategySelector::new(config.engine.default_strategy),
        };
        Ok(Self::new(config).with_selector(selector))
    }

    pub fn with_tools(mut self, tools: Arc<ToolRegistry>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn StrategyPolicy>) -> Self {
        self.selector = self.selector.with_policy(policy);
        self
    }

    pub fn with_selector(mut self, selector: StrategySelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = bus;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn selector(&self) -> &StrategySelector {
        &self.selector
    }

    /// The strategy `execute` would use for this request.
    pub fn choose_strategy(&self, graph: &WorkflowGraph, request: &ExecutionRequest) -> StrategyId {
        request.strategy.unwrap_or_else(|| {
            let features = RequestFeatures::from_request(&request.request, &request.initial_data);
            self.selector.select(&features, &WorkflowShape::of(graph))
        })
    }

    fn entries(&self, graph: &WorkflowGraph, request: &ExecutionRequest) -> Result<Vec<NodeIdx>> {
        if let Some(id) = &request.entry {
            let idx = graph
                .index_of(id)
                .ok_or_else(|| FlowError::UnknownNode(id.clone()))?;
            return Ok(vec![idx]);
        }
        let roots = graph.root_indices();
        if roots.is_empty() && !graph.is_empty() {
            return Err(FlowError::InvalidWorkflow(
                "no entry context: every context has a predecessor; set an explicit entry".into(),
            ));
        }
        Ok(roots)
    }

    /// Validate `graph` and traverse it for `request`.
    pub async fn execute(
        &self,
        graph: &WorkflowGraph,
        request: ExecutionRequest,
    ) -> std::result::Result<ExecutionResult, ExecutionFailure> {
        let started = Instant::now();
        self.config.validate()?;
        graph.validate()?;
        let entries = self.entries(graph, &request)?;
        if let Some(Goal::Reached(id)) = &request.goal {
            if !graph.contains(id) {
                return Err(FlowError::UnknownNode(id.clone()).into());
            }
        }

        let strategy = self.choose_strategy(graph, &request);
        let execution_id = ExecutionId::new();
        info!(
            execution_id = %execution_id,
            workflow = %graph.name(),
            strategy = %strategy,
            contexts = graph.len(),
            "Starting traversal"
        );
        self.event_bus.publish(ExecutionEvent::TraversalStarted {
            execution_id: execution_id.clone(),
            workflow: graph.name().to_string(),
            strategy,
        });

        let features = RequestFeatures::from_request(&request.request, &request.initial_data);
        let opts = TraversalOptions {
            goal: request.goal,
            halt_on_step_failure: request
                .halt_on_step_failure
                .unwrap_or(self.config.engine.halt_on_step_failure),
            entries,
            cancel: request.cancel.unwrap_or_default(),
            deadline: self
                .config
                .engine
                .traversal_timeout()
                .map(|d| (started + d, d.as_secs())),
            node_timeout: self.config.engine.node_timeout(),
            tools: self.tools.clone(),
            llm: self.llm.clone(),
            working_dir: self.working_dir.clone(),
            event_bus: self.event_bus.clone(),
        };
        let mut traversal = Traversal {
            graph,
            state: ExecutionState::new(execution_id.clone(), graph.len(), request.initial_data),
            opts,
        };

        let outcome = match strategy {
            StrategyId::Dfs => dfs::run(&mut traversal, &self.config.dfs).await,
            StrategyId::Bfs => bfs::run(&mut traversal, &self.config.bfs).await,
            StrategyId::Mcts | StrategyId::Blended => {
                let blend = strategy == StrategyId::Blended;
                let policy = match self.selector.policy() {
                    Some(policy) => Some(policy.clone()),
                    None if blend => Some(Arc::new(UniformPolicy) as Arc<dyn StrategyPolicy>),
                    None => None,
                };
                let params = SearchParams {
                    policy,
                    features,
                    blend,
                    reward: request.reward,
                    seed: request.seed.unwrap_or(self.config.mcts.seed),
                };
                mcts::run(&mut traversal, &self.config.mcts, params).await
            }
        };
        let total_elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(outcome) => {
                let route = traversal.ids(&outcome.route);
                let (path, outputs, node_outputs, trace) = traversal.state.into_parts();
                info!(
                    execution_id = %execution_id,
                    executed = path.len(),
                    goal_reached = outcome.goal_reached,
                    total_elapsed_ms,
                    "Traversal complete"
                );
                self.event_bus.publish(ExecutionEvent::TraversalFinished {
                    execution_id: execution_id.clone(),
                    succeeded: true,
                    path: path.clone(),
                });
                Ok(ExecutionResult {
                    execution_id,
                    workflow: graph.name().to_string(),
                    strategy,
                    path,
                    route,
                    outputs,
                    node_outputs,
                    trace,
                    goal_reached: outcome.goal_reached,
                    search: outcome.search,
                    total_elapsed_ms,
                })
            }
            Err(Abort { error: e, node_id }) => {
                let (partial_path, _, _, trace) = traversal.state.into_parts();
                error!(
                    execution_id = %execution_id,
                    error = %e,
                    kind = e.kind(),
                    node_id = node_id.as_deref().unwrap_or("-"),
                    "Traversal failed"
                );
                self.event_bus.publish(ExecutionEvent::TraversalFinished {
                    execution_id,
                    succeeded: false,
                    path: partial_path.clone(),
                });
                Err(ExecutionFailure {
                    error: e,
                    node_id,
                    strategy: Some(strategy),
                    partial_path,
                    trace,
                })
            }
        }
    }

    /// Run a single context outside any traversal and return its outputs.
    pub async fn execute_context(
        &self,
        graph: &WorkflowGraph,
        id: &str,
        data: DataMap,
    ) -> Result<DataMap> {
        let context = graph
            .context(id)
            .ok_or_else(|| FlowError::UnknownNode(id.to_string()))?;
        let behavior = graph
            .behavior(id)
            .ok_or_else(|| FlowError::MissingBehavior(id.to_string()))?;
        let step = StepContext {
            execution_id: ExecutionId::new(),
            node_id: id.to_string(),
            tools: self.tools.clone(),
            llm: self.llm.clone(),
            working_dir: self.working_dir.clone(),
            cancel: CancellationToken::new(),
        };
        let run = behavior.run(context, context.gather_inputs(&data), step);
        match self.config.engine.node_timeout() {
            Some(limit) => tokio::time::timeout(limit, run)
                .await
                .map_err(|_| FlowError::Timeout(limit.as_secs()))?,
            None => run.await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::FnBehavior;
    use crate::graph::Context;
    use serde_json::json;

    fn upper() -> FnBehavior<impl Fn(&Context, DataMap) -> Result<DataMap> + Send + Sync + 'static> {
        FnBehavior::new(|ctx: &Context, inputs: DataMap| {
            let mut out = DataMap::new();
            let text = inputs
                .values()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            for key in &ctx.output_keys {
                out.insert(key.clone(), json!(text.to_uppercase()));
            }
            Ok(out)
        })
    }

    fn pipeline() -> WorkflowGraph {
        let mut g = WorkflowGraph::new("pipeline");
        g.add_context(
            Context::new("a", "A").with_inputs(["input"]).with_outputs(["processed"]),
            upper(),
        )
        .unwrap();
        g.add_context(
            Context::new("b", "B").with_inputs(["processed"]).with_outputs(["result"]),
            upper(),
        )
        .unwrap();
        g.connect("a", "b").unwrap();
        g
    }

    #[tokio::test]
    async fn test_execute_merges_outputs() {
        let model = ActionModel::new(AppConfig::default());
        let result = model
            .execute(
                &pipeline(),
                ExecutionRequest::new("go").with_input("input", json!("hello")),
            )
            .await
            .unwrap();

        assert_eq!(result.strategy, StrategyId::Dfs);
        assert_eq!(result.path, vec!["a", "b"]);
        assert_eq!(result.outputs["input"], json!("hello"));
        assert_eq!(result.outputs["result"], json!("HELLO"));
        assert_eq!(result.node_outputs["a"]["processed"], json!("HELLO"));
        assert_eq!(result.trace.len(), 2);
        assert!(!result.goal_reached);
    }

    #[tokio::test]
    async fn test_unknown_entry_and_goal_rejected() {
        let model = ActionModel::new(AppConfig::default());
        let err = model
            .execute(&pipeline(), ExecutionRequest::new("").with_entry("zz"))
            .await
            .unwrap_err();
        assert!(matches!(err.error, FlowError::UnknownNode(_)));

        let err = model
            .execute(&pipeline(), ExecutionRequest::new("").with_goal(Goal::reached("zz")))
            .await
            .unwrap_err();
        assert!(matches!(err.error, FlowError::UnknownNode(_)));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_traversal() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let runs = Arc::new(AtomicUsize::new(0));
        let mut g = WorkflowGraph::new("counted");
        for id in ["a", "b"] {
            let runs = runs.clone();
            g.add_context(
                Context::new(id, id),
                FnBehavior::new(move |_: &Context, _: DataMap| {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok(DataMap::new())
                }),
            )
            .unwrap();
        }
        g.connect("a", "b").unwrap();

        let mut config = AppConfig::default();
        config.mcts.rollout_batch = 0;
        let err = ActionModel::new(config)
            .execute(&g, ExecutionRequest::new("").with_strategy(StrategyId::Mcts))
            .await
            .unwrap_err();
        assert!(matches!(err.error, FlowError::Config(_)), "{}", err.error);

        let mut config = AppConfig::default();
        config.dfs.max_depth = 0;
        let err = ActionModel::new(config)
            .execute(&g, ExecutionRequest::new("").with_strategy(StrategyId::Dfs))
            .await
            .unwrap_err();
        assert!(matches!(err.error, FlowError::Config(_)), "{}", err.error);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cycle_without_roots_needs_entry() {
        let mut g = WorkflowGraph::new("ring");
        g.add_context(Context::new("a", "A"), upper()).unwrap();
        g.add_context(Context::new("b", "B"), upper()).unwrap();
        g.connect("a", "b").unwrap();
        g.connect("b", "a").unwrap();

        let model = ActionModel::new(AppConfig::default());
        let err = model.execute(&g, ExecutionRequest::new("")).await.unwrap_err();
        assert!(matches!(err.error, FlowError::InvalidWorkflow(_)));

        let result = model
            .execute(&g, ExecutionRequest::new("").with_entry("b"))
            .await
            .unwrap();
        assert_eq!(result.path, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_events_published() {
        let model = ActionModel::new(AppConfig::default());
        let mut rx = model.event_bus().subscribe();
        model
            .execute(&pipeline(), ExecutionRequest::new("").with_input("input", json!("x")))
            .await
            .unwrap();

        let mut kinds = Vec::new();
        while let Ok(event) = rx.try_recv() {
            kinds.push(match event {
                ExecutionEvent::TraversalStarted { .. } => "start",
                ExecutionEvent::NodeStarted { .. } => "node",
                ExecutionEvent::NodeFinished { .. } => "done",
                ExecutionEvent::TraversalFinished { succeeded: true, .. } => "finish",
                _ => "other",
            });
        }
        assert_eq!(kinds, vec!["start", "node", "done", "node", "done", "finish"]);
    }

    #[tokio::test]
    async fn test_execute_context_standalone() {
        let model = ActionModel::new(AppConfig::default());
        let mut data = DataMap::new();
        data.insert("processed".into(), json!("mid"));
        let out = model.execute_context(&pipeline(), "b", data).await.unwrap();
        assert_eq!(out["result"], json!("MID"));

        let err = model
            .execute_context(&pipeline(), "zz", DataMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::UnknownNode(_)));
    }

    #[test]
    fn test_failure_display_names_context() {
        let failure = ExecutionFailure {
            node_id: Some("b".into()),
            ..ExecutionFailure::from(FlowError::Cancelled)
        };
        assert_eq!(failure.to_string(), "Traversal cancelled (context 'b')");
        assert_eq!(ExecutionFailure::from(FlowError::Cancelled).to_string(), "Traversal cancelled");
    }
}
