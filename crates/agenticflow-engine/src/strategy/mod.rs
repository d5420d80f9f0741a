//! Traversal strategies.
//!
//! All strategies share [`Traversal`], which owns the per-request state
//! and runs one context at a time with the request's time budgets and
//! cancellation applied. The strategies only decide the order.

pub(crate) mod bfs;
pub(crate) mod dfs;
pub(crate) mod mcts;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use agenticflow_core::error::FlowError;
use agenticflow_core::traits::LlmClient;
use agenticflow_core::types::ExecutionEvent;
use agenticflow_core::EventBus;
use agenticflow_tools::ToolRegistry;

use crate::behavior::StepContext;
use crate::goal::Goal;
use crate::graph::{NodeIdx, WorkflowGraph};
use crate::state::ExecutionState;

pub use mcts::{ChildStats, RewardFn, RolloutOutcome, SearchSummary};

/// Why a traversal stopped early, and where.
#[derive(Debug)]
pub(crate) struct Abort {
    pub error: FlowError,
    pub node_id: Option<String>,
}

impl From<FlowError> for Abort {
    fn from(error: FlowError) -> Self {
        Self {
            error,
            node_id: None,
        }
    }
}

/// What a strategy hands back on success.
#[derive(Debug, Default)]
pub(crate) struct StrategyOutcome {
    /// Entry-to-terminal chain, as context indices.
    pub route: Vec<NodeIdx>,
    pub goal_reached: bool,
    pub search: Option<SearchSummary>,
}

pub(crate) enum StepOutcome {
    Succeeded,
    Failed,
}

/// Settings fixed for the lifetime of one traversal.
pub(crate) struct TraversalOptions {
    pub goal: Option<Goal>,
    pub halt_on_step_failure: bool,
    pub entries: Vec<NodeIdx>,
    pub cancel: CancellationToken,
    pub deadline: Option<(Instant, u64)>,
    pub node_timeout: Option<Duration>,
    pub tools: Arc<ToolRegistry>,
    pub llm: Option<Arc<dyn LlmClient>>,
    pub working_dir: PathBuf,
    pub event_bus: Arc<EventBus>,
}

impl TraversalOptions {
    pub fn budget(&self) -> Budget {
        Budget {
            cancel: self.cancel.clone(),
            deadline: self.deadline,
        }
    }
}

/// Cancellation and deadline of one traversal, checkable from any thread.
#[derive(Clone)]
pub(crate) struct Budget {
    cancel: CancellationToken,
    deadline: Option<(Instant, u64)>,
}

impl Budget {
    /// Fail fast when the request was cancelled or its deadline passed.
    pub fn check(&self) -> Result<(), Abort> {
        if self.cancel.is_cancelled() {
            return Err(FlowError::Cancelled.into());
        }
        if let Some((deadline, secs)) = self.deadline {
            if Instant::now() >= deadline {
                return Err(FlowError::Timeout(secs).into());
            }
        }
        Ok(())
    }
}

pub(crate) struct Traversal<'g> {
    pub graph: &'g WorkflowGraph,
    pub state: ExecutionState,
    pub opts: TraversalOptions,
}

impl<'g> Traversal<'g> {
    pub fn goal_met(&self) -> bool {
        match &self.opts.goal {
            Some(goal) => goal.is_met(self.state.data(), |id| self.state.has_executed_id(id)),
            None => false,
        }
    }

    pub fn has_goal(&self) -> bool {
        self.opts.goal.is_some()
    }

    /// Whether `target` may be entered from `from` given the current data.
    pub fn can_enter(&self, from: Option<NodeIdx>, target: NodeIdx) -> bool {
        match from {
            None => true,
            Some(from) => self
                .graph
                .out_edges(from)
                .iter()
                .filter(|e| e.target == target)
                .any(|e| self.graph.edge_at(e.edge).is_traversable(self.state.data())),
        }
    }

    pub fn check_budget(&self) -> Result<(), Abort> {
        self.opts.budget().check()
    }

    /// Run one context and record the result.
    ///
    /// Step failures come back as [`StepOutcome::Failed`] when the request
    /// continues past them; otherwise, and for fatal errors, the traversal
    /// aborts citing this context.
    pub async fn run_node(&mut self, idx: NodeIdx) -> Result<StepOutcome, Abort> {
        let graph = self.graph;
        let context = graph.context_at(idx);
        let node_id = context.id.clone();

        if self.state.is_settled(idx) {
            return Err(Abort {
                error: FlowError::InvalidWorkflow(format!(
                    "context '{}' already ran in this traversal",
                    node_id
                )),
                node_id: Some(node_id),
            });
        }
        self.check_budget().map_err(|mut abort| {
            abort.node_id = Some(node_id.clone());
            abort
        })?;

        let behavior = graph
            .behavior_at(idx)
            .ok_or_else(|| Abort {
                error: FlowError::MissingBehavior(node_id.clone()),
                node_id: Some(node_id.clone()),
            })?
            .clone();

        let execution_id = self.state.execution_id().clone();
        let inputs = context.gather_inputs(self.state.data());
        let step = StepContext {
            execution_id: execution_id.clone(),
            node_id: node_id.clone(),
            tools: self.opts.tools.clone(),
            llm: self.opts.llm.clone(),
            working_dir: self.opts.working_dir.clone(),
            cancel: self.opts.cancel.child_token(),
        };

        info!(node_id = %node_id, node_name = %context.name, "Executing context");
        self.opts.event_bus.publish(ExecutionEvent::NodeStarted {
            execution_id: execution_id.clone(),
            node_id: node_id.clone(),
        });

        let started_at = Utc::now();
        let started = Instant::now();
        let limit = self.step_limit(started);
        let run = behavior.run(context, inputs, step);

        let result = tokio::select! {
            result = async {
                match limit {
                    Some((until, secs)) => match tokio::time::timeout_at(until, run).await {
                        Ok(result) => result,
                        Err(_) => Err(FlowError::Timeout(secs)),
                    },
                    None => run.await,
                }
            } => result,
            _ = self.opts.cancel.cancelled() => Err(FlowError::Cancelled),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(outputs) => {
                let undeclared = context
                    .output_keys
                    .iter()
                    .filter(|k| !outputs.contains_key(k.as_str()))
                    .count();
                if undeclared > 0 {
                    warn!(node_id = %node_id, missing = undeclared, "Context did not produce all declared outputs");
                }
                debug!(node_id = %node_id, elapsed_ms, outputs = outputs.len(), "Context complete");
                self.state
                    .record_success(idx, &node_id, outputs, started_at, elapsed_ms);
                self.opts.event_bus.publish(ExecutionEvent::NodeFinished {
                    execution_id,
                    node_id,
                    elapsed_ms,
                });
                Ok(StepOutcome::Succeeded)
            }
            Err(e) => {
                error!(node_id = %node_id, error = %e, elapsed_ms, "Context failed");
                self.state
                    .record_failure(idx, &node_id, e.to_string(), started_at, elapsed_ms);
                self.opts.event_bus.publish(ExecutionEvent::NodeFailed {
                    execution_id,
                    node_id: node_id.clone(),
                    error: e.to_string(),
                });
                if e.is_fatal() || self.opts.halt_on_step_failure {
                    Err(Abort {
                        error: e,
                        node_id: Some(node_id),
                    })
                } else {
                    Ok(StepOutcome::Failed)
                }
            }
        }
    }

    /// The earlier of the node budget and the traversal deadline, with the
    /// budget in seconds reported on expiry.
    fn step_limit(&self, started: Instant) -> Option<(Instant, u64)> {
        let node = self
            .opts
            .node_timeout
            .map(|d| (started + d, d.as_secs()));
        match (node, self.opts.deadline) {
            (Some(n), Some(t)) => Some(if n.0 <= t.0 { n } else { t }),
            (n, t) => n.or(t),
        }
    }

    /// Translate context indices into ids.
    pub fn ids(&self, route: &[NodeIdx]) -> Vec<String> {
        route
            .iter()
            .map(|&idx| self.graph.id_at(idx).to_string())
            .collect()
    }

    /// Finish a frontier that ran dry: fine without a goal, an error with one.
    pub fn exhausted(&self) -> Result<(), Abort> {
        if self.has_goal() {
            return Err(FlowError::GoalUnreachable {
                executed: self.state.path().len(),
            }
            .into());
        }
        Ok(())
    }
}
