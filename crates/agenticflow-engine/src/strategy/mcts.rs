use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::time::Instant;

use tracing::{debug, info};

use agenticflow_core::config::MctsConfig;
use agenticflow_core::error::FlowError;
use agenticflow_core::types::{DataMap, ExecutionEvent, ExecutionId};
use agenticflow_core::EventBus;

use super::{Abort, Budget, StepOutcome, StrategyOutcome, Traversal};
use crate::goal::Goal;
use crate::graph::{HandoffContext, NodeIdx, WorkflowGraph};
use crate::selector::{clamp_score, Neighborhood, RequestFeatures, StrategyPolicy};

/// Caller-supplied reward for a finished rollout. Non-finite values count as 0.
pub type RewardFn = Arc<dyn Fn(&RolloutOutcome<'_>) -> f64 + Send + Sync>;

/// What a rollout reached, handed to a [`RewardFn`].
#[derive(Debug)]
pub struct RolloutOutcome<'a> {
    pub goal_met: bool,
    /// The rollout ended on a context without successors.
    pub reached_leaf: bool,
    /// Edges followed beyond the search tree.
    pub steps: usize,
    /// Contexts entered more than once.
    pub revisits: usize,
    /// Context ids from the search root to the rollout's last context.
    pub path: Vec<&'a str>,
    /// Initial data with every visited context's declared outputs bound.
    pub data: &'a DataMap,
}

/// Visit statistics for one child of the search root.
#[derive(Debug, Clone, Serialize)]
pub struct ChildStats {
    pub node_id: String,
    pub visits: u32,
    pub mean_value: f64,
}

/// Summary of the planning phase.
#[derive(Debug, Clone, Serialize)]
pub struct SearchSummary {
    pub iterations: usize,
    /// Context at the search root; `None` when several entries share a
    /// synthetic root.
    pub root: Option<String>,
    /// Root children in expansion order.
    pub children: Vec<ChildStats>,
    /// Most visited root child.
    pub best_action: Option<String>,
    pub tree_size: usize,
}

/// Inputs beyond the MCTS configuration.
pub(crate) struct SearchParams {
    pub policy: Option<Arc<dyn StrategyPolicy>>,
    pub features: RequestFeatures,
    /// Add the policy score to the UCB term.
    pub blend: bool,
    pub reward: Option<RewardFn>,
    pub seed: u64,
}

struct SearchNode {
    /// `None` only for the synthetic root above several entries.
    node: Option<NodeIdx>,
    parent: Option<usize>,
    children: Vec<usize>,
    /// Successors not yet expanded, in connection order.
    untried: Vec<NodeIdx>,
    visits: u32,
    total_reward: f64,
    mean_value: f64,
    /// Policy score of the edge leading here.
    prior: f64,
}

struct SearchTree {
    nodes: Vec<SearchNode>,
}

impl SearchTree {
    /// Graph contexts on the tree path from the root to `idx`.
    fn path_to(&self, idx: usize) -> Vec<NodeIdx> {
        let mut path = Vec::new();
        let mut cursor = Some(idx);
        while let Some(i) = cursor {
            if let Some(node) = self.nodes[i].node {
                path.push(node);
            }
            cursor = self.nodes[i].parent;
        }
        path.reverse();
        path
    }

    fn backpropagate(&mut self, leaf: usize, reward: f64) {
        let mut cursor = Some(leaf);
        while let Some(i) = cursor {
            let node = &mut self.nodes[i];
            node.visits += 1;
            node.total_reward += reward;
            node.mean_value = node.total_reward / node.visits as f64;
            cursor = node.parent;
        }
    }

    /// Children ordered by visits, then mean value, then expansion order.
    fn ranked_children(&self, idx: usize) -> Vec<usize> {
        let mut children = self.nodes[idx].children.clone();
        children.sort_by(|&a, &b| {
            let (a, b) = (&self.nodes[a], &self.nodes[b]);
            b.visits.cmp(&a.visits).then(
                b.mean_value
                    .partial_cmp(&a.mean_value)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        });
        children
    }
}

struct Rollout {
    reward: f64,
    goal_met: bool,
    trajectory: Vec<NodeIdx>,
}

/// Everything planning reads, owned so the search can leave the async task.
/// Shared read-only across rollout threads.
struct Planner {
    graph: WorkflowGraph,
    config: MctsConfig,
    goal: Option<Goal>,
    snapshot: DataMap,
    excluded: Vec<bool>,
    entries: Vec<NodeIdx>,
    /// Policy scores aligned with each context's out-edges.
    edge_scores: Option<Vec<Vec<f64>>>,
    /// Policy scores aligned with `entries`.
    entry_scores: Option<Vec<f64>>,
    blend: bool,
    reward: Option<RewardFn>,
    seed: u64,
}

/// Result of the planning phase.
struct Plan {
    tree: SearchTree,
    /// Highest-reward rollout that met the goal.
    best_trajectory: Option<Vec<NodeIdx>>,
    iterations: usize,
}

/// Where batch progress is reported.
struct Progress {
    event_bus: Arc<EventBus>,
    execution_id: ExecutionId,
}

impl Planner {
    fn candidates(&self, from: Option<NodeIdx>) -> Vec<(NodeIdx, f64)> {
        match from {
            Some(node) => self
                .graph
                .out_edges(node)
                .iter()
                .enumerate()
                .filter(|(_, e)| !self.excluded[e.target])
                .map(|(k, e)| {
                    let score = self.edge_scores.as_ref().map_or(1.0, |s| s[node][k]);
                    (e.target, score)
                })
                .collect(),
            None => self
                .entries
                .iter()
                .enumerate()
                .filter(|(_, e)| !self.excluded[**e])
                .map(|(k, &e)| {
                    let score = self.entry_scores.as_ref().map_or(1.0, |s| s[k]);
                    (e, score)
                })
                .collect(),
        }
    }

    fn new_node(&self, node: Option<NodeIdx>, parent: Option<usize>, path: &[NodeIdx], prior: f64) -> SearchNode {
        let mut untried = Vec::new();
        for (target, _) in self.candidates(node) {
            if !path.contains(&target) && !untried.contains(&target) {
                untried.push(target);
            }
        }
        SearchNode {
            node,
            parent,
            children: vec![],
            untried,
            visits: 0,
            total_reward: 0.0,
            mean_value: 0.0,
            prior,
        }
    }

    fn prior(&self, from: Option<NodeIdx>, to: NodeIdx) -> f64 {
        self.candidates(from)
            .into_iter()
            .find(|(t, _)| *t == to)
            .map_or(1.0, |(_, s)| s)
    }

    fn select_child(&self, tree: &SearchTree, parent: usize) -> usize {
        let node = &tree.nodes[parent];
        let ln_parent = (node.visits.max(1) as f64).ln();
        let mut best = node.children[0];
        let mut best_score = f64::NEG_INFINITY;
        for &c in &node.children {
            let child = &tree.nodes[c];
            let score = if child.visits == 0 {
                f64::INFINITY
            } else {
                let exploit = child.mean_value;
                let explore =
                    self.config.exploration_constant * (ln_parent / child.visits as f64).sqrt();
                let guided = if self.blend {
                    self.config.policy_weight * child.prior
                } else {
                    0.0
                };
                exploit + explore + guided
            };
            if score > best_score {
                best = c;
                best_score = score;
            }
        }
        best
    }

    /// Selection then expansion. Returns the tree node to simulate from.
    fn descend(&self, tree: &mut SearchTree) -> usize {
        let mut cursor = 0;
        while tree.nodes[cursor].untried.is_empty() && !tree.nodes[cursor].children.is_empty() {
            cursor = self.select_child(tree, cursor);
        }
        if tree.nodes[cursor].untried.is_empty() {
            return cursor;
        }

        let target = tree.nodes[cursor].untried.remove(0);
        let mut path = tree.path_to(cursor);
        let prior = self.prior(tree.nodes[cursor].node, target);
        path.push(target);
        let child = self.new_node(Some(target), Some(cursor), &path, prior);
        let idx = tree.nodes.len();
        tree.nodes.push(child);
        tree.nodes[cursor].children.push(idx);
        idx
    }

    fn goal_met(&self, data: &DataMap, visited: &[bool]) -> bool {
        let executed = |id: &str| self.graph.index_of(id).is_some_and(|i| visited[i]);
        match &self.goal {
            Some(goal) => goal.is_met_projected(data, executed),
            None => false,
        }
    }

    /// Simulate from the end of `path` without running any context.
    fn rollout(&self, path: &[NodeIdx], iteration: usize) -> Rollout {
        let mut rng = StdRng::seed_from_u64(
            self.seed ^ (iteration as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15),
        );
        let mut projected = HandoffContext::from_map(self.snapshot.clone());
        let mut visited = vec![false; self.graph.len()];
        for &node in path {
            visited[node] = true;
            projected.project_keys(&self.graph.context_at(node).output_keys);
        }

        let mut trajectory = path.to_vec();
        let mut current = path.last().copied();
        let mut goal_met = self.goal_met(projected.data(), &visited);
        let mut multiplier = 1.0;
        let mut steps = 0;
        let mut revisits = 0;

        while !goal_met && steps < self.config.max_rollout_depth {
            let candidates = self.candidates(current);
            if candidates.is_empty() {
                break;
            }
            let pick = if self.edge_scores.is_some() {
                weighted_pick(&candidates, &mut rng)
            } else {
                rng.gen_range(0..candidates.len())
            };
            let next = candidates[pick].0;
            if visited[next] {
                multiplier *= self.config.revisit_decay;
                revisits += 1;
            }
            visited[next] = true;
            projected.project_keys(&self.graph.context_at(next).output_keys);
            trajectory.push(next);
            current = Some(next);
            steps += 1;
            goal_met = self.goal_met(projected.data(), &visited);
        }

        let reached_leaf = current.is_some_and(|c| self.graph.out_edges(c).is_empty());
        let base = match &self.reward {
            Some(f) => {
                let outcome = RolloutOutcome {
                    goal_met,
                    reached_leaf,
                    steps,
                    revisits,
                    path: trajectory.iter().map(|&i| self.graph.id_at(i)).collect(),
                    data: projected.data(),
                };
                f(&outcome)
            }
            None if self.goal.is_some() => f64::from(u8::from(goal_met)),
            None => f64::from(u8::from(reached_leaf)),
        };
        let base = if base.is_finite() { base } else { 0.0 };

        Rollout {
            reward: base * multiplier,
            goal_met,
            trajectory,
        }
    }
}

fn weighted_pick(candidates: &[(NodeIdx, f64)], rng: &mut StdRng) -> usize {
    let weights: Vec<f64> = candidates.iter().map(|(_, s)| s.max(1e-6)).collect();
    let total: f64 = weights.iter().sum();
    let mut roll = rng.gen::<f64>() * total;
    for (i, w) in weights.iter().enumerate() {
        if roll < *w {
            return i;
        }
        roll -= w;
    }
    weights.len() - 1
}

fn score_edges(
    graph: &WorkflowGraph,
    entries: &[NodeIdx],
    policy: &dyn StrategyPolicy,
    features: &RequestFeatures,
) -> (Vec<Vec<f64>>, Vec<f64>) {
    let neighborhood = |parent: Option<NodeIdx>, target: NodeIdx| Neighborhood {
        parent: parent.map(|p| graph.context_at(p)),
        successors: graph
            .out_edges(target)
            .iter()
            .map(|e| graph.context_at(e.target))
            .collect(),
    };
    let edge_scores = (0..graph.len())
        .map(|from| {
            graph
                .out_edges(from)
                .iter()
                .map(|e| {
                    let hood = neighborhood(Some(from), e.target);
                    clamp_score(policy.score_node(features, graph.context_at(e.target), &hood))
                })
                .collect()
        })
        .collect();
    let entry_scores = entries
        .iter()
        .map(|&e| {
            let hood = neighborhood(None, e);
            clamp_score(policy.score_node(features, graph.context_at(e), &hood))
        })
        .collect();
    (edge_scores, entry_scores)
}

/// Monte-Carlo tree search.
///
/// Plans symbolically over a snapshot of the accumulated data: rollouts
/// only project declared output keys and never run a context. The search
/// runs on the blocking pool. Rollouts within a batch are simulated in
/// parallel and merged into the tree in iteration order, so a fixed seed
/// and batch size give the same tree.
/// The plan is then executed by following the most visited children,
/// falling back to the next candidate when a step fails.
pub(crate) async fn run(
    t: &mut Traversal<'_>,
    config: &MctsConfig,
    params: SearchParams,
) -> Result<StrategyOutcome, Abort> {
    let graph = t.graph;
    let entries = t.opts.entries.clone();

    let (edge_scores, entry_scores) = match &params.policy {
        Some(policy) => {
            let (e, r) = score_edges(graph, &entries, policy.as_ref(), &params.features);
            (Some(e), Some(r))
        }
        None => (None, None),
    };

    let planner = Planner {
        graph: graph.clone(),
        config: config.clone(),
        goal: t.opts.goal.clone(),
        snapshot: t.state.data().clone(),
        excluded: (0..graph.len()).map(|i| t.state.is_settled(i)).collect(),
        entries,
        edge_scores,
        entry_scores,
        blend: params.blend,
        reward: params.reward,
        seed: params.seed,
    };
    let budget = t.opts.budget();
    let progress = Progress {
        event_bus: t.opts.event_bus.clone(),
        execution_id: t.state.execution_id().clone(),
    };

    let plan = tokio::task::spawn_blocking(move || planner.search(&budget, &progress))
        .await
        .map_err(|e| Abort::from(FlowError::Policy(format!("search task failed: {}", e))))??;

    let summary = summarize(graph, &plan.tree, plan.iterations);
    info!(
        iterations = plan.iterations,
        tree_size = summary.tree_size,
        best_action = summary.best_action.as_deref().unwrap_or("-"),
        "Search complete"
    );

    let (route, goal_reached) = walk(t, &plan.tree, plan.best_trajectory.as_deref()).await?;
    if !goal_reached {
        t.exhausted()?;
    }
    Ok(StrategyOutcome {
        route,
        goal_reached,
        search: Some(summary),
    })
}

impl Planner {
    /// Run the iteration budget. Blocking: call it off the async runtime.
    fn search(&self, budget: &Budget, progress: &Progress) -> Result<Plan, Abort> {
        let root = match self.entries.as_slice() {
            [single] => self.new_node(Some(*single), None, &[*single], 1.0),
            _ => self.new_node(None, None, &[], 1.0),
        };
        let mut tree = SearchTree { nodes: vec![root] };
        let mut best_trajectory: Option<(f64, Vec<NodeIdx>)> = None;

        let started = Instant::now();
        let time_limit = self.config.time_limit();
        let unbounded = self.config.iterations == 0 && time_limit.is_some();
        let mut iterations = 0;

        loop {
            if !unbounded && iterations >= self.config.iterations {
                break;
            }
            if time_limit.is_some_and(|limit| started.elapsed() >= limit) {
                break;
            }
            budget.check()?;

            let batch = if unbounded {
                self.config.rollout_batch
            } else {
                self.config.rollout_batch.min(self.config.iterations - iterations)
            };
            let leaves: Vec<(usize, Vec<NodeIdx>)> = (0..batch)
                .map(|_| {
                    let leaf = self.descend(&mut tree);
                    (leaf, tree.path_to(leaf))
                })
                .collect();

            let rollouts = if batch > 1 {
                self.simulate_parallel(&leaves, iterations)?
            } else {
                leaves
                    .iter()
                    .enumerate()
                    .map(|(k, (_, path))| self.rollout(path, iterations + k))
                    .collect()
            };

            for ((leaf, _), rollout) in leaves.iter().zip(rollouts) {
                tree.backpropagate(*leaf, rollout.reward);
                if rollout.goal_met
                    && best_trajectory
                        .as_ref()
                        .map_or(true, |(r, _)| rollout.reward > *r)
                {
                    best_trajectory = Some((rollout.reward, rollout.trajectory));
                }
            }
            iterations += batch;

            progress.event_bus.publish(ExecutionEvent::MctsBatchComplete {
                execution_id: progress.execution_id.clone(),
                iterations,
            });
        }

        Ok(Plan {
            tree,
            best_trajectory: best_trajectory.map(|(_, path)| path),
            iterations,
        })
    }

    fn simulate_parallel(
        &self,
        leaves: &[(usize, Vec<NodeIdx>)],
        first_iteration: usize,
    ) -> Result<Vec<Rollout>, Abort> {
        std::thread::scope(|scope| {
            let handles: Vec<_> = leaves
                .iter()
                .enumerate()
                .map(|(k, (_, path))| scope.spawn(move || self.rollout(path, first_iteration + k)))
                .collect();
            handles
                .into_iter()
                .map(|h| {
                    h.join()
                        .map_err(|_| Abort::from(FlowError::Policy("rollout thread panicked".into())))
                })
                .collect()
        })
    }
}

fn summarize(graph: &WorkflowGraph, tree: &SearchTree, iterations: usize) -> SearchSummary {
    let root = &tree.nodes[0];
    let children = root
        .children
        .iter()
        .filter_map(|&c| {
            let child = &tree.nodes[c];
            child.node.map(|n| ChildStats {
                node_id: graph.id_at(n).to_string(),
                visits: child.visits,
                mean_value: child.mean_value,
            })
        })
        .collect();
    let best_action = tree
        .ranked_children(0)
        .first()
        .and_then(|&c| tree.nodes[c].node)
        .map(|n| graph.id_at(n).to_string());

    SearchSummary {
        iterations,
        root: root.node.map(|n| graph.id_at(n).to_string()),
        children,
        best_action,
        tree_size: tree.nodes.len(),
    }
}

/// Execute the plan: ranked tree children first, then the remaining
/// successors with the best goal-reaching rollout's next step in front.
async fn walk(
    t: &mut Traversal<'_>,
    tree: &SearchTree,
    trajectory: Option<&[NodeIdx]>,
) -> Result<(Vec<NodeIdx>, bool), Abort> {
    let graph = t.graph;
    let mut route: Vec<NodeIdx> = Vec::new();
    let mut cursor: Option<usize> = Some(0);

    if let Some(entry) = tree.nodes[0].node {
        if let StepOutcome::Failed = t.run_node(entry).await? {
            return Ok((route, false));
        }
        route.push(entry);
        if t.goal_met() {
            return Ok((route, true));
        }
    }

    loop {
        let current = route.last().copied();
        let mut candidates: Vec<(NodeIdx, Option<usize>)> = Vec::new();
        if let Some(c) = cursor {
            for child in tree.ranked_children(c) {
                if let Some(node) = tree.nodes[child].node {
                    candidates.push((node, Some(child)));
                }
            }
        }
        let preferred = trajectory
            .filter(|traj| traj.len() > route.len() && traj.starts_with(&route))
            .map(|traj| traj[route.len()]);
        let mut successors: Vec<NodeIdx> = match current {
            Some(c) => graph.out_edges(c).iter().map(|e| e.target).collect(),
            None => t.opts.entries.clone(),
        };
        if let Some(p) = preferred {
            if let Some(pos) = successors.iter().position(|&s| s == p) {
                successors.remove(pos);
                successors.insert(0, p);
            }
        }
        for s in successors {
            if !candidates.iter().any(|(n, _)| *n == s) {
                candidates.push((s, None));
            }
        }

        let mut advanced = false;
        for (node, tree_idx) in candidates {
            if t.state.is_settled(node) {
                continue;
            }
            if !t.can_enter(current, node) {
                debug!(node_id = graph.id_at(node), "Edge condition not met, skipping planned step");
                continue;
            }
            if let StepOutcome::Succeeded = t.run_node(node).await? {
                route.push(node);
                cursor = tree_idx;
                advanced = true;
                break;
            }
        }

        if !advanced {
            return Ok((route, false));
        }
        if t.goal_met() {
            return Ok((route, true));
        }
    }
}
