use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use agenticflow_core::error::{FlowError, Result};
use agenticflow_core::types::{DataMap, StrategyId};

use crate::graph::{Context, WorkflowGraph};

/// Features extracted from an incoming request.
#[derive(Debug, Clone, Default)]
pub struct RequestFeatures {
    pub request: String,
    /// Initial data keys, sorted.
    pub input_keys: Vec<String>,
    /// Numeric view of the request: word count plus every numeric or
    /// boolean initial value.
    pub numeric: HashMap<String, f64>,
}

impl RequestFeatures {
    pub fn from_request(request: &str, data: &DataMap) -> Self {
        let mut input_keys: Vec<String> = data.keys().cloned().collect();
        input_keys.sort();

        let mut numeric = HashMap::new();
        numeric.insert(
            "request_words".to_string(),
            request.split_whitespace().count() as f64,
        );
        for (key, value) in data {
            let v = match value {
                serde_json::Value::Number(n) => n.as_f64(),
                serde_json::Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
                _ => None,
            };
            if let Some(v) = v {
                numeric.insert(key.clone(), v);
            }
        }

        Self {
            request: request.to_string(),
            input_keys,
            numeric,
        }
    }

    pub fn value(&self, name: &str) -> f64 {
        self.numeric.get(name).copied().unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopologyKind {
    /// Single path, every context has at most one successor.
    Chain,
    /// No context has more than one predecessor.
    Tree,
    /// Acyclic with fan-in.
    Dag,
    Cyclic,
}

/// Structural summary of a workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowShape {
    pub node_count: usize,
    pub edge_count: usize,
    pub root_count: usize,
    pub leaf_count: usize,
    pub max_out_degree: usize,
    pub kind: TopologyKind,
}

impl WorkflowShape {
    pub fn of(graph: &WorkflowGraph) -> Self {
        let n = graph.len();
        let max_out_degree = (0..n).map(|i| graph.out_edges(i).len()).max().unwrap_or(0);
        let max_in_degree = (0..n).map(|i| graph.in_degree(i)).max().unwrap_or(0);
        let root_count = graph.roots().len();

        let kind = if graph.is_cyclic() {
            TopologyKind::Cyclic
        } else if max_in_degree <= 1 && max_out_degree <= 1 && root_count <= 1 {
            TopologyKind::Chain
        } else if max_in_degree <= 1 {
            TopologyKind::Tree
        } else {
            TopologyKind::Dag
        };

        Self {
            node_count: n,
            edge_count: (0..n).map(|i| graph.out_edges(i).len()).sum(),
            root_count,
            leaf_count: graph.leaves().len(),
            max_out_degree,
            kind,
        }
    }
}

/// The immediate surroundings of a candidate context.
#[derive(Debug, Clone, Default)]
pub struct Neighborhood<'a> {
    /// The context the candidate would be reached from; `None` for entries.
    pub parent: Option<&'a Context>,
    pub successors: Vec<&'a Context>,
}

/// Per-strategy preference weights.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyWeights {
    #[serde(default)]
    pub dfs: f64,
    #[serde(default)]
    pub bfs: f64,
    #[serde(default)]
    pub mcts: f64,
    #[serde(default)]
    pub blended: f64,
}

impl StrategyWeights {
    pub fn get(&self, id: StrategyId) -> f64 {
        match id {
            StrategyId::Dfs => self.dfs,
            StrategyId::Bfs => self.bfs,
            StrategyId::Mcts => self.mcts,
            StrategyId::Blended => self.blended,
        }
    }

    /// Highest weight wins; ties go to the earlier of dfs, bfs, mcts,
    /// blended. NaN weights never win.
    pub fn best(&self) -> StrategyId {
        let mut best = StrategyId::ALL[0];
        let mut best_weight = f64::NEG_INFINITY;
        for id in StrategyId::ALL {
            let w = self.get(id);
            if !w.is_nan() && w > best_weight {
                best = id;
                best_weight = w;
            }
        }
        best
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrategyChoice {
    Fixed(StrategyId),
    Weighted(StrategyWeights),
}

impl StrategyChoice {
    pub fn resolve(&self) -> StrategyId {
        match self {
            Self::Fixed(id) => *id,
            Self::Weighted(weights) => weights.best(),
        }
    }
}

/// Learned guidance for strategy choice and node scoring.
///
/// Implementations must not mutate anything observable from a call; the
/// engine may score the same node from several rollout threads at once.
pub trait StrategyPolicy: Send + Sync + 'static {
    /// Desirability of `context` in `neighborhood`; clamped to [0, 1] by
    /// the engine.
    fn score_node(
        &self,
        features: &RequestFeatures,
        context: &Context,
        neighborhood: &Neighborhood<'_>,
    ) -> f64;

    /// Pick a strategy for this request, or defer to the configured default.
    fn choose_strategy(
        &self,
        _features: &RequestFeatures,
        _shape: &WorkflowShape,
    ) -> Option<StrategyChoice> {
        None
    }
}

/// Clamp a raw score into [0, 1]; NaN becomes 0.
pub fn clamp_score(raw: f64) -> f64 {
    if raw.is_nan() {
        0.0
    } else {
        raw.clamp(0.0, 1.0)
    }
}

/// Scores every context the same.
pub struct UniformPolicy;

impl StrategyPolicy for UniformPolicy {
    fn score_node(&self, _: &RequestFeatures, _: &Context, _: &Neighborhood<'_>) -> f64 {
        1.0
    }
}

/// Logistic scoring over hand-sized parameter tables, serialized as JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearPolicy {
    #[serde(default)]
    pub bias: f64,
    /// Added when scoring the context with this id.
    #[serde(default)]
    pub context_bias: HashMap<String, f64>,
    /// Added once per declared output key of the scored context.
    #[serde(default)]
    pub output_weights: HashMap<String, f64>,
    /// Multiplied with the matching request feature, summed in key order.
    #[serde(default)]
    pub feature_weights: BTreeMap<String, f64>,
    #[serde(default)]
    pub strategy_weights: Option<StrategyWeights>,
    /// Fixed strategy per topology, checked before `strategy_weights`.
    #[serde(default)]
    pub topology_strategies: HashMap<TopologyKind, StrategyId>,
}

impl LinearPolicy {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| FlowError::Policy(e.to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| FlowError::Policy(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .map_err(|e| FlowError::Policy(format!("{}: {}", path.display(), e)))?;
        Self::from_bytes(&bytes)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}

impl StrategyPolicy for LinearPolicy {
    fn score_node(
        &self,
        features: &RequestFeatures,
        context: &Context,
        _neighborhood: &Neighborhood<'_>,
    ) -> f64 {
        let mut z = self.bias + self.context_bias.get(&context.id).copied().unwrap_or(0.0);
        for key in &context.output_keys {
            z += self.output_weights.get(key).copied().unwrap_or(0.0);
        }
        for (name, weight) in &self.feature_weights {
            z += weight * features.value(name);
        }
        1.0 / (1.0 + (-z).exp())
    }

    fn choose_strategy(
        &self,
        _features: &RequestFeatures,
        shape: &WorkflowShape,
    ) -> Option<StrategyChoice> {
        if let Some(id) = self.topology_strategies.get(&shape.kind) {
            return Some(StrategyChoice::Fixed(*id));
        }
        self.strategy_weights.map(StrategyChoice::Weighted)
    }
}

/// Resolves the strategy for a request and scores nodes for blended search.
#[derive(Clone)]
pub struct StrategySelector {
    policy: Option<Arc<dyn StrategyPolicy>>,
    fallback: StrategyId,
}

impl StrategySelector {
    pub fn new(fallback: StrategyId) -> Self {
        Self {
            policy: None,
            fallback,
        }
    }

    pub fn with_policy(mut self, policy: Arc<dyn StrategyPolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Build a selector around a serialized [`LinearPolicy`].
    pub fn from_policy_file(path: &Path, fallback: StrategyId) -> Result<Self> {
        let policy = LinearPolicy::load(path)?;
        Ok(Self::new(fallback).with_policy(Arc::new(policy)))
    }

    pub fn policy(&self) -> Option<&Arc<dyn StrategyPolicy>> {
        self.policy.as_ref()
    }

    pub fn fallback(&self) -> StrategyId {
        self.fallback
    }

    pub fn select(&self, features: &RequestFeatures, shape: &WorkflowShape) -> StrategyId {
        let choice = self
            .policy
            .as_ref()
            .and_then(|p| p.choose_strategy(features, shape));
        let strategy = choice.as_ref().map_or(self.fallback, StrategyChoice::resolve);
        debug!(
            strategy = %strategy,
            from_policy = choice.is_some(),
            topology = ?shape.kind,
            "Strategy selected"
        );
        strategy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::FnBehavior;
    use serde_json::json;

    fn graph(edges: &[(&str, &str)], ids: &[&str]) -> WorkflowGraph {
        let mut g = WorkflowGraph::new("shape");
        for id in ids {
            g.add_context(
                Context::new(*id, *id),
                FnBehavior::new(|_: &Context, _: DataMap| Ok(DataMap::new())),
            )
            .unwrap();
        }
        for (a, b) in edges {
            g.connect(a, b).unwrap();
        }
        g
    }

    #[test]
    fn test_shape_classification() {
        let chain = graph(&[("a", "b"), ("b", "c")], &["a", "b", "c"]);
        assert_eq!(WorkflowShape::of(&chain).kind, TopologyKind::Chain);

        let tree = graph(&[("a", "b"), ("a", "c")], &["a", "b", "c"]);
        let shape = WorkflowShape::of(&tree);
        assert_eq!(shape.kind, TopologyKind::Tree);
        assert_eq!(shape.max_out_degree, 2);
        assert_eq!(shape.leaf_count, 2);

        let dag = graph(&[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")], &["a", "b", "c", "d"]);
        assert_eq!(WorkflowShape::of(&dag).kind, TopologyKind::Dag);

        let cyclic = graph(&[("a", "b"), ("b", "a")], &["a", "b"]);
        assert_eq!(WorkflowShape::of(&cyclic).kind, TopologyKind::Cyclic);
    }

    #[test]
    fn test_weights_tie_break_order() {
        let w = StrategyWeights {
            dfs: 0.2,
            bfs: 0.7,
            mcts: 0.7,
            blended: f64::NAN,
        };
        assert_eq!(w.best(), StrategyId::Bfs);
        assert_eq!(StrategyWeights::default().best(), StrategyId::Dfs);
    }

    #[test]
    fn test_clamp_score() {
        assert_eq!(clamp_score(f64::NAN), 0.0);
        assert_eq!(clamp_score(-3.0), 0.0);
        assert_eq!(clamp_score(7.0), 1.0);
        assert_eq!(clamp_score(0.25), 0.25);
    }

    #[test]
    fn test_selector_without_policy_uses_fallback() {
        let selector = StrategySelector::new(StrategyId::Bfs);
        let g = graph(&[], &["a"]);
        let features = RequestFeatures::from_request("hello", &DataMap::new());
        assert_eq!(selector.select(&features, &WorkflowShape::of(&g)), StrategyId::Bfs);
        assert!(selector.policy().is_none());
    }

    #[test]
    fn test_linear_policy_selects_by_topology_then_weights() {
        let mut policy = LinearPolicy {
            strategy_weights: Some(StrategyWeights {
                mcts: 1.0,
                ..Default::default()
            }),
            ..Default::default()
        };
        policy
            .topology_strategies
            .insert(TopologyKind::Chain, StrategyId::Dfs);
        let selector = StrategySelector::new(StrategyId::Bfs).with_policy(Arc::new(policy));
        let features = RequestFeatures::default();

        let chain = graph(&[("a", "b")], &["a", "b"]);
        assert_eq!(selector.select(&features, &WorkflowShape::of(&chain)), StrategyId::Dfs);

        let tree = graph(&[("a", "b"), ("a", "c")], &["a", "b", "c"]);
        assert_eq!(selector.select(&features, &WorkflowShape::of(&tree)), StrategyId::Mcts);
    }

    #[test]
    fn test_linear_policy_scores_are_probabilities() {
        let mut policy = LinearPolicy::default();
        policy.context_bias.insert("good".into(), 4.0);
        policy.output_weights.insert("answer".into(), 1.0);
        policy.feature_weights.insert("urgency".into(), -2.0);

        let mut data = DataMap::new();
        data.insert("urgency".into(), json!(1));
        let features = RequestFeatures::from_request("do it now", &data);
        assert_eq!(features.value("request_words"), 3.0);

        let good = Context::new("good", "Good").with_outputs(["answer"]);
        let bad = Context::new("bad", "Bad");
        let hood = Neighborhood::default();
        let g = policy.score_node(&features, &good, &hood);
        let b = policy.score_node(&features, &bad, &hood);
        assert!(g > b);
        assert!((0.0..=1.0).contains(&g) && (0.0..=1.0).contains(&b));
    }

    #[test]
    fn test_linear_policy_score_ignores_insertion_order() {
        let weights = [("alpha", 0.1), ("beta", 1e16), ("gamma", -1e16)];
        let mut forward = LinearPolicy::default();
        let mut reverse = LinearPolicy::default();
        for (name, w) in weights {
            forward.feature_weights.insert(name.into(), w);
        }
        for (name, w) in weights.into_iter().rev() {
            reverse.feature_weights.insert(name.into(), w);
        }

        let mut data = DataMap::new();
        for (name, _) in weights {
            data.insert(name.into(), json!(1.0));
        }
        let features = RequestFeatures::from_request("", &data);
        let ctx = Context::new("a", "A");
        let hood = Neighborhood::default();
        assert_eq!(
            forward.score_node(&features, &ctx, &hood).to_bits(),
            reverse.score_node(&features, &ctx, &hood).to_bits()
        );
    }

    #[test]
    fn test_linear_policy_blob_roundtrip() {
        let mut policy = LinearPolicy {
            bias: 0.5,
            ..Default::default()
        };
        policy
            .topology_strategies
            .insert(TopologyKind::Cyclic, StrategyId::Mcts);
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("policy.json");
        policy.save(&path).unwrap();
        assert_eq!(LinearPolicy::load(&path).unwrap(), policy);

        let err = LinearPolicy::from_bytes(b"not json").unwrap_err();
        assert!(matches!(err, FlowError::Policy(_)));
        assert!(StrategySelector::from_policy_file(&dir.path().join("missing"), StrategyId::Dfs).is_err());
    }
}
