use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use agenticflow_core::error::{FlowError, Result};

use super::context::Context;
use super::edge::{Condition, Edge, EdgeCondition};
use crate::behavior::ContextBehavior;

/// Position of a context in insertion order.
pub type NodeIdx = usize;

/// An outgoing edge resolved to its target position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeRef {
    pub target: NodeIdx,
    /// Index into [`WorkflowGraph::edges`].
    pub edge: usize,
}

/// A directed graph of contexts, possibly cyclic.
///
/// Contexts are kept in insertion order and successors are reported in
/// connection order, which every traversal relies on for determinism.
/// Behaviors are bound per context id and looked up at execution time.
#[derive(Clone)]
pub struct WorkflowGraph {
    name: String,
    description: String,
    contexts: Vec<Context>,
    index: HashMap<String, NodeIdx>,
    behaviors: HashMap<String, Arc<dyn ContextBehavior>>,
    edges: Vec<Edge>,
    adjacency: Vec<Vec<EdgeRef>>,
    in_degree: Vec<usize>,
    allow_self_loops: bool,
}

impl WorkflowGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            contexts: vec![],
            index: HashMap::new(),
            behaviors: HashMap::new(),
            edges: vec![],
            adjacency: vec![],
            in_degree: vec![],
            allow_self_loops: true,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set whether `connect(a, a)` is accepted. Applies to later connections
    /// and to validation.
    pub fn with_self_loops(mut self, allow: bool) -> Self {
        self.allow_self_loops = allow;
        self
    }

    /// Build a graph from raw parts without checking edge endpoints.
    ///
    /// Edges that reference unknown contexts are kept and reported by
    /// [`validate`](Self::validate).
    pub fn from_parts(
        name: impl Into<String>,
        contexts: Vec<Context>,
        edges: Vec<Edge>,
    ) -> Result<Self> {
        let mut graph = Self::new(name);
        for context in contexts {
            graph.insert_context(context)?;
        }
        for edge in edges {
            graph.push_edge(edge);
        }
        Ok(graph)
    }

    /// Add a context together with its run behavior.
    pub fn add_context(&mut self, context: Context, behavior: impl ContextBehavior) -> Result<()> {
        self.add_context_shared(context, Arc::new(behavior))
    }

    pub fn add_context_shared(
        &mut self,
        context: Context,
        behavior: Arc<dyn ContextBehavior>,
    ) -> Result<()> {
        let id = context.id.clone();
        self.insert_context(context)?;
        self.behaviors.insert(id, behavior);
        Ok(())
    }

    /// Add a context whose behavior is bound later with [`bind`](Self::bind).
    pub fn add_unbound(&mut self, context: Context) -> Result<()> {
        self.insert_context(context)
    }

    /// Bind (or replace) the run behavior of an existing context.
    pub fn bind(&mut self, id: &str, behavior: Arc<dyn ContextBehavior>) -> Result<()> {
        if !self.index.contains_key(id) {
            return Err(FlowError::UnknownNode(id.to_string()));
        }
        self.behaviors.insert(id.to_string(), behavior);
        Ok(())
    }

    fn insert_context(&mut self, context: Context) -> Result<()> {
        if self.index.contains_key(&context.id) {
            return Err(FlowError::DuplicateId(context.id));
        }
        let idx = self.contexts.len();
        self.index.insert(context.id.clone(), idx);
        self.contexts.push(context);
        self.adjacency.push(vec![]);
        self.in_degree.push(0);
        Ok(())
    }

    /// Add an unconditional edge.
    pub fn connect(&mut self, source: &str, target: &str) -> Result<()> {
        self.checked_connect(Edge::always(source, target))
    }

    /// Add an edge that is only followed while `expr` holds.
    pub fn connect_if(&mut self, source: &str, target: &str, expr: &str) -> Result<()> {
        if Condition::parse(expr).is_none() {
            return Err(FlowError::InvalidWorkflow(format!(
                "unsupported edge condition on {} -> {}: {}",
                source, target, expr
            )));
        }
        self.checked_connect(Edge::conditional(source, target, expr))
    }

    fn checked_connect(&mut self, edge: Edge) -> Result<()> {
        for id in [&edge.from, &edge.to] {
            if !self.index.contains_key(id.as_str()) {
                return Err(FlowError::UnknownNode(id.clone()));
            }
        }
        if edge.is_self_loop() && !self.allow_self_loops {
            return Err(FlowError::SelfLoop(edge.from));
        }
        debug!(from = %edge.from, to = %edge.to, "Connecting contexts");
        self.push_edge(edge);
        Ok(())
    }

    fn push_edge(&mut self, edge: Edge) {
        let edge_idx = self.edges.len();
        if let (Some(&from), Some(&to)) = (self.index.get(&edge.from), self.index.get(&edge.to)) {
            self.adjacency[from].push(EdgeRef {
                target: to,
                edge: edge_idx,
            });
            self.in_degree[to] += 1;
        }
        self.edges.push(edge);
    }

    /// Check that the graph can be executed.
    ///
    /// Fails on dangling edges, disallowed self-loops, unsupported
    /// conditions and contexts without a bound behavior.
    pub fn validate(&self) -> Result<()> {
        for edge in &self.edges {
            for id in [&edge.from, &edge.to] {
                if !self.index.contains_key(id.as_str()) {
                    return Err(FlowError::InvalidWorkflow(format!(
                        "edge {} -> {} references unknown context '{}'",
                        edge.from, edge.to, id
                    )));
                }
            }
            if edge.is_self_loop() && !self.allow_self_loops {
                return Err(FlowError::InvalidWorkflow(format!(
                    "self-loop on '{}' is not allowed",
                    edge.from
                )));
            }
            if let EdgeCondition::Conditional { expr } = &edge.condition {
                if Condition::parse(expr).is_none() {
                    return Err(FlowError::InvalidWorkflow(format!(
                        "unsupported edge condition on {} -> {}: {}",
                        edge.from, edge.to, expr
                    )));
                }
            }
        }
        for context in &self.contexts {
            if !self.behaviors.contains_key(&context.id) {
                return Err(FlowError::MissingBehavior(context.id.clone()));
            }
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn allows_self_loops(&self) -> bool {
        self.allow_self_loops
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn context(&self, id: &str) -> Option<&Context> {
        self.index.get(id).map(|&idx| &self.contexts[idx])
    }

    /// Contexts in insertion order.
    pub fn contexts(&self) -> &[Context] {
        &self.contexts
    }

    /// Edges in connection order, including unresolved ones.
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn behavior(&self, id: &str) -> Option<&Arc<dyn ContextBehavior>> {
        self.behaviors.get(id)
    }

    /// Successor ids of `id` in connection order.
    pub fn successors(&self, id: &str) -> Result<Vec<&str>> {
        let idx = self
            .index_of(id)
            .ok_or_else(|| FlowError::UnknownNode(id.to_string()))?;
        Ok(self.adjacency[idx]
            .iter()
            .map(|e| self.contexts[e.target].id.as_str())
            .collect())
    }

    /// Contexts with no incoming edges, in insertion order.
    pub fn roots(&self) -> Vec<&str> {
        self.root_indices()
            .into_iter()
            .map(|idx| self.contexts[idx].id.as_str())
            .collect()
    }

    /// Contexts with no outgoing edges, in insertion order.
    pub fn leaves(&self) -> Vec<&str> {
        (0..self.contexts.len())
            .filter(|&idx| self.adjacency[idx].is_empty())
            .map(|idx| self.contexts[idx].id.as_str())
            .collect()
    }

    pub fn index_of(&self, id: &str) -> Option<NodeIdx> {
        self.index.get(id).copied()
    }

    pub(crate) fn context_at(&self, idx: NodeIdx) -> &Context {
        &self.contexts[idx]
    }

    pub(crate) fn id_at(&self, idx: NodeIdx) -> &str {
        &self.contexts[idx].id
    }

    pub(crate) fn behavior_at(&self, idx: NodeIdx) -> Option<&Arc<dyn ContextBehavior>> {
        self.behaviors.get(&self.contexts[idx].id)
    }

    pub(crate) fn out_edges(&self, idx: NodeIdx) -> &[EdgeRef] {
        &self.adjacency[idx]
    }

    pub(crate) fn edge_at(&self, edge: usize) -> &Edge {
        &self.edges[edge]
    }

    pub(crate) fn in_degree(&self, idx: NodeIdx) -> usize {
        self.in_degree[idx]
    }

    pub(crate) fn root_indices(&self) -> Vec<NodeIdx> {
        (0..self.contexts.len())
            .filter(|&idx| self.in_degree[idx] == 0)
            .collect()
    }

    /// Whether the resolved edges contain a directed cycle.
    pub fn is_cyclic(&self) -> bool {
        // Kahn's algorithm: a cycle leaves nodes with remaining in-degree.
        let mut remaining = self.in_degree.clone();
        let mut ready: Vec<NodeIdx> = self.root_indices();
        let mut seen = 0;
        while let Some(idx) = ready.pop() {
            seen += 1;
            for e in &self.adjacency[idx] {
                remaining[e.target] -= 1;
                if remaining[e.target] == 0 {
                    ready.push(e.target);
                }
            }
        }
        seen < self.contexts.len()
    }
}

impl std::fmt::Debug for WorkflowGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowGraph")
            .field("name", &self.name)
            .field("contexts", &self.contexts.len())
            .field("edges", &self.edges.len())
            .field("allow_self_loops", &self.allow_self_loops)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::FnBehavior;
    use agenticflow_core::types::DataMap;

    fn noop() -> FnBehavior<impl Fn(&Context, DataMap) -> Result<DataMap> + Send + Sync + 'static> {
        FnBehavior::new(|_: &Context, _: DataMap| Ok(DataMap::new()))
    }

    fn graph(ids: &[&str]) -> WorkflowGraph {
        let mut g = WorkflowGraph::new("test");
        for id in ids {
            g.add_context(Context::new(*id, id.to_uppercase()), noop()).unwrap();
        }
        g
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut g = graph(&["a"]);
        let err = g.add_context(Context::new("a", "Again"), noop()).unwrap_err();
        assert!(matches!(err, FlowError::DuplicateId(ref id) if id == "a"));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn test_connect_unknown_node() {
        let mut g = graph(&["a"]);
        let err = g.connect("a", "ghost").unwrap_err();
        assert!(matches!(err, FlowError::UnknownNode(ref id) if id == "ghost"));
        let err = g.connect("ghost", "a").unwrap_err();
        assert!(matches!(err, FlowError::UnknownNode(ref id) if id == "ghost"));
    }

    #[test]
    fn test_self_loops_follow_configuration() {
        let mut g = graph(&["a"]);
        g.connect("a", "a").unwrap();
        assert_eq!(g.successors("a").unwrap(), vec!["a"]);
        assert!(g.is_cyclic());

        let mut strict = graph(&["a"]).with_self_loops(false);
        let err = strict.connect("a", "a").unwrap_err();
        assert!(matches!(err, FlowError::SelfLoop(_)));
    }

    #[test]
    fn test_successors_in_connection_order() {
        let mut g = graph(&["a", "b", "c", "d"]);
        g.connect("a", "c").unwrap();
        g.connect("a", "b").unwrap();
        g.connect("a", "d").unwrap();
        assert_eq!(g.successors("a").unwrap(), vec!["c", "b", "d"]);
        assert!(g.successors("b").unwrap().is_empty());
        assert!(matches!(g.successors("zz"), Err(FlowError::UnknownNode(_))));
    }

    #[test]
    fn test_roots_and_leaves() {
        let mut g = graph(&["a", "b", "c", "x"]);
        g.connect("a", "b").unwrap();
        g.connect("b", "c").unwrap();
        assert_eq!(g.roots(), vec!["a", "x"]);
        assert_eq!(g.leaves(), vec!["c", "x"]);
        assert!(!g.is_cyclic());
    }

    #[test]
    fn test_connect_if_rejects_bad_expression() {
        let mut g = graph(&["a", "b"]);
        assert!(g.connect_if("a", "b", r#"route == "fast""#).is_ok());
        let err = g.connect_if("a", "b", "whatever this is").unwrap_err();
        assert!(matches!(err, FlowError::InvalidWorkflow(_)));
    }

    #[test]
    fn test_validate_reports_dangling_edge() {
        let g = WorkflowGraph::from_parts(
            "dangling",
            vec![Context::new("a", "A")],
            vec![Edge::always("a", "missing")],
        )
        .unwrap();
        assert!(g.successors("a").unwrap().is_empty());
        let err = g.validate().unwrap_err();
        assert!(matches!(err, FlowError::InvalidWorkflow(ref m) if m.contains("missing")));
    }

    #[test]
    fn test_validate_reports_missing_behavior() {
        let mut g = graph(&["a"]);
        g.add_unbound(Context::new("b", "B")).unwrap();
        g.connect("a", "b").unwrap();
        assert!(matches!(g.validate(), Err(FlowError::MissingBehavior(ref id)) if id == "b"));

        g.bind("b", Arc::new(noop())).unwrap();
        assert!(g.validate().is_ok());
        assert!(matches!(
            g.bind("zz", Arc::new(noop())),
            Err(FlowError::UnknownNode(_))
        ));
    }

    #[test]
    fn test_validate_rejects_disallowed_self_loop_from_parts() {
        let mut g = WorkflowGraph::from_parts(
            "loop",
            vec![Context::new("a", "A")],
            vec![Edge::always("a", "a")],
        )
        .unwrap()
        .with_self_loops(false);
        g.bind("a", Arc::new(noop())).unwrap();
        assert!(matches!(g.validate(), Err(FlowError::InvalidWorkflow(_))));
    }
}
