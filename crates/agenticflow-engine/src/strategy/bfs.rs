use std::collections::VecDeque;

use tracing::debug;

use agenticflow_core::config::BfsConfig;

use super::{Abort, StepOutcome, StrategyOutcome, Traversal};
use crate::graph::NodeIdx;

/// Breadth-first traversal.
///
/// All entries start at depth 0. Contexts are marked visited when enqueued,
/// so each one is queued at most once, and the parent recorded at that
/// moment gives the shortest route back to an entry.
pub(crate) async fn run(t: &mut Traversal<'_>, config: &BfsConfig) -> Result<StrategyOutcome, Abort> {
    let graph = t.graph;
    let mut visited = vec![false; graph.len()];
    let mut parent: Vec<Option<NodeIdx>> = vec![None; graph.len()];
    let mut queue: VecDeque<(NodeIdx, usize)> = VecDeque::new();

    for entry in t.opts.entries.clone() {
        if !visited[entry] {
            visited[entry] = true;
            queue.push_back((entry, 0));
        }
    }

    while let Some((node, depth)) = queue.pop_front() {
        if let StepOutcome::Failed = t.run_node(node).await? {
            continue;
        }
        if t.goal_met() {
            let mut route = vec![node];
            let mut cursor = node;
            while let Some(p) = parent[cursor] {
                route.push(p);
                cursor = p;
            }
            route.reverse();
            return Ok(StrategyOutcome {
                route,
                goal_reached: true,
                search: None,
            });
        }

        if depth >= config.max_depth {
            debug!(node_id = graph.id_at(node), depth, "Depth limit reached, not expanding");
            continue;
        }
        for edge in graph.out_edges(node) {
            if visited[edge.target] || t.state.is_settled(edge.target) {
                continue;
            }
            if !graph.edge_at(edge.edge).is_traversable(t.state.data()) {
                continue;
            }
            visited[edge.target] = true;
            parent[edge.target] = Some(node);
            queue.push_back((edge.target, depth + 1));
        }
    }

    t.exhausted()?;
    Ok(StrategyOutcome {
        route: t.state.path().iter().filter_map(|id| graph.index_of(id)).collect(),
        goal_reached: false,
        search: None,
    })
}

#[cfg(test)]
mod tests {
    use agenticflow_core::types::StrategyId;

    use crate::strategy::testing::{calls, graph, model};
    use crate::{ExecutionRequest, Goal};

    fn bfs() -> ExecutionRequest {
        ExecutionRequest::new("").with_strategy(StrategyId::Bfs)
    }

    fn two_paths() -> crate::WorkflowGraph {
        graph(
            &["a", "b", "c", "d", "g"],
            &[("a", "b"), ("b", "c"), ("c", "g"), ("a", "d"), ("d", "g")],
            &[],
        )
        .0
    }

    #[tokio::test]
    async fn test_level_order() {
        let (g, log) = graph(
            &["a", "b", "c", "d"],
            &[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")],
            &[],
        );
        let result = model(|_| {}).execute(&g, bfs()).await.unwrap();
        assert_eq!(result.path, vec!["a", "b", "c", "d"]);
        assert_eq!(calls(&log).len(), 4);
    }

    #[tokio::test]
    async fn test_goal_route_is_shortest() {
        let g = two_paths();
        let result = model(|_| {})
            .execute(&g, bfs().with_goal(Goal::reached("g")))
            .await
            .unwrap();
        assert!(result.goal_reached);
        assert_eq!(result.route, vec!["a", "d", "g"]);
        assert_eq!(result.path, vec!["a", "b", "d", "c", "g"]);
    }

    #[tokio::test]
    async fn test_depth_limit_prunes_quietly() {
        let (g, _) = graph(&["a", "b", "c"], &[("a", "b"), ("b", "c")], &[]);
        let result = model(|c| c.bfs.max_depth = 1).execute(&g, bfs()).await.unwrap();
        assert_eq!(result.path, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failed_step_is_not_expanded() {
        let (g, log) = graph(&["a", "b", "c", "e"], &[("a", "b"), ("a", "c"), ("b", "e")], &["b"]);
        let result = model(|_| {})
            .execute(&g, bfs().halt_on_step_failure(false))
            .await
            .unwrap();
        assert_eq!(result.path, vec!["a", "c"]);
        assert_eq!(calls(&log), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_multiple_roots_start_together() {
        let (g, _) = graph(&["a", "x", "a1", "x1"], &[("a", "a1"), ("x", "x1")], &[]);
        let result = model(|_| {}).execute(&g, bfs()).await.unwrap();
        assert_eq!(result.path, vec!["a", "x", "a1", "x1"]);
    }
}
