use tracing::debug;

use agenticflow_core::config::DfsConfig;
use agenticflow_core::error::FlowError;

use super::{Abort, StepOutcome, StrategyOutcome, Traversal};
use crate::graph::NodeIdx;

struct Frame {
    node: NodeIdx,
    /// Next outgoing edge to look at.
    next_edge: usize,
}

/// Depth-first traversal with an explicit stack.
///
/// Entries are explored in order. A successor is skipped when it is on the
/// current stack, already executed or failed, or its edge condition does
/// not hold. The first context after which the goal holds ends the search,
/// and the stack at that point is the route.
pub(crate) async fn run(t: &mut Traversal<'_>, config: &DfsConfig) -> Result<StrategyOutcome, Abort> {
    let graph = t.graph;
    let mut on_stack = vec![false; graph.len()];
    let mut stack: Vec<Frame> = Vec::new();

    for entry in t.opts.entries.clone() {
        if t.state.is_settled(entry) {
            continue;
        }
        stack.push(Frame {
            node: entry,
            next_edge: 0,
        });
        on_stack[entry] = true;

        while let Some(top) = stack.last() {
            let node = top.node;

            if !t.state.is_settled(node) {
                match t.run_node(node).await? {
                    StepOutcome::Failed => {
                        stack.pop();
                        on_stack[node] = false;
                        continue;
                    }
                    StepOutcome::Succeeded => {
                        if t.goal_met() {
                            let route = stack.iter().map(|f| f.node).collect();
                            return Ok(StrategyOutcome {
                                route,
                                goal_reached: true,
                                search: None,
                            });
                        }
                    }
                }
            }

            let edges = graph.out_edges(node);
            let mut next = None;
            let mut cursor = stack.last().map_or(0, |f| f.next_edge);
            while cursor < edges.len() {
                let edge = edges[cursor];
                cursor += 1;
                if on_stack[edge.target] || t.state.is_settled(edge.target) {
                    continue;
                }
                if !graph.edge_at(edge.edge).is_traversable(t.state.data()) {
                    debug!(
                        from = graph.id_at(node),
                        to = graph.id_at(edge.target),
                        "Edge condition not met"
                    );
                    continue;
                }
                next = Some(edge.target);
                break;
            }
            if let Some(frame) = stack.last_mut() {
                frame.next_edge = cursor;
            }

            match next {
                Some(target) => {
                    if stack.len() >= config.max_depth {
                        return Err(Abort {
                            error: FlowError::DepthExceeded {
                                max_depth: config.max_depth,
                                node: graph.id_at(target).to_string(),
                            },
                            node_id: Some(graph.id_at(target).to_string()),
                        });
                    }
                    stack.push(Frame {
                        node: target,
                        next_edge: 0,
                    });
                    on_stack[target] = true;
                }
                None => {
                    stack.pop();
                    on_stack[node] = false;
                }
            }
        }
    }

    t.exhausted()?;
    Ok(StrategyOutcome {
        route: t.state.path().iter().filter_map(|id| graph.index_of(id)).collect(),
        goal_reached: false,
        search: None,
    })
}
