use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use agenticflow_core::types::{DataMap, ExecutionId};

use crate::graph::{HandoffContext, NodeIdx};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Succeeded,
    Failed,
}

/// Trace entry for one executed context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeRecord {
    pub node_id: String,
    pub status: NodeStatus,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    #[serde(default)]
    pub error: Option<String>,
}

impl NodeRecord {
    pub fn succeeded(&self) -> bool {
        self.status == NodeStatus::Succeeded
    }
}

/// Mutable state of a single traversal.
///
/// Created fresh for every request and owned by that traversal, so
/// concurrent executions over one graph never share it.
#[derive(Debug)]
pub struct ExecutionState {
    execution_id: ExecutionId,
    data: HandoffContext,
    status: Vec<Option<NodeStatus>>,
    path: Vec<String>,
    node_outputs: HashMap<String, DataMap>,
    trace: Vec<NodeRecord>,
}

impl ExecutionState {
    pub fn new(execution_id: ExecutionId, node_count: usize, initial: DataMap) -> Self {
        Self {
            execution_id,
            data: HandoffContext::from_map(initial),
            status: vec![None; node_count],
            path: vec![],
            node_outputs: HashMap::new(),
            trace: vec![],
        }
    }

    pub fn execution_id(&self) -> &ExecutionId {
        &self.execution_id
    }

    /// Accumulated data: initial data plus every merged output.
    pub fn data(&self) -> &DataMap {
        self.data.data()
    }

    /// Successfully executed context ids in execution order.
    pub fn path(&self) -> &[String] {
        &self.path
    }

    pub fn trace(&self) -> &[NodeRecord] {
        &self.trace
    }

    pub fn outputs_of(&self, id: &str) -> Option<&DataMap> {
        self.node_outputs.get(id)
    }

    pub(crate) fn is_executed(&self, idx: NodeIdx) -> bool {
        self.status[idx] == Some(NodeStatus::Succeeded)
    }

    pub(crate) fn is_failed(&self, idx: NodeIdx) -> bool {
        self.status[idx] == Some(NodeStatus::Failed)
    }

    /// Executed or failed; either way the context never runs again.
    pub(crate) fn is_settled(&self, idx: NodeIdx) -> bool {
        self.status[idx].is_some()
    }

    pub(crate) fn has_executed_id(&self, id: &str) -> bool {
        self.node_outputs.contains_key(id)
    }

    pub(crate) fn record_success(
        &mut self,
        idx: NodeIdx,
        id: &str,
        outputs: DataMap,
        started_at: DateTime<Utc>,
        elapsed_ms: u64,
    ) {
        self.status[idx] = Some(NodeStatus::Succeeded);
        self.data.merge_outputs(&outputs);
        self.node_outputs.insert(id.to_string(), outputs);
        self.path.push(id.to_string());
        self.trace.push(NodeRecord {
            node_id: id.to_string(),
            status: NodeStatus::Succeeded,
            started_at,
            elapsed_ms,
            error: None,
        });
    }

    pub(crate) fn record_failure(
        &mut self,
        idx: NodeIdx,
        id: &str,
        error: String,
        started_at: DateTime<Utc>,
        elapsed_ms: u64,
    ) {
        self.status[idx] = Some(NodeStatus::Failed);
        self.trace.push(NodeRecord {
            node_id: id.to_string(),
            status: NodeStatus::Failed,
            started_at,
            elapsed_ms,
            error: Some(error),
        });
    }

    pub(crate) fn into_parts(self) -> (Vec<String>, DataMap, HashMap<String, DataMap>, Vec<NodeRecord>) {
        (self.path, self.data.into_inner(), self.node_outputs, self.trace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_merges_outputs_and_extends_path() {
        let mut initial = DataMap::new();
        initial.insert("input".into(), json!("x"));
        let mut state = ExecutionState::new(ExecutionId::new(), 3, initial);

        let mut out = DataMap::new();
        out.insert("processed".into(), json!("X"));
        state.record_success(0, "a", out, Utc::now(), 5);

        assert!(state.is_executed(0));
        assert!(state.is_settled(0));
        assert!(!state.is_settled(1));
        assert!(state.has_executed_id("a"));
        assert_eq!(state.path(), ["a".to_string()]);
        assert_eq!(state.data()["input"], json!("x"));
        assert_eq!(state.data()["processed"], json!("X"));
        assert_eq!(state.outputs_of("a").unwrap()["processed"], json!("X"));
        assert!(state.trace()[0].succeeded());
    }

    #[test]
    fn test_failure_is_traced_but_not_on_path() {
        let mut state = ExecutionState::new(ExecutionId::new(), 2, DataMap::new());
        state.record_failure(1, "b", "boom".into(), Utc::now(), 1);

        assert!(state.is_failed(1));
        assert!(!state.is_executed(1));
        assert!(state.path().is_empty());
        assert_eq!(state.trace()[0].error.as_deref(), Some("boom"));
        assert!(!state.has_executed_id("b"));
    }
}
