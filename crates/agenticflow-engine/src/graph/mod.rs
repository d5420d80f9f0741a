//! Workflow graph model.
//!
//! A workflow is a directed, possibly cyclic graph of [`Context`]s connected
//! by [`Edge`]s. Contexts are plain records; each one has a run behavior
//! bound on the [`WorkflowGraph`]. Data flows between contexts through the
//! accumulated [`HandoffContext`] of a traversal.

pub mod context;
pub mod definition;
pub mod edge;
pub mod handoff;
pub mod workflow;

pub use context::Context;
pub use definition::{ContextDefinition, ToolBinding, WorkflowDefinition};
pub use edge::{evaluate_condition, Condition, Edge, EdgeCondition};
pub use handoff::HandoffContext;
pub use workflow::{EdgeRef, NodeIdx, WorkflowGraph};
