//! Mocks and fixture graphs shared by AgenticFlow tests.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;

use agenticflow_core::error::{FlowError, Result};
use agenticflow_core::traits::{LlmClient, Tool};
use agenticflow_core::types::{DataMap, ToolContext, ToolResult};
use agenticflow_engine::behavior::{ContextBehavior, StepContext};
use agenticflow_engine::graph::{Context, WorkflowGraph};

/// Shared record of which contexts ran, in order.
#[derive(Clone, Default)]
pub struct InvocationLog(Arc<Mutex<Vec<String>>>);

impl InvocationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, id: &str) {
        self.0.lock().expect("invocation log poisoned").push(id.to_string());
    }

    pub fn calls(&self) -> Vec<String> {
        self.0.lock().expect("invocation log poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.0.lock().expect("invocation log poisoned").len()
    }

    pub fn count_of(&self, id: &str) -> usize {
        self.calls().iter().filter(|c| *c == id).count()
    }
}

/// Records the call and writes `"<id>"` under every declared output key.
pub struct CountingBehavior {
    log: InvocationLog,
}

impl CountingBehavior {
    pub fn new(log: InvocationLog) -> Self {
        Self { log }
    }
}

impl ContextBehavior for CountingBehavior {
    fn run<'a>(
        &'a self,
        context: &'a Context,
        _inputs: DataMap,
        _step: StepContext,
    ) -> BoxFuture<'a, Result<DataMap>> {
        Box::pin(async move {
            self.log.record(&context.id);
            Ok(context
                .output_keys
                .iter()
                .map(|k| (k.clone(), serde_json::json!(context.id)))
                .collect())
        })
    }
}

/// Records the call, then fails like a broken tool.
pub struct FailingBehavior {
    log: InvocationLog,
    message: String,
}

impl FailingBehavior {
    pub fn new(log: InvocationLog, message: impl Into<String>) -> Self {
        Self {
            log,
            message: message.into(),
        }
    }
}

impl ContextBehavior for FailingBehavior {
    fn run<'a>(
        &'a self,
        context: &'a Context,
        _inputs: DataMap,
        _step: StepContext,
    ) -> BoxFuture<'a, Result<DataMap>> {
        Box::pin(async move {
            self.log.record(&context.id);
            Err(FlowError::ToolExecution {
                tool: "mock".into(),
                message: self.message.clone(),
            })
        })
    }
}

/// Sleeps before producing outputs like [`CountingBehavior`].
pub struct SlowBehavior {
    log: InvocationLog,
    delay: Duration,
}

impl SlowBehavior {
    pub fn new(log: InvocationLog, delay: Duration) -> Self {
        Self { log, delay }
    }
}

impl ContextBehavior for SlowBehavior {
    fn run<'a>(
        &'a self,
        context: &'a Context,
        inputs: DataMap,
        step: StepContext,
    ) -> BoxFuture<'a, Result<DataMap>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            CountingBehavior::new(self.log.clone())
                .run(context, inputs, step)
                .await
        })
    }
}

/// Tool that sleeps for `delay` and declares its own `timeout_secs`.
pub struct SleepTool {
    name: String,
    delay: Duration,
    timeout_secs: u64,
}

impl SleepTool {
    pub fn new(name: impl Into<String>, delay: Duration, timeout_secs: u64) -> Self {
        Self {
            name: name.into(),
            delay,
            timeout_secs,
        }
    }
}

impl Tool for SleepTool {
    fn name(&self) -> &str {
        &self.name
    }
    fn description(&self) -> &str {
        "Sleeps, then returns null."
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({ "type": "object" })
    }
    fn execute(
        &self,
        _input: serde_json::Value,
        _ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            tokio::time::sleep(self.delay).await;
            Ok(ToolResult::success(serde_json::Value::Null))
        })
    }
    fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
}

/// LLM client returning canned responses in order, then echoing prompts.
#[derive(Default)]
pub struct MockLlm {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl MockLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(vec![]),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompt log poisoned").clone()
    }
}

impl LlmClient for MockLlm {
    fn complete(&self, prompt: String) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            self.prompts
                .lock()
                .expect("prompt log poisoned")
                .push(prompt.clone());
            let canned = self.responses.lock().expect("response queue poisoned").pop_front();
            Ok(canned.unwrap_or(prompt))
        })
    }
}

/// A graph plus the log its behaviors write to.
pub struct Fixture {
    pub graph: WorkflowGraph,
    pub log: InvocationLog,
}

/// Incrementally build fixture graphs. Every context declares one output
/// key named `<id>_out`.
pub struct GraphBuilder {
    graph: WorkflowGraph,
    log: InvocationLog,
}

impl GraphBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            graph: WorkflowGraph::new(name),
            log: InvocationLog::new(),
        }
    }

    pub fn context(id: &str) -> Context {
        Context::new(id, id.to_uppercase()).with_outputs([format!("{}_out", id)])
    }

    pub fn node(self, id: &str) -> Self {
        let behavior = CountingBehavior::new(self.log.clone());
        self.with(Self::context(id), behavior)
    }

    pub fn nodes(mut self, ids: &[&str]) -> Self {
        for id in ids {
            self = self.node(id);
        }
        self
    }

    pub fn failing(self, id: &str) -> Self {
        let behavior = FailingBehavior::new(self.log.clone(), format!("{} is broken", id));
        self.with(Self::context(id), behavior)
    }

    pub fn slow(self, id: &str, delay: Duration) -> Self {
        let behavior = SlowBehavior::new(self.log.clone(), delay);
        self.with(Self::context(id), behavior)
    }

    pub fn with(mut self, context: Context, behavior: impl ContextBehavior) -> Self {
        self.graph
            .add_context(context, behavior)
            .expect("fixture context ids are unique");
        self
    }

    pub fn edge(mut self, from: &str, to: &str) -> Self {
        self.graph.connect(from, to).expect("fixture edge endpoints exist");
        self
    }

    pub fn edges(mut self, edges: &[(&str, &str)]) -> Self {
        for (from, to) in edges {
            self = self.edge(from, to);
        }
        self
    }

    pub fn edge_if(mut self, from: &str, to: &str, expr: &str) -> Self {
        self.graph
            .connect_if(from, to, expr)
            .expect("fixture condition is valid");
        self
    }

    pub fn build(self) -> Fixture {
        Fixture {
            graph: self.graph,
            log: self.log,
        }
    }
}

/// `ids[0] -> ids[1] -> ...`
pub fn chain_graph(ids: &[&str]) -> Fixture {
    let mut builder = GraphBuilder::new("chain").nodes(ids);
    for pair in ids.windows(2) {
        builder = builder.edge(pair[0], pair[1]);
    }
    builder.build()
}

/// `a -> {b, c} -> d`
pub fn diamond_graph() -> Fixture {
    GraphBuilder::new("diamond")
        .nodes(&["a", "b", "c", "d"])
        .edges(&[("a", "b"), ("a", "c"), ("b", "d"), ("c", "d")])
        .build()
}

/// Two routes to `g`: `a -> b -> c -> g` (connected first) and `a -> d -> g`.
pub fn two_path_graph() -> Fixture {
    GraphBuilder::new("two-path")
        .nodes(&["a", "b", "c", "d", "g"])
        .edges(&[("a", "b"), ("b", "c"), ("c", "g"), ("a", "d"), ("d", "g")])
        .build()
}

/// Root `r` with three branches; only `y -> goal` reaches the goal.
///
/// ```text
/// r -> x -> x1
/// r -> y -> goal
/// r -> z -> z1 -> z2
/// ```
pub fn branching_graph() -> Fixture {
    GraphBuilder::new("branching")
        .nodes(&["r", "x", "x1", "y", "goal", "z", "z1", "z2"])
        .edges(&[
            ("r", "x"),
            ("r", "y"),
            ("r", "z"),
            ("x", "x1"),
            ("y", "goal"),
            ("z", "z1"),
            ("z1", "z2"),
        ])
        .build()
}

/// Write TOML to a temporary file that lives as long as the handle.
pub fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("create temp file");
    file.write_all(content.as_bytes()).expect("write config");
    file
}
