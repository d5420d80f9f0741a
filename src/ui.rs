use std::fmt::Write as _;

use anyhow::Result;
use dialoguer::{Input, Select};
use serde_json::Value;

use agenticflow_core::types::{ExecutionEvent, StrategyId};
use agenticflow_engine::{ActionModel, EdgeCondition, ExecutionRequest, ExecutionResult, WorkflowGraph};

const MENU: [&str; 4] = ["List workflows", "Display workflow", "Run workflow", "Exit"];

/// Menu-driven terminal front end over a fixed set of workflows.
pub async fn run_interactive(model: &ActionModel, workflows: &[WorkflowGraph]) -> Result<()> {
    println!();
    println!("  \x1b[1mAgenticFlow\x1b[0m");
    println!();

    loop {
        let choice = Select::new()
            .with_prompt("What would you like to do?")
            .items(&MENU)
            .default(0)
            .interact()?;

        match choice {
            0 => {
                if workflows.is_empty() {
                    println!("  No workflows registered");
                }
                for (i, graph) in workflows.iter().enumerate() {
                    println!("  {}. {} ({} contexts)", i + 1, graph.name(), graph.len());
                }
            }
            1 => {
                if let Some(graph) = pick_workflow(workflows)? {
                    print!("{}", describe(graph));
                }
            }
            2 => {
                if let Some(graph) = pick_workflow(workflows)? {
                    run_once(model, graph).await?;
                }
            }
            _ => {
                println!("  Bye.");
                return Ok(());
            }
        }
        println!();
    }
}

fn pick_workflow(workflows: &[WorkflowGraph]) -> Result<Option<&WorkflowGraph>> {
    if workflows.is_empty() {
        println!("  No workflows registered");
        return Ok(None);
    }
    let names: Vec<&str> = workflows.iter().map(|g| g.name()).collect();
    let idx = Select::new()
        .with_prompt("Workflow")
        .items(&names)
        .default(0)
        .interact()?;
    Ok(workflows.get(idx))
}

async fn run_once(model: &ActionModel, graph: &WorkflowGraph) -> Result<()> {
    let labels: Vec<&str> = StrategyId::ALL.iter().map(|s| s.as_str()).collect();
    let default = StrategyId::ALL
        .iter()
        .position(|s| *s == model.config().engine.default_strategy)
        .unwrap_or(0);
    let idx = Select::new()
        .with_prompt("Strategy")
        .items(&labels)
        .default(default)
        .interact()?;
    let strategy = StrategyId::ALL[idx];

    let request: String = Input::new()
        .with_prompt("Request (optional)")
        .allow_empty(true)
        .interact_text()?;

    let mut rx = model.event_bus().subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            let done = matches!(event, ExecutionEvent::TraversalFinished { .. });
            if let Some(line) = render_event(&event) {
                println!("{}", line);
            }
            if done {
                break;
            }
        }
    });

    let outcome = model
        .execute(graph, ExecutionRequest::new(request).with_strategy(strategy))
        .await;
    match outcome {
        Ok(result) => {
            let _ = printer.await;
            print!("{}", render_result(&result));
        }
        Err(failure) => {
            if failure.strategy.is_some() {
                let _ = printer.await;
            } else {
                printer.abort();
            }
            println!("  \x1b[31mFailed:\x1b[0m {}", failure);
        }
    }
    Ok(())
}

/// Contexts and connections of `graph` as printable text.
pub fn describe(graph: &WorkflowGraph) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Workflow: {}", graph.name());
    if !graph.description().is_empty() {
        let _ = writeln!(out, "Description: {}", graph.description());
    }
    let _ = writeln!(out, "Contexts: {}", graph.len());
    let _ = writeln!(out, "\nContexts:");
    for ctx in graph.contexts() {
        let _ = writeln!(out, "  - {}: {}", ctx.id, ctx.name);
    }
    let _ = writeln!(out, "\nConnections:");
    let name_of = |id: &str| graph.context(id).map_or(id.to_string(), |c| c.name.clone());
    for edge in graph.edges() {
        match &edge.condition {
            EdgeCondition::Always => {
                let _ = writeln!(out, "  - {} -> {}", name_of(&edge.from), name_of(&edge.to));
            }
            EdgeCondition::Conditional { expr } => {
                let _ = writeln!(
                    out,
                    "  - {} -> {} [if {}]",
                    name_of(&edge.from),
                    name_of(&edge.to),
                    expr
                );
            }
        }
    }
    out
}

/// One progress line per event worth showing.
pub fn render_event(event: &ExecutionEvent) -> Option<String> {
    match event {
        ExecutionEvent::TraversalStarted { workflow, strategy, .. } => {
            Some(format!("  \x1b[1m▶\x1b[0m {} ({})", workflow, strategy))
        }
        ExecutionEvent::NodeFinished { node_id, elapsed_ms, .. } => {
            Some(format!("  \x1b[32m✓\x1b[0m {} ({}ms)", node_id, elapsed_ms))
        }
        ExecutionEvent::NodeFailed { node_id, error, .. } => {
            Some(format!("  \x1b[31m✗\x1b[0m {}: {}", node_id, error))
        }
        ExecutionEvent::NodeStarted { .. }
        | ExecutionEvent::MctsBatchComplete { .. }
        | ExecutionEvent::TraversalFinished { .. } => None,
    }
}

/// Path, goal status and the outputs of the last executed context.
pub fn render_result(result: &ExecutionResult) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\nWorkflow execution complete! ({}ms)", result.total_elapsed_ms);
    let _ = writeln!(out, "Strategy: {}", result.strategy);
    let _ = writeln!(out, "Path: {}", result.path.join(" -> "));
    if result.goal_reached {
        let _ = writeln!(out, "Goal reached via: {}", result.route.join(" -> "));
    }
    if let Some(search) = &result.search {
        let _ = writeln!(
            out,
            "Search: {} iterations, {} tree nodes, best first step {}",
            search.iterations,
            search.tree_size,
            search.best_action.as_deref().unwrap_or("-")
        );
    }
    if let Some(outputs) = result.path.last().and_then(|id| result.node_outputs.get(id)) {
        let mut keys: Vec<&String> = outputs.keys().collect();
        keys.sort();
        let _ = writeln!(out, "\nResult:");
        for key in keys {
            match &outputs[key] {
                Value::String(s) => {
                    let _ = writeln!(out, "{}:\n{}", key, s);
                }
                other => {
                    let _ = writeln!(out, "{}: {}", key, other);
                }
            }
        }
    }
    out
}
