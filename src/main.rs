mod sample;
mod ui;

use std::path::{Path, PathBuf};

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use agenticflow_core::config::AppConfig;
use agenticflow_core::error::FlowError;
use agenticflow_core::types::{DataMap, StrategyId};
use agenticflow_engine::{ActionModel, ExecutionFailure, ExecutionRequest, Goal, WorkflowDefinition, WorkflowGraph};

#[derive(Parser)]
#[command(
    name = "agenticflow",
    version,
    about = "Strategic workflow execution with symbolic and learned planning"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "agenticflow.toml")]
    config: PathBuf,

    /// Traversal strategy: dfs, bfs, mcts or blended (default: selector's choice)
    #[arg(short, long)]
    strategy: Option<StrategyId>,

    /// Launch the interactive menu instead of running once
    #[arg(long, conflicts_with_all = ["strategy", "input", "goal", "seed", "json"])]
    ui: bool,

    /// Initial data: a JSON object, or plain text stored as `user_input`
    #[arg(short, long)]
    input: Option<String>,

    /// Built-in workflow name (sample, analysis) or a TOML/JSON definition file
    #[arg(short, long, default_value = "sample")]
    workflow: String,

    /// Stop as soon as this context has run
    #[arg(long)]
    goal: Option<String>,

    /// Trained strategy policy (overrides `policy_path`)
    #[arg(long)]
    policy: Option<PathBuf>,

    /// MCTS rollout seed (overrides `mcts.seed`)
    #[arg(long)]
    seed: Option<u64>,

    /// Keep traversing past failing contexts
    #[arg(long)]
    continue_on_failure: bool,

    /// Print the full result as JSON
    #[arg(long)]
    json: bool,

    /// Free-form request text handed to the strategy selector
    #[arg(trailing_var_arg = true)]
    request: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("agenticflow=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let mut config = load_config(&cli.config).unwrap_or_else(|e| exit_with(&e));
    if let Some(path) = &cli.policy {
        config.policy_path = Some(path.display().to_string());
    }
    if cli.continue_on_failure {
        config.engine.halt_on_step_failure = false;
    }
    let allow_self_loops = config.engine.allow_self_loops;
    let model = ActionModel::from_config(config).unwrap_or_else(|e| exit_with(&e));

    if cli.ui {
        let mut workflows = Vec::new();
        for name in sample::NAMES {
            workflows.push(load_workflow(name, allow_self_loops).unwrap_or_else(|e| exit_with(&e)));
        }
        if !sample::NAMES.contains(&cli.workflow.as_str()) {
            workflows.push(
                load_workflow(&cli.workflow, allow_self_loops).unwrap_or_else(|e| exit_with(&e)),
            );
        }
        return ui::run_interactive(&model, &workflows).await;
    }

    let graph = load_workflow(&cli.workflow, allow_self_loops).unwrap_or_else(|e| exit_with(&e));
    let mut request = ExecutionRequest::new(cli.request.join(" "));
    if let Some(input) = &cli.input {
        request = request.with_data(parse_input(input).unwrap_or_else(|e| exit_with(&e)));
    }
    if let Some(strategy) = cli.strategy {
        request = request.with_strategy(strategy);
    }
    if let Some(goal) = cli.goal {
        request = request.with_goal(Goal::reached(goal));
    }
    if let Some(seed) = cli.seed {
        request = request.with_seed(seed);
    }

    info!(workflow = %graph.name(), "Running workflow");
    match model.execute(&graph, request).await {
        Ok(result) => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print!("{}", ui::render_result(&result));
            }
            Ok(())
        }
        Err(failure) => report_failure(&failure),
    }
}

/// Load the config file, then `~/.agenticflow/config.toml`, else defaults.
fn load_config(path: &Path) -> agenticflow_core::Result<AppConfig> {
    if path.exists() {
        return AppConfig::load(path);
    }
    if let Some(home) = dirs_home().map(|h| h.join(".agenticflow").join("config.toml")) {
        if home.exists() {
            info!(path = %home.display(), "Loading config from home directory");
            return AppConfig::load(&home);
        }
    }
    info!("No config file found, using defaults");
    Ok(AppConfig::default())
}

fn load_workflow(name: &str, allow_self_loops: bool) -> agenticflow_core::Result<WorkflowGraph> {
    if let Some(graph) = sample::by_name(name) {
        return graph;
    }
    let path = Path::new(name);
    if !path.exists() {
        return Err(FlowError::InvalidWorkflow(format!(
            "unknown workflow '{}' (expected {} or a definition file)",
            name,
            sample::NAMES.join(", ")
        )));
    }
    WorkflowDefinition::load(path)?.into_graph(allow_self_loops)
}

/// A JSON object becomes the initial data; anything else is `user_input`.
fn parse_input(raw: &str) -> agenticflow_core::Result<DataMap> {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('{') {
        return Ok(serde_json::from_str(trimmed)?);
    }
    let mut data = DataMap::new();
    data.insert("user_input".into(), serde_json::Value::String(raw.to_string()));
    Ok(data)
}

fn report_failure(failure: &ExecutionFailure) -> ! {
    error!(
        kind = failure.error.kind(),
        node_id = failure.node_id.as_deref().unwrap_or("-"),
        "Workflow failed"
    );
    eprintln!("Error: {}", failure);
    if !failure.partial_path.is_empty() {
        eprintln!("Completed before failure: {}", failure.partial_path.join(" -> "));
    }
    std::process::exit(failure.error.exit_code())
}

fn exit_with(err: &FlowError) -> ! {
    eprintln!("Error: {}", err);
    std::process::exit(err.exit_code())
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
