use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};
use crate::types::StrategyId;

/// Top-level AgenticFlow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub dfs: DfsConfig,
    #[serde(default)]
    pub bfs: BfsConfig,
    #[serde(default)]
    pub mcts: MctsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    /// Path to a trained strategy policy blob.
    #[serde(default)]
    pub policy_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Strategy used when neither the request nor a selector picks one.
    #[serde(default)]
    pub default_strategy: StrategyId,
    /// Abort the traversal on the first failing step (default: true).
    #[serde(default = "default_halt_on_step_failure")]
    pub halt_on_step_failure: bool,
    /// Allow `connect(a, a)` (default: true, cycles are a supported topology).
    #[serde(default = "default_allow_self_loops")]
    pub allow_self_loops: bool,
    /// Per-context time budget in seconds (0 = unlimited).
    #[serde(default = "default_node_timeout")]
    pub node_timeout_secs: u64,
    /// Whole-traversal time budget in seconds (0 = unlimited).
    #[serde(default = "default_traversal_timeout")]
    pub traversal_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_strategy: StrategyId::default(),
            halt_on_step_failure: default_halt_on_step_failure(),
            allow_self_loops: default_allow_self_loops(),
            node_timeout_secs: default_node_timeout(),
            traversal_timeout_secs: default_traversal_timeout(),
        }
    }
}

impl EngineConfig {
    pub fn node_timeout(&self) -> Option<Duration> {
        (self.node_timeout_secs > 0).then(|| Duration::from_secs(self.node_timeout_secs))
    }

    pub fn traversal_timeout(&self) -> Option<Duration> {
        (self.traversal_timeout_secs > 0).then(|| Duration::from_secs(self.traversal_timeout_secs))
    }
}

fn default_halt_on_step_failure() -> bool { true }
fn default_allow_self_loops() -> bool { true }
fn default_node_timeout() -> u64 { 120 }
fn default_traversal_timeout() -> u64 { 600 }

/// Depth-first traversal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DfsConfig {
    /// Maximum stack depth before failing with `DepthExceeded`. Default: 256.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for DfsConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

/// Breadth-first traversal settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BfsConfig {
    /// Nodes further than this many edges from a root are not enqueued. Default: 256.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for BfsConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

fn default_max_depth() -> usize { 256 }

/// Monte-Carlo tree search settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MctsConfig {
    /// Iteration budget. Default: 100.
    #[serde(default = "default_iterations")]
    pub iterations: usize,
    /// Optional wall-clock budget for the planning phase in milliseconds.
    /// When both are set, planning stops at whichever is exhausted first.
    #[serde(default)]
    pub time_limit_ms: Option<u64>,
    /// UCB exploration constant. Default: sqrt(2).
    #[serde(default = "default_exploration_constant")]
    pub exploration_constant: f64,
    /// Maximum rollout length in edges. Default: 10.
    #[serde(default = "default_max_rollout_depth")]
    pub max_rollout_depth: usize,
    /// Reward multiplier applied for each revisit of a node inside one rollout.
    #[serde(default = "default_revisit_decay")]
    pub revisit_decay: f64,
    /// Seed for the rollout RNG. Default: 0.
    #[serde(default)]
    pub seed: u64,
    /// Number of rollouts simulated in parallel per batch. Default: 1.
    #[serde(default = "default_rollout_batch")]
    pub rollout_batch: usize,
    /// Weight of the policy score added to the UCB term in blended search.
    #[serde(default = "default_policy_weight")]
    pub policy_weight: f64,
}

impl Default for MctsConfig {
    fn default() -> Self {
        Self {
            iterations: default_iterations(),
            time_limit_ms: None,
            exploration_constant: default_exploration_constant(),
            max_rollout_depth: default_max_rollout_depth(),
            revisit_decay: default_revisit_decay(),
            seed: 0,
            rollout_batch: default_rollout_batch(),
            policy_weight: default_policy_weight(),
        }
    }
}

impl MctsConfig {
    pub fn time_limit(&self) -> Option<Duration> {
        self.time_limit_ms.map(Duration::from_millis)
    }
}

fn default_iterations() -> usize { 100 }
fn default_exploration_constant() -> f64 { std::f64::consts::SQRT_2 }
fn default_max_rollout_depth() -> usize { 10 }
fn default_revisit_decay() -> f64 { 0.5 }
fn default_rollout_batch() -> usize { 1 }
fn default_policy_weight() -> f64 { 0.5 }

/// Tool invocation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Upper bound on any single tool invocation in seconds. Default: 120.
    #[serde(default = "default_tool_timeout")]
    pub timeout_secs: u64,
    /// Working directory handed to tools. Default: the process cwd.
    #[serde(default)]
    pub working_dir: Option<String>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_tool_timeout(),
            working_dir: None,
        }
    }
}

fn default_tool_timeout() -> u64 { 120 }

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowError::ConfigNotFound(path.display().to_string()))?;

        Self::parse(&content)
    }

    /// Parse config from TOML text, with env var expansion.
    pub fn parse(content: &str) -> Result<Self> {
        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| FlowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.dfs.max_depth == 0 {
            return Err(FlowError::Config("dfs.max_depth must be at least 1".into()));
        }
        if self.mcts.rollout_batch == 0 {
            return Err(FlowError::Config("mcts.rollout_batch must be at least 1".into()));
        }
        if !self.mcts.exploration_constant.is_finite() || self.mcts.exploration_constant < 0.0 {
            return Err(FlowError::Config(
                "mcts.exploration_constant must be a finite, non-negative number".into(),
            ));
        }
        if !self.mcts.policy_weight.is_finite() || self.mcts.policy_weight < 0.0 {
            return Err(FlowError::Config(
                "mcts.policy_weight must be a finite, non-negative number".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.mcts.revisit_decay) {
            return Err(FlowError::Config("mcts.revisit_decay must be within [0, 1]".into()));
        }
        Ok(())
    }

    /// Resolve the tool working directory (expand ~).
    pub fn working_dir(&self) -> PathBuf {
        match self.tools.working_dir.as_deref() {
            Some(ws) => {
                if let Some(rest) = ws.strip_prefix("~/") {
                    if let Some(home) = dirs_home() {
                        return home.join(rest);
                    }
                }
                PathBuf::from(ws)
            }
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // unset variables stay literal
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_AGENTICFLOW_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_AGENTICFLOW_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_AGENTICFLOW_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_AGENTICFLOW_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_AGENTICFLOW_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.engine.default_strategy, StrategyId::Dfs);
        assert!(config.engine.halt_on_step_failure);
        assert!(config.engine.allow_self_loops);
        assert_eq!(config.dfs.max_depth, 256);
        assert_eq!(config.mcts.iterations, 100);
        assert_eq!(config.mcts.max_rollout_depth, 10);
        assert!((config.mcts.exploration_constant - std::f64::consts::SQRT_2).abs() < 1e-12);
        assert_eq!(config.mcts.rollout_batch, 1);
        assert!(config.mcts.time_limit().is_none());
        assert_eq!(config.tools.timeout_secs, 120);
    }

    #[test]
    fn test_partial_sections() {
        let toml_str = r#"
[engine]
default_strategy = "mcts"
halt_on_step_failure = false

[mcts]
iterations = 500
time_limit_ms = 250
seed = 7
"#;
        let config = AppConfig::parse(toml_str).unwrap();
        assert_eq!(config.engine.default_strategy, StrategyId::Mcts);
        assert!(!config.engine.halt_on_step_failure);
        assert_eq!(config.engine.node_timeout_secs, 120);
        assert_eq!(config.mcts.iterations, 500);
        assert_eq!(config.mcts.seed, 7);
        assert_eq!(config.mcts.time_limit(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_zero_timeouts_mean_unlimited() {
        let toml_str = r#"
[engine]
node_timeout_secs = 0
traversal_timeout_secs = 0
"#;
        let config = AppConfig::parse(toml_str).unwrap();
        assert!(config.engine.node_timeout().is_none());
        assert!(config.engine.traversal_timeout().is_none());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = AppConfig::parse("[mcts]\nrollout_batch = 0\n").unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));

        let err = AppConfig::parse("[dfs]\nmax_depth = 0\n").unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));

        let err = AppConfig::parse("[mcts]\npolicy_weight = -1.0\n").unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));

        let err = AppConfig::parse("[engine]\ndefault_strategy = \"astar\"\n").unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }
}
