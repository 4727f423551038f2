use crate::policy::{RejectionPolicy, RetryPolicy};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Top-level orchestrator configuration, loaded from YAML.
///
/// Every section has defaults so an empty file is a valid config.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
    /// Agent processes available to agent-backed steps, by name.
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
    /// Step-action to agent-name bindings; unbound actions use
    /// `default_agent`.
    #[serde(default)]
    pub bindings: BindingConfig,
    /// Default transient-retry policy for steps.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Per-phase human-rejection bounds.
    #[serde(default)]
    pub rejection: RejectionPolicy,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub vcs: VcsConfig,
    /// Default per-attempt step timeout in seconds. Default: 600
    #[serde(default = "default_step_timeout_secs")]
    pub step_timeout_secs: u64,
}

fn default_step_timeout_secs() -> u64 {
    600
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            agents: HashMap::new(),
            bindings: BindingConfig::default(),
            retry: RetryPolicy::default(),
            rejection: RejectionPolicy::default(),
            scheduler: SchedulerConfig::default(),
            vcs: VcsConfig::default(),
            step_timeout_secs: default_step_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BindingConfig {
    /// Agent used when an action has no explicit binding. Default: "claude"
    #[serde(default = "default_agent_name")]
    pub default_agent: String,
    /// Overrides keyed by action binding name (e.g. `draft_plan`).
    #[serde(default)]
    pub actions: HashMap<String, String>,
}

fn default_agent_name() -> String {
    "claude".to_string()
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            default_agent: default_agent_name(),
            actions: HashMap::new(),
        }
    }
}

impl BindingConfig {
    /// Resolves the agent name serving an action binding.
    pub fn agent_for(&self, binding: &str) -> &str {
        self.actions
            .get(binding)
            .map_or(self.default_agent.as_str(), String::as_str)
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// Seconds between inbox scans. Default: 2
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Concurrently executing tickets. Default: 4
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_tickets: usize,
}

fn default_poll_interval_secs() -> u64 {
    2
}

fn default_max_concurrent() -> usize {
    4
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            max_concurrent_tickets: default_max_concurrent(),
        }
    }
}

/// VCS client selection for the reference binary.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VcsConfig {
    #[serde(default)]
    pub mode: VcsMode,
    /// Repository the git-backed client operates on. Default: current dir
    #[serde(default = "default_repo_dir")]
    pub repo_dir: String,
    /// Prefix for ticket branches. Default: "ticketflow/"
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
}

impl Default for VcsConfig {
    fn default() -> Self {
        Self {
            mode: VcsMode::default(),
            repo_dir: default_repo_dir(),
            branch_prefix: default_branch_prefix(),
        }
    }
}

fn default_repo_dir() -> String {
    ".".to_string()
}

fn default_branch_prefix() -> String {
    "ticketflow/".to_string()
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VcsMode {
    /// File-backed markers under the data dir; no real repository needed.
    #[default]
    Local,
    /// Shells out to git (and gh for pull requests).
    Git,
}

impl OrchestratorConfig {
    /// Loads a YAML config file; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read config: {}", path.display()))
            }
        };
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", path.display()))
    }

    pub fn step_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.step_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: OrchestratorConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.rejection.max_planning_rejections, 5);
        assert_eq!(config.scheduler.poll_interval_secs, 2);
        assert_eq!(config.vcs.mode, VcsMode::Local);
        assert_eq!(config.bindings.agent_for("draft_plan"), "claude");
    }

    #[test]
    fn bindings_resolve_overrides() {
        let yaml = r#"
agents:
  claude:
    command: claude
    args: ["-p"]
  codex:
    command: codex
bindings:
  default_agent: claude
  actions:
    implement_changes: codex
rejection:
  max_planning_rejections: 2
"#;
        let config: OrchestratorConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.bindings.agent_for("implement_changes"), "codex");
        assert_eq!(config.bindings.agent_for("draft_plan"), "claude");
        assert_eq!(config.rejection.max_planning_rejections, 2);
        assert_eq!(config.agents.get("claude").unwrap().args, vec!["-p"]);
    }

    #[test]
    fn missing_file_is_defaults() {
        let config =
            OrchestratorConfig::load(Path::new("/nonexistent/ticketflow.yaml")).unwrap();
        assert_eq!(config.step_timeout_secs, 600);
    }
}
