//! Agent execution by spawning a configured CLI process.
//!
//! The prompt goes to the process on stdin; stdout is the result. Failures
//! are classified from stderr patterns and the exit code. Cancellation kills
//! the child rather than waiting it out.

use super::{AgentOutput, AgentRequest, AgentRunner};
use crate::config::{AgentConfig, BindingConfig};
use crate::failure::{classify_process_failure, FailureKind};
use crate::step::{StepContext, StepFailure};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

pub struct CommandAgentRunner {
    agents: HashMap<String, AgentConfig>,
    bindings: BindingConfig,
    working_dir: PathBuf,
}

impl CommandAgentRunner {
    pub fn new(
        agents: HashMap<String, AgentConfig>,
        bindings: BindingConfig,
        working_dir: PathBuf,
    ) -> Self {
        Self {
            agents,
            bindings,
            working_dir,
        }
    }

    fn agent_for(&self, binding: &str) -> Result<&AgentConfig, StepFailure> {
        let name = self.bindings.agent_for(binding);
        self.agents.get(name).ok_or_else(|| {
            StepFailure::fatal(format!(
                "no agent named '{}' configured for binding '{}'",
                name, binding
            ))
        })
    }
}

#[async_trait]
impl AgentRunner for CommandAgentRunner {
    async fn run(
        &self,
        request: AgentRequest,
        ctx: &StepContext,
    ) -> Result<AgentOutput, StepFailure> {
        let config = self.agent_for(&request.binding)?;
        tracing::debug!(
            "agent {} for tenant {} step {} attempt {}",
            config.command,
            ctx.tenant,
            ctx.step_id,
            ctx.attempt
        );

        let program = which::which(&config.command).map_err(|e| {
            StepFailure::fatal(format!("agent command '{}' not found: {}", config.command, e))
        })?;

        let mut child = Command::new(program)
            .args(&config.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StepFailure::fatal(format!("failed to spawn agent: {}", e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.prompt.as_bytes())
                .await
                .map_err(|e| {
                    StepFailure::new(FailureKind::Network, format!("agent stdin closed: {}", e))
                })?;
            drop(stdin);
        }

        let mut cancel_rx = ctx.cancel_rx.clone();
        let output = tokio::select! {
            output = child.wait_with_output() => output.map_err(|e| {
                StepFailure::new(
                    FailureKind::Unknown(e.to_string()),
                    format!("agent process error: {}", e),
                )
            })?,
            _ = cancel_rx.changed() => {
                return Err(StepFailure::new(
                    FailureKind::Timeout,
                    "agent run cancelled".to_string(),
                ));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            let kind = classify_process_failure(&stderr, output.status.code());
            let summary: String = stderr.chars().take(400).collect();
            return Err(StepFailure::new(kind, summary));
        }
        if stdout.is_empty() {
            return Err(StepFailure::new(
                FailureKind::EmptyOutput,
                "agent produced no output".to_string(),
            ));
        }

        Ok(AgentOutput { content: stdout })
    }
}
