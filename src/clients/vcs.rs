//! VCS clients: a file-backed local mode and a git-CLI mode.
//!
//! Both expose existence checks so the step executor can behave idempotently
//! per `(ticket, step)` — re-preparing an existing branch or re-opening an
//! existing PR is a no-op.

use super::VcsClient;
use crate::failure::{classify_process_failure, FailureKind};
use crate::step::StepFailure;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::process::Command;

/// Records branches and PRs as in-memory state persisted to a JSON file.
/// Enough to run the whole workflow without a repository.
#[derive(Debug)]
pub struct LocalVcs {
    state_path: PathBuf,
    state: Mutex<LocalVcsState>,
}

#[derive(Debug, Default, Clone, serde::Serialize, serde::Deserialize)]
struct LocalVcsState {
    branches: Vec<String>,
    /// branch -> PR reference
    pull_requests: HashMap<String, String>,
}

impl LocalVcs {
    pub fn new(state_path: impl Into<PathBuf>) -> Self {
        let state_path = state_path.into();
        let state = std::fs::read_to_string(&state_path)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_default();
        Self {
            state_path,
            state: Mutex::new(state),
        }
    }

    fn persist(&self, state: &LocalVcsState) -> Result<(), StepFailure> {
        if let Some(parent) = self.state_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StepFailure::fatal(format!("failed to create vcs dir: {}", e)))?;
        }
        let content = serde_json::to_string_pretty(state)
            .map_err(|e| StepFailure::fatal(format!("failed to serialize vcs state: {}", e)))?;
        std::fs::write(&self.state_path, content)
            .map_err(|e| StepFailure::fatal(format!("failed to write vcs state: {}", e)))
    }

    fn locked(&self) -> std::sync::MutexGuard<'_, LocalVcsState> {
        // Mutex poisoning only happens if a holder panicked; recover the data.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl VcsClient for LocalVcs {
    async fn branch_exists(&self, branch: &str) -> Result<bool, StepFailure> {
        Ok(self.locked().branches.iter().any(|b| b == branch))
    }

    async fn prepare_branch(&self, branch: &str) -> Result<(), StepFailure> {
        let mut state = self.locked();
        if !state.branches.iter().any(|b| b == branch) {
            state.branches.push(branch.to_string());
        }
        let snapshot = state.clone();
        drop(state);
        self.persist(&snapshot)
    }

    async fn push_branch(&self, branch: &str) -> Result<(), StepFailure> {
        if !self.branch_exists(branch).await? {
            return Err(StepFailure::fatal(format!(
                "cannot push unknown branch '{}'",
                branch
            )));
        }
        Ok(())
    }

    async fn find_pull_request(&self, branch: &str) -> Result<Option<String>, StepFailure> {
        Ok(self.locked().pull_requests.get(branch).cloned())
    }

    async fn open_pull_request(
        &self,
        branch: &str,
        _title: &str,
        _body: &str,
    ) -> Result<String, StepFailure> {
        let mut state = self.locked();
        let reference = format!("local-pr/{}", branch);
        state
            .pull_requests
            .insert(branch.to_string(), reference.clone());
        let snapshot = state.clone();
        drop(state);
        self.persist(&snapshot)?;
        Ok(reference)
    }
}

/// Shells out to `git` for branch operations and `gh` for pull requests.
pub struct GitCliVcs {
    repo_dir: PathBuf,
}

impl GitCliVcs {
    pub fn new(repo_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_dir: repo_dir.into(),
        }
    }

    async fn run(&self, program: &str, args: &[&str]) -> Result<String, StepFailure> {
        let resolved = which::which(program)
            .map_err(|e| StepFailure::fatal(format!("'{}' not found: {}", program, e)))?;
        let output = Command::new(resolved)
            .args(args)
            .current_dir(&self.repo_dir)
            .output()
            .await
            .map_err(|e| StepFailure::fatal(format!("failed to run {}: {}", program, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            let kind = classify_process_failure(&stderr, output.status.code());
            let summary: String = stderr.chars().take(400).collect();
            return Err(StepFailure::new(kind, summary));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl VcsClient for GitCliVcs {
    async fn branch_exists(&self, branch: &str) -> Result<bool, StepFailure> {
        let reference = format!("refs/heads/{}", branch);
        match self
            .run("git", &["rev-parse", "--verify", "--quiet", &reference])
            .await
        {
            Ok(_) => Ok(true),
            Err(failure) => match failure.kind {
                // rev-parse --quiet exits 1 for a missing ref
                FailureKind::ProcessExit(1) => Ok(false),
                _ => Err(failure),
            },
        }
    }

    async fn prepare_branch(&self, branch: &str) -> Result<(), StepFailure> {
        if self.branch_exists(branch).await? {
            return Ok(());
        }
        self.run("git", &["branch", branch]).await.map(|_| ())
    }

    async fn push_branch(&self, branch: &str) -> Result<(), StepFailure> {
        self.run("git", &["push", "--set-upstream", "origin", branch])
            .await
            .map(|_| ())
    }

    async fn find_pull_request(&self, branch: &str) -> Result<Option<String>, StepFailure> {
        let output = self
            .run(
                "gh",
                &[
                    "pr", "list", "--head", branch, "--state", "open", "--json", "url",
                    "--jq", ".[0].url",
                ],
            )
            .await?;
        if output.is_empty() {
            Ok(None)
        } else {
            Ok(Some(output))
        }
    }

    async fn open_pull_request(
        &self,
        branch: &str,
        title: &str,
        body: &str,
    ) -> Result<String, StepFailure> {
        self.run(
            "gh",
            &[
                "pr", "create", "--head", branch, "--title", title, "--body", body,
            ],
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn local_vcs_prepare_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let vcs = LocalVcs::new(dir.path().join("vcs.json"));

        assert!(!vcs.branch_exists("ticketflow/abc").await.unwrap());
        vcs.prepare_branch("ticketflow/abc").await.unwrap();
        vcs.prepare_branch("ticketflow/abc").await.unwrap();
        assert!(vcs.branch_exists("ticketflow/abc").await.unwrap());
        assert_eq!(vcs.locked().branches.len(), 1);
    }

    #[tokio::test]
    async fn local_vcs_reuses_open_pr() {
        let dir = TempDir::new().unwrap();
        let vcs = LocalVcs::new(dir.path().join("vcs.json"));
        vcs.prepare_branch("b").await.unwrap();

        assert!(vcs.find_pull_request("b").await.unwrap().is_none());
        let first = vcs.open_pull_request("b", "t", "body").await.unwrap();
        assert_eq!(vcs.find_pull_request("b").await.unwrap(), Some(first));
    }

    #[tokio::test]
    async fn local_vcs_state_survives_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vcs.json");
        {
            let vcs = LocalVcs::new(&path);
            vcs.prepare_branch("persisted").await.unwrap();
        }
        let vcs = LocalVcs::new(&path);
        assert!(vcs.branch_exists("persisted").await.unwrap());
    }
}
