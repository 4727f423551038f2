//! External collaborator interfaces.
//!
//! The orchestrator core treats agents, the issue tracker and the VCS as
//! opaque collaborators behind these traits. Side-effecting clients must be
//! idempotent per `(ticket, step)` or expose an existence check the step
//! executor consults before acting. The implementations here are thin local
//! references so the binary runs end to end; production deployments supply
//! their own.

pub mod agent;
pub mod tracker;
pub mod vcs;

pub use agent::CommandAgentRunner;
pub use tracker::FileTracker;
pub use vcs::{GitCliVcs, LocalVcs};

use crate::step::{StepContext, StepFailure};
use crate::ticket::TicketId;
use async_trait::async_trait;

/// A request to an agent-backed step.
#[derive(Debug, Clone)]
pub struct AgentRequest {
    /// Binding name resolving which configured agent serves the request.
    pub binding: String,
    pub prompt: String,
}

#[derive(Debug, Clone)]
pub struct AgentOutput {
    pub content: String,
}

/// Executes agent work. Arbitrary latency; must be cancellable through the
/// step context and must classify failures as transient or fatal.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(&self, request: AgentRequest, ctx: &StepContext)
        -> Result<AgentOutput, StepFailure>;
}

/// Issue-tracker side effects.
#[async_trait]
pub trait TrackerClient: Send + Sync {
    /// True if a comment for `(ticket, step)` was already posted.
    async fn comment_exists(&self, ticket: &TicketId, step_id: &str)
        -> Result<bool, StepFailure>;
    async fn post_comment(
        &self,
        ticket: &TicketId,
        step_id: &str,
        body: &str,
    ) -> Result<(), StepFailure>;
    async fn update_description(&self, ticket: &TicketId, body: &str) -> Result<(), StepFailure>;
}

/// VCS side effects.
#[async_trait]
pub trait VcsClient: Send + Sync {
    async fn branch_exists(&self, branch: &str) -> Result<bool, StepFailure>;
    /// Creates the branch if missing; a no-op when it already exists.
    async fn prepare_branch(&self, branch: &str) -> Result<(), StepFailure>;
    async fn push_branch(&self, branch: &str) -> Result<(), StepFailure>;
    /// URL (or id) of an open PR for the branch, if one exists.
    async fn find_pull_request(&self, branch: &str) -> Result<Option<String>, StepFailure>;
    async fn open_pull_request(
        &self,
        branch: &str,
        title: &str,
        body: &str,
    ) -> Result<String, StepFailure>;
}
