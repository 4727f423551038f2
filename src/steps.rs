//! Dispatches graph steps to the external collaborators.
//!
//! One executor serves every step kind. Tracker posts are deduplicated per
//! `(ticket, step, content)` — the content hash keeps a crash-replayed step
//! from posting twice while still allowing re-publication after a revision
//! changes the body. VCS steps consult existence checks before acting.

use crate::clients::{AgentRequest, AgentRunner, TrackerClient, VcsClient};
use crate::graph::{AgentAction, StepKind, StepSpec, TrackerAction, VcsAction};
use crate::step::{StepContext, StepExecutor, StepFailure, StepResult};
use async_trait::async_trait;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;

pub struct WorkflowExecutor {
    agent: Arc<dyn AgentRunner>,
    tracker: Arc<dyn TrackerClient>,
    vcs: Arc<dyn VcsClient>,
    branch_prefix: String,
}

impl WorkflowExecutor {
    pub fn new(
        agent: Arc<dyn AgentRunner>,
        tracker: Arc<dyn TrackerClient>,
        vcs: Arc<dyn VcsClient>,
        branch_prefix: impl Into<String>,
    ) -> Self {
        Self {
            agent,
            tracker,
            vcs,
            branch_prefix: branch_prefix.into(),
        }
    }

    async fn run_agent(&self, action: AgentAction, ctx: &StepContext) -> StepResult {
        let request = AgentRequest {
            binding: action.binding().to_string(),
            prompt: prompt_for(action, ctx),
        };
        match self.agent.run(request, ctx).await {
            Ok(output) => StepResult::Success(Value::String(output.content)),
            Err(failure) => StepResult::from_failure(failure),
        }
    }

    async fn run_tracker(&self, action: TrackerAction, ctx: &StepContext) -> StepResult {
        match self.tracker_inner(action, ctx).await {
            Ok(output) => StepResult::Success(output),
            Err(failure) => StepResult::from_failure(failure),
        }
    }

    async fn tracker_inner(
        &self,
        action: TrackerAction,
        ctx: &StepContext,
    ) -> Result<Value, StepFailure> {
        match action {
            TrackerAction::PostQuestions => {
                let questions = require_artifact(ctx, "draft-questions")?;
                self.post_once(ctx, &questions).await?;
                Ok(json!({ "questions": questions }))
            }
            TrackerAction::ApplyTicketUpdate => {
                let update = require_artifact(ctx, "propose-ticket-update")?;
                self.tracker
                    .update_description(&ctx.ticket_id, &update)
                    .await?;
                Ok(json!({ "applied": true }))
            }
            TrackerAction::PostPlan => {
                let plan = latest_plan(ctx)?;
                self.post_once(ctx, &plan).await?;
                Ok(json!({ "plan": plan }))
            }
            TrackerAction::AnnounceStart => {
                let body = format!("Implementation started for: {}", ctx.title);
                self.post_once(ctx, &body).await?;
                Ok(Value::Null)
            }
            TrackerAction::PostProgress => {
                let branch = require_artifact(ctx, "prepare-branch")?;
                let body = format!("Work pushed to branch `{}`.", branch);
                self.post_once(ctx, &body).await?;
                Ok(json!({ "branch": branch }))
            }
            TrackerAction::RequestReview => {
                let branch = require_artifact(ctx, "prepare-branch")?;
                let summary = ctx
                    .artifact_str("verify-changes")
                    .unwrap_or("Implementation ready for review.")
                    .to_string();
                let body = format!("Review requested on `{}`.\n\n{}", branch, summary);
                self.post_once(ctx, &body).await?;
                Ok(json!({ "branch": branch, "summary": summary }))
            }
            TrackerAction::AnnouncePr => {
                let url = require_artifact(ctx, "open-pr")?;
                let body = format!("Pull request opened: {}", url);
                self.post_once(ctx, &body).await?;
                Ok(json!({ "pull_request": url }))
            }
        }
    }

    /// Posts a comment unless an identical one for this step already exists.
    async fn post_once(&self, ctx: &StepContext, body: &str) -> Result<(), StepFailure> {
        let key = format!("{}:{}", ctx.step_id, content_digest(body));
        if self.tracker.comment_exists(&ctx.ticket_id, &key).await? {
            return Ok(());
        }
        self.tracker.post_comment(&ctx.ticket_id, &key, body).await
    }

    async fn run_vcs(&self, action: VcsAction, ctx: &StepContext) -> StepResult {
        match self.vcs_inner(action, ctx).await {
            Ok(output) => StepResult::Success(output),
            Err(failure) => StepResult::from_failure(failure),
        }
    }

    async fn vcs_inner(&self, action: VcsAction, ctx: &StepContext) -> Result<Value, StepFailure> {
        match action {
            VcsAction::PrepareBranch => {
                let branch = format!("{}{}", self.branch_prefix, ctx.ticket_id.short());
                if !self.vcs.branch_exists(&branch).await? {
                    self.vcs.prepare_branch(&branch).await?;
                }
                Ok(Value::String(branch))
            }
            VcsAction::PushBranch => {
                let branch = require_artifact(ctx, "prepare-branch")?;
                self.vcs.push_branch(&branch).await?;
                Ok(json!({ "pushed": branch }))
            }
            VcsAction::OpenPullRequest => {
                let branch = require_artifact(ctx, "prepare-branch")?;
                if let Some(existing) = self.vcs.find_pull_request(&branch).await? {
                    return Ok(Value::String(existing));
                }
                let body = latest_plan(ctx).unwrap_or_else(|_| ctx.objective.clone());
                let url = self
                    .vcs
                    .open_pull_request(&branch, &ctx.title, &body)
                    .await?;
                Ok(Value::String(url))
            }
        }
    }
}

#[async_trait]
impl StepExecutor for WorkflowExecutor {
    async fn execute(&self, spec: &StepSpec, ctx: StepContext) -> StepResult {
        match spec.kind {
            StepKind::Agent(action) => self.run_agent(action, &ctx).await,
            StepKind::Tracker(action) => self.run_tracker(action, &ctx).await,
            StepKind::Vcs(action) => self.run_vcs(action, &ctx).await,
        }
    }
}

fn require_artifact(ctx: &StepContext, key: &str) -> Result<String, StepFailure> {
    ctx.artifact_str(key)
        .map(String::from)
        .ok_or_else(|| {
            StepFailure::fatal(format!(
                "step '{}' requires missing artifact '{}'",
                ctx.step_id, key
            ))
        })
}

/// The most recent plan text: a revision supersedes the original draft.
fn latest_plan(ctx: &StepContext) -> Result<String, StepFailure> {
    ctx.artifact_str("revise-plan")
        .or_else(|| ctx.artifact_str("draft-plan"))
        .map(String::from)
        .ok_or_else(|| StepFailure::fatal("no plan artifact available".to_string()))
}

fn content_digest(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    let hex = format!("{:x}", hasher.finalize());
    hex.chars().take(12).collect()
}

fn prompt_for(action: AgentAction, ctx: &StepContext) -> String {
    // A resume payload is the freshest human input; fall back to the
    // artifact copy for replays.
    let answers = ctx
        .resume
        .as_ref()
        .or_else(|| ctx.artifacts.get("answers"))
        .map(|v| v.to_string())
        .unwrap_or_default();
    let feedback = ctx.artifact_str("feedback").unwrap_or_default();
    match action {
        AgentAction::AnalyzeCodebase => format!(
            "Analyze the codebase for the following ticket and summarize the \
             relevant modules, constraints and risks.\n\nTicket: {}\n\n{}",
            ctx.title, ctx.objective
        ),
        AgentAction::DraftQuestions => format!(
            "Draft the clarifying questions a human must answer before this \
             ticket can be implemented.\n\nTicket: {}\n\n{}\n\nCodebase notes:\n{}",
            ctx.title,
            ctx.objective,
            ctx.artifact_str("analyze-codebase").unwrap_or_default()
        ),
        AgentAction::IncorporateAnswers => format!(
            "Fold the human's answers into the ticket's working notes.\n\n\
             Ticket: {}\n\nAnswers:\n{}",
            ctx.title, answers
        ),
        AgentAction::ProposeTicketUpdate => format!(
            "Write the refined ticket description incorporating everything \
             learned so far.\n\nTicket: {}\n\nOriginal description:\n{}\n\n\
             Notes:\n{}",
            ctx.title,
            ctx.objective,
            ctx.artifact_str("incorporate-answers").unwrap_or_default()
        ),
        AgentAction::GatherContext => format!(
            "Collect the code context needed to plan this ticket.\n\nTicket: {}\n\n{}",
            ctx.title,
            ctx.artifact_str("propose-ticket-update")
                .unwrap_or(&ctx.objective)
        ),
        AgentAction::DraftPlan => format!(
            "Write a step-by-step implementation plan.\n\nTicket: {}\n\n\
             Context:\n{}",
            ctx.title,
            ctx.artifact_str("gather-context").unwrap_or_default()
        ),
        AgentAction::RevisePlan => format!(
            "Revise the plan below, keeping its structure and incorporating \
             the feedback.\n\nPlan:\n{}\n\nFeedback:\n{}",
            ctx.artifact_str("draft-plan").unwrap_or_default(),
            feedback
        ),
        AgentAction::ImplementChanges => format!(
            "Implement the approved plan on the current branch.\n\nTicket: {}\n\n\
             Plan:\n{}",
            ctx.title,
            ctx.artifact_str("revise-plan")
                .or_else(|| ctx.artifact_str("draft-plan"))
                .unwrap_or_default()
        ),
        AgentAction::VerifyChanges => format!(
            "Verify the implemented changes against the plan and summarize \
             what was done and how it was tested.\n\nTicket: {}",
            ctx.title
        ),
        AgentAction::ReviseImplementation => format!(
            "Revise the implementation per the review feedback, keeping the \
             overall approach.\n\nFeedback:\n{}",
            feedback
        ),
    }
}
