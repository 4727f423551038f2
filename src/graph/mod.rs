//! Graph definitions: the ordered/parallel step specifications for each phase.
//!
//! Graphs are immutable data. One graph per phase — Refinement, Planning,
//! Implementation — composed into a single workflow by the state model's
//! transition table. The engine in [`engine`] walks these definitions;
//! nothing here executes work.

pub mod engine;

use crate::policy::RetryPolicy;
use crate::state_model::{Phase, SuspensionKind, TicketEvent};
use std::collections::HashSet;
use std::fmt::{Display, Formatter};
use std::time::Duration;

/// Agent-backed step actions; each maps to a prompt and an agent binding in
/// the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentAction {
    AnalyzeCodebase,
    DraftQuestions,
    IncorporateAnswers,
    ProposeTicketUpdate,
    GatherContext,
    DraftPlan,
    RevisePlan,
    ImplementChanges,
    VerifyChanges,
    ReviseImplementation,
}

impl AgentAction {
    /// Config key used to bind this action to a configured agent.
    pub fn binding(&self) -> &'static str {
        match self {
            AgentAction::AnalyzeCodebase => "analyze_codebase",
            AgentAction::DraftQuestions => "draft_questions",
            AgentAction::IncorporateAnswers => "incorporate_answers",
            AgentAction::ProposeTicketUpdate => "propose_ticket_update",
            AgentAction::GatherContext => "gather_context",
            AgentAction::DraftPlan => "draft_plan",
            AgentAction::RevisePlan => "revise_plan",
            AgentAction::ImplementChanges => "implement_changes",
            AgentAction::VerifyChanges => "verify_changes",
            AgentAction::ReviseImplementation => "revise_implementation",
        }
    }
}

/// Tracker-backed side effects. All are idempotent per `(ticket, step)`:
/// the executor consults the tracker for prior completion before acting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerAction {
    PostQuestions,
    ApplyTicketUpdate,
    PostPlan,
    AnnounceStart,
    PostProgress,
    RequestReview,
    AnnouncePr,
}

/// VCS-backed side effects; idempotent via existence checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcsAction {
    PrepareBranch,
    PushBranch,
    OpenPullRequest,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Agent(AgentAction),
    Tracker(TrackerAction),
    Vcs(VcsAction),
}

/// Whether a step runs alone or as a member of a named parallel group.
/// Group members must be contiguous in the step list; the walk joins the
/// whole group before proceeding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    Sequential,
    Parallel(&'static str),
}

/// Where the walk goes after a step completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextStep {
    /// The next step in list order, or phase completion at the end.
    Continue,
    /// An explicit edge, used by revise steps to loop back to re-publication.
    Goto(&'static str),
}

/// Marks a step as a suspension point and declares the conditional resume
/// edges for each human decision. `None` means "the next step in list order".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuspensionSpec {
    pub kind: SuspensionKind,
    pub on_answered: Option<&'static str>,
    pub on_approved: Option<&'static str>,
    pub on_refined: Option<&'static str>,
    pub on_rejected: Option<&'static str>,
}

impl SuspensionSpec {
    fn new(kind: SuspensionKind) -> Self {
        Self {
            kind,
            on_answered: None,
            on_approved: None,
            on_refined: None,
            on_rejected: None,
        }
    }
}

/// One step of a graph.
#[derive(Debug, Clone)]
pub struct StepSpec {
    pub id: &'static str,
    pub kind: StepKind,
    pub mode: ExecMode,
    pub retry: RetryPolicy,
    /// Wall-clock budget per attempt; `None` uses the configured default.
    pub timeout: Option<Duration>,
    pub next: NextStep,
    pub suspension: Option<SuspensionSpec>,
}

impl StepSpec {
    fn new(id: &'static str, kind: StepKind, retry: RetryPolicy) -> Self {
        Self {
            id,
            kind,
            mode: ExecMode::Sequential,
            retry,
            timeout: None,
            next: NextStep::Continue,
            suspension: None,
        }
    }

    fn parallel(mut self, group: &'static str) -> Self {
        self.mode = ExecMode::Parallel(group);
        self
    }

    fn goto(mut self, target: &'static str) -> Self {
        self.next = NextStep::Goto(target);
        self
    }

    fn suspend(mut self, suspension: SuspensionSpec) -> Self {
        self.suspension = Some(suspension);
        self
    }
}

/// Error raised when a resume position or edge no longer matches the graph
/// definition — configuration drift, never a silent skip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphDrift {
    pub graph: Phase,
    pub detail: String,
}

impl Display for GraphDrift {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "graph {} drifted: {}", self.graph, self.detail)
    }
}

impl std::error::Error for GraphDrift {}

/// An immutable phase graph.
#[derive(Debug, Clone)]
pub struct Graph {
    pub phase: Phase,
    pub steps: Vec<StepSpec>,
}

impl Graph {
    pub fn index_of(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    pub fn step(&self, step_id: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Resolves where the walk re-enters after a human decision at the given
    /// suspension step. Returns drift errors when the step vanished from the
    /// definition or the event has no declared edge.
    pub fn resume_target(
        &self,
        suspended_step: &str,
        event: &TicketEvent,
    ) -> Result<String, GraphDrift> {
        let index = self.index_of(suspended_step).ok_or_else(|| GraphDrift {
            graph: self.phase,
            detail: format!("resume references unknown step '{}'", suspended_step),
        })?;
        let spec = &self.steps[index];
        let suspension = spec.suspension.as_ref().ok_or_else(|| GraphDrift {
            graph: self.phase,
            detail: format!("step '{}' is no longer a suspension point", suspended_step),
        })?;

        let explicit = match event {
            TicketEvent::HumanAnswered { .. } => suspension.on_answered,
            TicketEvent::HumanApproved => suspension.on_approved,
            TicketEvent::HumanRefined { .. } => suspension.on_refined,
            TicketEvent::HumanRejected { .. } => suspension.on_rejected,
            other => {
                return Err(GraphDrift {
                    graph: self.phase,
                    detail: format!(
                        "event {} cannot resume suspension at '{}'",
                        other.kind(),
                        suspended_step
                    ),
                })
            }
        };

        let target = match explicit {
            Some(id) => id.to_string(),
            None => match self.steps.get(index + 1) {
                Some(next) => next.id.to_string(),
                None => {
                    return Err(GraphDrift {
                        graph: self.phase,
                        detail: format!(
                            "no resume edge after final suspension '{}'",
                            suspended_step
                        ),
                    })
                }
            },
        };

        if self.step(&target).is_none() {
            return Err(GraphDrift {
                graph: self.phase,
                detail: format!("resume edge targets unknown step '{}'", target),
            });
        }
        Ok(target)
    }

    /// Structural sanity checks, run by tests against all built-in graphs:
    /// unique ids, contiguous parallel groups, goto/resume edges that exist,
    /// and no suspension points inside parallel groups.
    pub fn validate(&self) -> Result<(), GraphDrift> {
        let drift = |detail: String| GraphDrift {
            graph: self.phase,
            detail,
        };

        let mut seen = HashSet::new();
        for spec in &self.steps {
            if !seen.insert(spec.id) {
                return Err(drift(format!("duplicate step id '{}'", spec.id)));
            }
        }

        let mut closed_groups: HashSet<&str> = HashSet::new();
        let mut current_group: Option<&str> = None;
        for spec in &self.steps {
            match spec.mode {
                ExecMode::Parallel(group) => {
                    if let Some(current) = current_group {
                        if current != group {
                            closed_groups.insert(current);
                        }
                    }
                    if closed_groups.contains(group) {
                        return Err(drift(format!("parallel group '{}' is not contiguous", group)));
                    }
                    if spec.suspension.is_some() {
                        return Err(drift(format!(
                            "suspension point '{}' cannot be inside parallel group '{}'",
                            spec.id, group
                        )));
                    }
                    if !matches!(spec.next, NextStep::Continue) {
                        return Err(drift(format!(
                            "group member '{}' must use list order",
                            spec.id
                        )));
                    }
                    current_group = Some(group);
                }
                ExecMode::Sequential => {
                    if let Some(group) = current_group.take() {
                        closed_groups.insert(group);
                    }
                }
            }
        }

        for spec in &self.steps {
            if let NextStep::Goto(target) = spec.next {
                if self.index_of(target).is_none() {
                    return Err(drift(format!(
                        "step '{}' goes to unknown step '{}'",
                        spec.id, target
                    )));
                }
            }
            if let Some(suspension) = &spec.suspension {
                for edge in [
                    suspension.on_answered,
                    suspension.on_approved,
                    suspension.on_refined,
                    suspension.on_rejected,
                ]
                .into_iter()
                .flatten()
                {
                    if self.index_of(edge).is_none() {
                        return Err(drift(format!(
                            "suspension '{}' edge targets unknown step '{}'",
                            spec.id, edge
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Refinement: analyze the codebase, ask the human clarifying questions,
/// fold the answers into a proposed ticket update, and apply it once
/// approved.
pub fn refinement_graph(retry: RetryPolicy) -> Graph {
    use SuspensionKind as Suspend;
    Graph {
        phase: Phase::Refinement,
        steps: vec![
            StepSpec::new(
                "analyze-codebase",
                StepKind::Agent(AgentAction::AnalyzeCodebase),
                retry,
            ),
            StepSpec::new(
                "draft-questions",
                StepKind::Agent(AgentAction::DraftQuestions),
                retry,
            ),
            StepSpec::new(
                "post-questions",
                StepKind::Tracker(TrackerAction::PostQuestions),
                retry,
            )
            .suspend(SuspensionSpec::new(Suspend::AwaitingAnswers)),
            StepSpec::new(
                "incorporate-answers",
                StepKind::Agent(AgentAction::IncorporateAnswers),
                retry,
            ),
            StepSpec::new(
                "propose-ticket-update",
                StepKind::Agent(AgentAction::ProposeTicketUpdate),
                retry,
            )
            .suspend(SuspensionSpec {
                on_rejected: Some("propose-ticket-update"),
                ..SuspensionSpec::new(Suspend::AwaitingTicketApproval)
            }),
            StepSpec::new(
                "apply-ticket-update",
                StepKind::Tracker(TrackerAction::ApplyTicketUpdate),
                retry,
            ),
        ],
    }
}

/// Planning: gather context, draft a plan, publish it for review. Refinement
/// feedback loops through `revise-plan`; rejection regenerates from
/// `draft-plan`. Approval exits the phase.
pub fn planning_graph(retry: RetryPolicy) -> Graph {
    use SuspensionKind as Suspend;
    Graph {
        phase: Phase::Planning,
        steps: vec![
            StepSpec::new(
                "gather-context",
                StepKind::Agent(AgentAction::GatherContext),
                retry,
            ),
            StepSpec::new("draft-plan", StepKind::Agent(AgentAction::DraftPlan), retry),
            StepSpec::new("post-plan", StepKind::Tracker(TrackerAction::PostPlan), retry).suspend(
                SuspensionSpec {
                    on_refined: Some("revise-plan"),
                    on_rejected: Some("draft-plan"),
                    ..SuspensionSpec::new(Suspend::AwaitingPlanReview)
                },
            ),
            StepSpec::new("revise-plan", StepKind::Agent(AgentAction::RevisePlan), retry)
                .goto("post-plan"),
        ],
    }
}

/// Implementation: prepare a branch, implement and verify the change, publish
/// work (branch push and progress comment run in parallel), request review,
/// then open and announce the PR.
pub fn implementation_graph(retry: RetryPolicy) -> Graph {
    use SuspensionKind as Suspend;
    Graph {
        phase: Phase::Implementation,
        steps: vec![
            StepSpec::new(
                "announce-start",
                StepKind::Tracker(TrackerAction::AnnounceStart),
                retry,
            ),
            StepSpec::new(
                "prepare-branch",
                StepKind::Vcs(VcsAction::PrepareBranch),
                retry,
            ),
            StepSpec::new(
                "implement-changes",
                StepKind::Agent(AgentAction::ImplementChanges),
                retry,
            ),
            StepSpec::new(
                "verify-changes",
                StepKind::Agent(AgentAction::VerifyChanges),
                retry,
            ),
            StepSpec::new("push-branch", StepKind::Vcs(VcsAction::PushBranch), retry)
                .parallel("publish"),
            StepSpec::new(
                "post-progress",
                StepKind::Tracker(TrackerAction::PostProgress),
                retry,
            )
            .parallel("publish"),
            StepSpec::new(
                "request-review",
                StepKind::Tracker(TrackerAction::RequestReview),
                retry,
            )
            .suspend(SuspensionSpec {
                on_approved: Some("open-pr"),
                on_refined: Some("revise-implementation"),
                on_rejected: Some("implement-changes"),
                ..SuspensionSpec::new(Suspend::AwaitingImplementationReview)
            }),
            StepSpec::new(
                "revise-implementation",
                StepKind::Agent(AgentAction::ReviseImplementation),
                retry,
            )
            .goto("push-branch"),
            StepSpec::new("open-pr", StepKind::Vcs(VcsAction::OpenPullRequest), retry),
            StepSpec::new(
                "announce-pr",
                StepKind::Tracker(TrackerAction::AnnouncePr),
                retry,
            )
            .suspend(SuspensionSpec::new(Suspend::AwaitingMerge)),
        ],
    }
}

/// The graph serving a phase, built with the given default retry policy.
pub fn graph_for(phase: Phase, retry: RetryPolicy) -> Graph {
    match phase {
        Phase::Refinement => refinement_graph(retry),
        Phase::Planning => planning_graph(retry),
        Phase::Implementation => implementation_graph(retry),
    }
}

#[cfg(test)]
#[path = "tests/definition_tests.rs"]
mod definition_tests;
