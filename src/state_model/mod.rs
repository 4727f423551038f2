//! Ticket lifecycle states and the explicit transition table.
//!
//! This module is the ONLY authority on which transitions are legal. It is
//! side-effect free: `next_state` validates a `(state, event)` pair and
//! returns the successor state, or rejects the event leaving state unchanged.
//! Nothing here executes work, persists anything, or counts retries — those
//! concerns live in the orchestrator and the policy module.

mod events;

pub use events::{SuspensionKind, TicketEvent};

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// The coarse workflow phases, each backed by one graph definition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Refinement,
    Planning,
    Implementation,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Refinement => write!(f, "refinement"),
            Phase::Planning => write!(f, "planning"),
            Phase::Implementation => write!(f, "implementation"),
        }
    }
}

/// The closed set of ticket lifecycle states.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketState {
    Pending,
    Analyzing,
    AwaitingAnswers,
    GeneratingTicketUpdate,
    TicketUpdateGenerated,
    UpdatingTicket,
    Planning,
    PlanUnderReview,
    RevisingPlan,
    Implementing,
    ImplementationUnderReview,
    RevisingImplementation,
    CreatingPr,
    PrCreated,
    Completed,
    Failed,
    Cancelled,
}

/// Broad behavioral classification of a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    /// Waiting for the initial `Start` trigger.
    Initial,
    /// The graph engine has runnable work.
    Running,
    /// Parked on a checkpoint, waiting for a human decision.
    Suspended,
    /// No further transitions are accepted.
    Terminal,
}

impl TicketState {
    /// Classifies the state for the orchestrator's run loop.
    pub fn kind(&self) -> StateKind {
        match self {
            TicketState::Pending => StateKind::Initial,
            TicketState::Analyzing
            | TicketState::GeneratingTicketUpdate
            | TicketState::UpdatingTicket
            | TicketState::Planning
            | TicketState::RevisingPlan
            | TicketState::Implementing
            | TicketState::RevisingImplementation
            | TicketState::CreatingPr => StateKind::Running,
            TicketState::AwaitingAnswers
            | TicketState::TicketUpdateGenerated
            | TicketState::PlanUnderReview
            | TicketState::ImplementationUnderReview
            | TicketState::PrCreated => StateKind::Suspended,
            TicketState::Completed | TicketState::Failed | TicketState::Cancelled => {
                StateKind::Terminal
            }
        }
    }

    /// Returns the phase whose graph serves this state, if any.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            TicketState::Pending
            | TicketState::Completed
            | TicketState::Failed
            | TicketState::Cancelled => None,
            TicketState::Analyzing
            | TicketState::AwaitingAnswers
            | TicketState::GeneratingTicketUpdate
            | TicketState::TicketUpdateGenerated
            | TicketState::UpdatingTicket => Some(Phase::Refinement),
            TicketState::Planning | TicketState::PlanUnderReview | TicketState::RevisingPlan => {
                Some(Phase::Planning)
            }
            TicketState::Implementing
            | TicketState::ImplementationUnderReview
            | TicketState::RevisingImplementation
            | TicketState::CreatingPr
            | TicketState::PrCreated => Some(Phase::Implementation),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind() == StateKind::Terminal
    }

    /// What a suspended state is waiting for; `None` for non-suspended
    /// states. Used to cross-check a loaded checkpoint against the ticket.
    pub fn suspension(&self) -> Option<SuspensionKind> {
        match self {
            TicketState::AwaitingAnswers => Some(SuspensionKind::AwaitingAnswers),
            TicketState::TicketUpdateGenerated => Some(SuspensionKind::AwaitingTicketApproval),
            TicketState::PlanUnderReview => Some(SuspensionKind::AwaitingPlanReview),
            TicketState::ImplementationUnderReview => {
                Some(SuspensionKind::AwaitingImplementationReview)
            }
            TicketState::PrCreated => Some(SuspensionKind::AwaitingMerge),
            _ => None,
        }
    }
}

impl Display for TicketState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TicketState::Pending => "pending",
            TicketState::Analyzing => "analyzing",
            TicketState::AwaitingAnswers => "awaiting_answers",
            TicketState::GeneratingTicketUpdate => "generating_ticket_update",
            TicketState::TicketUpdateGenerated => "ticket_update_generated",
            TicketState::UpdatingTicket => "updating_ticket",
            TicketState::Planning => "planning",
            TicketState::PlanUnderReview => "plan_under_review",
            TicketState::RevisingPlan => "revising_plan",
            TicketState::Implementing => "implementing",
            TicketState::ImplementationUnderReview => "implementation_under_review",
            TicketState::RevisingImplementation => "revising_implementation",
            TicketState::CreatingPr => "creating_pr",
            TicketState::PrCreated => "pr_created",
            TicketState::Completed => "completed",
            TicketState::Failed => "failed",
            TicketState::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Rejection of an event that has no entry in the transition table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionRejected {
    pub state: TicketState,
    pub event: String,
}

impl Display for TransitionRejected {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "event {} is not legal in state {}",
            self.event, self.state
        )
    }
}

impl std::error::Error for TransitionRejected {}

/// Validates `(current, event)` against the transition table.
///
/// The table is total and explicit: every legal pair is listed below and the
/// final arm rejects everything else. Terminal states accept no events.
pub fn next_state(
    current: TicketState,
    event: &TicketEvent,
) -> Result<TicketState, TransitionRejected> {
    use SuspensionKind as Suspend;
    use TicketEvent as Ev;
    use TicketState as St;

    let next = match (current, event) {
        // Cancellation and fatal aborts are legal from every non-terminal state.
        (state, Ev::Cancel { .. }) if !state.is_terminal() => St::Cancelled,
        (state, Ev::PhaseFailed { .. }) if !state.is_terminal() => St::Failed,

        (St::Pending, Ev::Start) => St::Analyzing,

        // Refinement
        (St::Analyzing, Ev::StepCompleted { .. }) => St::Analyzing,
        (St::Analyzing, Ev::Timeout { .. }) => St::Analyzing,
        (St::Analyzing, Ev::Suspended { kind: Suspend::AwaitingAnswers }) => St::AwaitingAnswers,
        (St::AwaitingAnswers, Ev::HumanAnswered { .. }) => St::GeneratingTicketUpdate,
        (St::GeneratingTicketUpdate, Ev::StepCompleted { .. }) => St::GeneratingTicketUpdate,
        (St::GeneratingTicketUpdate, Ev::Timeout { .. }) => St::GeneratingTicketUpdate,
        (St::GeneratingTicketUpdate, Ev::Suspended { kind: Suspend::AwaitingTicketApproval }) => {
            St::TicketUpdateGenerated
        }
        (St::TicketUpdateGenerated, Ev::HumanApproved) => St::UpdatingTicket,
        (St::TicketUpdateGenerated, Ev::HumanRejected { .. }) => St::GeneratingTicketUpdate,
        (St::UpdatingTicket, Ev::StepCompleted { .. }) => St::UpdatingTicket,
        (St::UpdatingTicket, Ev::Timeout { .. }) => St::UpdatingTicket,
        (St::UpdatingTicket, Ev::PhaseCompleted) => St::Planning,

        // Planning
        (St::Planning, Ev::StepCompleted { .. }) => St::Planning,
        (St::Planning, Ev::Timeout { .. }) => St::Planning,
        (St::Planning, Ev::Suspended { kind: Suspend::AwaitingPlanReview }) => St::PlanUnderReview,
        (St::PlanUnderReview, Ev::HumanApproved) => St::Implementing,
        (St::PlanUnderReview, Ev::HumanRefined { .. }) => St::RevisingPlan,
        (St::PlanUnderReview, Ev::HumanRejected { .. }) => St::Planning,
        (St::RevisingPlan, Ev::StepCompleted { .. }) => St::RevisingPlan,
        (St::RevisingPlan, Ev::Timeout { .. }) => St::RevisingPlan,
        (St::RevisingPlan, Ev::Suspended { kind: Suspend::AwaitingPlanReview }) => {
            St::PlanUnderReview
        }

        // Implementation
        (St::Implementing, Ev::StepCompleted { .. }) => St::Implementing,
        (St::Implementing, Ev::Timeout { .. }) => St::Implementing,
        (St::Implementing, Ev::Suspended { kind: Suspend::AwaitingImplementationReview }) => {
            St::ImplementationUnderReview
        }
        (St::ImplementationUnderReview, Ev::HumanApproved) => St::CreatingPr,
        (St::ImplementationUnderReview, Ev::HumanRefined { .. }) => St::RevisingImplementation,
        (St::ImplementationUnderReview, Ev::HumanRejected { .. }) => St::Implementing,
        (St::RevisingImplementation, Ev::StepCompleted { .. }) => St::RevisingImplementation,
        (St::RevisingImplementation, Ev::Timeout { .. }) => St::RevisingImplementation,
        (
            St::RevisingImplementation,
            Ev::Suspended { kind: Suspend::AwaitingImplementationReview },
        ) => St::ImplementationUnderReview,
        (St::CreatingPr, Ev::StepCompleted { .. }) => St::CreatingPr,
        (St::CreatingPr, Ev::Timeout { .. }) => St::CreatingPr,
        (St::CreatingPr, Ev::Suspended { kind: Suspend::AwaitingMerge }) => St::PrCreated,
        (St::PrCreated, Ev::HumanApproved) => St::Completed,

        (state, event) => {
            return Err(TransitionRejected {
                state,
                event: event.kind().to_string(),
            })
        }
    };

    Ok(next)
}
