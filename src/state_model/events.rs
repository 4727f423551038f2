//! Events that drive the orchestrator's fold over ticket state.
//!
//! Human events and `Start`/`Cancel` arrive from outside through the ticket
//! inbox; `StepCompleted`, `Suspended`, `PhaseCompleted`, `PhaseFailed` and
//! `Timeout` are generated internally from the graph engine's report. Both
//! sets are validated against the same transition table.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};

/// What a suspended ticket is waiting for. Carried by checkpoints and by the
/// internal `Suspended` fold.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SuspensionKind {
    AwaitingAnswers,
    AwaitingTicketApproval,
    AwaitingPlanReview,
    AwaitingImplementationReview,
    AwaitingMerge,
}

impl Display for SuspensionKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SuspensionKind::AwaitingAnswers => "awaiting_answers",
            SuspensionKind::AwaitingTicketApproval => "awaiting_ticket_approval",
            SuspensionKind::AwaitingPlanReview => "awaiting_plan_review",
            SuspensionKind::AwaitingImplementationReview => "awaiting_implementation_review",
            SuspensionKind::AwaitingMerge => "awaiting_merge",
        };
        write!(f, "{}", name)
    }
}

/// All events the orchestrator can fold into a ticket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TicketEvent {
    /// Initial trigger; enqueued when the ticket is created.
    Start,
    /// A graph step finished (internal, bookkeeping self-transition).
    StepCompleted { step_id: String },
    /// The graph reached a suspension point (internal).
    Suspended { kind: SuspensionKind },
    /// The active graph ran out of steps (internal).
    PhaseCompleted,
    /// The active graph aborted (internal).
    PhaseFailed { reason: String },
    /// Human supplied answers to the posted questions.
    HumanAnswered { answers: Value },
    /// Human approved the suspended output as-is.
    HumanApproved,
    /// Human asked for a revision that keeps the structure. Not a rejection.
    HumanRefined { feedback: String },
    /// Human discarded the output and asked to regenerate. Counted against
    /// the phase rejection bound.
    HumanRejected { reason: String },
    /// A step's wall-clock budget expired (folds as transient).
    Timeout { step_id: String },
    /// Ticket cancelled (tenant deactivated, operator action).
    Cancel { reason: String },
}

impl TicketEvent {
    /// Stable discriminant name for logging and rejection messages.
    pub fn kind(&self) -> &'static str {
        match self {
            TicketEvent::Start => "start",
            TicketEvent::StepCompleted { .. } => "step_completed",
            TicketEvent::Suspended { .. } => "suspended",
            TicketEvent::PhaseCompleted => "phase_completed",
            TicketEvent::PhaseFailed { .. } => "phase_failed",
            TicketEvent::HumanAnswered { .. } => "human_answered",
            TicketEvent::HumanApproved => "human_approved",
            TicketEvent::HumanRefined { .. } => "human_refined",
            TicketEvent::HumanRejected { .. } => "human_rejected",
            TicketEvent::Timeout { .. } => "timeout",
            TicketEvent::Cancel { .. } => "cancel",
        }
    }

    /// True for events that originate outside the orchestrator (inbox events).
    pub fn is_external(&self) -> bool {
        matches!(
            self,
            TicketEvent::Start
                | TicketEvent::HumanAnswered { .. }
                | TicketEvent::HumanApproved
                | TicketEvent::HumanRefined { .. }
                | TicketEvent::HumanRejected { .. }
                | TicketEvent::Cancel { .. }
        )
    }
}
