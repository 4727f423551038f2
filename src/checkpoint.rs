//! Durable record of a paused execution position.
//!
//! A checkpoint is created exactly when a step that is a suspension point has
//! signalled "waiting on human input", and is superseded or cleared when the
//! matching resume event arrives and the graph advances past it. There is at
//! most one live checkpoint per ticket; the store enforces this with a single
//! upsert keyed by ticket id.

use crate::state_model::{Phase, SuspensionKind};
use crate::ticket::TicketId;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub ticket_id: TicketId,
    /// Graph the suspension belongs to; resuming against a different graph is
    /// configuration drift.
    pub graph: Phase,
    /// The suspension-point step whose output is parked here.
    pub step_id: String,
    pub kind: SuspensionKind,
    /// Everything needed to resume: the suspension step's output (posted
    /// questions, the proposed update, the plan, the PR reference).
    pub resume_context: Value,
    pub created_at: String,
}

impl Checkpoint {
    pub fn new(
        ticket_id: TicketId,
        graph: Phase,
        step_id: impl Into<String>,
        kind: SuspensionKind,
        resume_context: Value,
    ) -> Self {
        Self {
            ticket_id,
            graph,
            step_id: step_id.into(),
            kind,
            resume_context,
            created_at: Utc::now().to_rfc3339(),
        }
    }
}
