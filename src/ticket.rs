//! The ticket record: the unit of work tracked end-to-end by the orchestrator.
//!
//! A ticket is owned exclusively by the orchestrator. Nothing else mutates it;
//! external collaborators and the CLI only enqueue events against it.

use crate::failure::TicketFailure;
use crate::policy::RejectionRecord;
use crate::state_model::{Phase, TicketState};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Unique ticket identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(Uuid);

impl TicketId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parses an id from its canonical hyphenated form.
    pub fn parse(value: &str) -> anyhow::Result<Self> {
        Ok(Self(Uuid::parse_str(value)?))
    }

    /// Short prefix used in branch names and log lines.
    pub fn short(&self) -> String {
        self.0.to_string().chars().take(8).collect()
    }
}

impl Default for TicketId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for TicketId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Tenant the ticket belongs to. The scheduler may run many tenants in one
/// process, so this is threaded explicitly through every step context.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }
}

impl Display for TenantId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Persisted ticket record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub tenant: TenantId,
    pub title: String,
    /// The work description as submitted; refinement replaces it via the
    /// `ticket_update` artifact, never in place.
    pub objective: String,
    pub state: TicketState,
    /// Graph the ticket is currently executing, if any.
    pub active_graph: Option<Phase>,
    /// Next step to run when re-entering a running state (crash/cancel
    /// recovery). `None` means the graph starts fresh.
    #[serde(default)]
    pub position: Option<String>,
    /// Transient attempts per step, for diagnostics. Reset when the step is
    /// entered afresh and when the phase exits.
    #[serde(default)]
    pub step_attempts: HashMap<String, u32>,
    /// Human-rejection counters, scoped per phase.
    #[serde(default)]
    pub rejections: HashMap<Phase, RejectionRecord>,
    /// Step outputs later steps consume: questions, answers, ticket update,
    /// plan, branch name, PR id.
    #[serde(default)]
    pub artifacts: HashMap<String, Value>,
    /// Diagnostics when the ticket is `Failed`.
    #[serde(default)]
    pub failure: Option<TicketFailure>,
    pub created_at: String,
    pub updated_at: String,
}

impl Ticket {
    pub fn new(tenant: TenantId, title: impl Into<String>, objective: impl Into<String>) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            id: TicketId::new(),
            tenant,
            title: title.into(),
            objective: objective.into(),
            state: TicketState::Pending,
            active_graph: None,
            position: None,
            step_attempts: HashMap::new(),
            rejections: HashMap::new(),
            artifacts: HashMap::new(),
            failure: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn set_updated_at(&mut self) {
        self.updated_at = Utc::now().to_rfc3339();
    }

    /// Rejection record for a phase, creating it on first use.
    pub fn rejection_record_mut(&mut self, phase: Phase) -> &mut RejectionRecord {
        self.rejections.entry(phase).or_default()
    }

    /// Clears per-phase scratch state when a phase exits successfully: the
    /// rejection counter, step attempts and the walk position.
    pub fn reset_phase_scratch(&mut self, phase: Phase) {
        self.rejections.remove(&phase);
        self.step_attempts.clear();
        self.position = None;
    }

    /// Records the attempts a step consumed in the last engine run.
    pub fn record_step_attempts(&mut self, step_id: &str, attempts: u32) {
        self.step_attempts.insert(step_id.to_string(), attempts);
    }
}
