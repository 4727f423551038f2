//! The atomic unit of execution inside a graph.
//!
//! A step wraps one call into an external collaborator (agent, tracker, VCS)
//! and classifies its own failures. Results are never silently discarded:
//! the engine folds every one into a retry, a transition, or a checkpoint.

use crate::failure::FailureKind;
use crate::graph::StepSpec;
use crate::ticket::{TenantId, TicketId};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::watch;

/// A classified step failure.
#[derive(Debug, Clone, PartialEq)]
pub struct StepFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl StepFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: FailureKind::Unknown(message.clone()),
            message,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Outcome of one step attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    /// The step finished; its output becomes an artifact keyed by step id.
    Success(Value),
    /// Retryable failure, bounded by the step's retry policy.
    Transient(StepFailure),
    /// The step (and with it the phase) aborts.
    Fatal(StepFailure),
    /// The step is waiting on human input; the value is the resume context.
    /// Only legal on steps declared as suspension points.
    #[allow(dead_code)]
    Suspend(Value),
}

impl StepResult {
    /// Folds a collaborator result into a step result using the failure's
    /// own classification.
    pub fn from_failure(failure: StepFailure) -> Self {
        if failure.is_transient() {
            StepResult::Transient(failure)
        } else {
            StepResult::Fatal(failure)
        }
    }
}

/// Everything a step needs to run. Tenant identity is threaded explicitly —
/// the scheduler may execute steps for many tenants in one process, so there
/// is no ambient "current tenant".
#[derive(Debug, Clone)]
pub struct StepContext {
    pub tenant: TenantId,
    pub ticket_id: TicketId,
    pub step_id: String,
    /// 1-based attempt number; idempotent side effects key on
    /// `(ticket_id, step_id)` and must ignore this.
    pub attempt: u32,
    pub title: String,
    pub objective: String,
    /// Outputs of previously completed steps, keyed by step id, plus human
    /// payloads merged in by the orchestrator (`answers`, `feedback`).
    pub artifacts: HashMap<String, Value>,
    /// Payload of the resume event that re-entered the walk, if any.
    pub resume: Option<Value>,
    /// Cooperative cancellation; steps with long external calls should
    /// select against this.
    pub cancel_rx: watch::Receiver<bool>,
}

impl StepContext {
    /// String artifact lookup, for prompt construction.
    pub fn artifact_str(&self, key: &str) -> Option<&str> {
        self.artifacts.get(key).and_then(Value::as_str)
    }
}

/// Executes steps against the external collaborators. One implementation
/// serves the whole workflow; the engine dispatches every step through it.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(&self, spec: &StepSpec, ctx: StepContext) -> StepResult;
}
