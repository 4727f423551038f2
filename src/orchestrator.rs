//! The workflow orchestrator: folds events into ticket state.
//!
//! On each event it loads the ticket and any live checkpoint, runs the
//! invariant checks, gates rejections through the policy, validates the event
//! against the transition table, drives the graph engine while the ticket is
//! in a running state, persists ticket and checkpoint as one atomic unit per
//! fold, and emits a state-change event after every successful fold.
//!
//! Checkpoints are cleared only after the engine has consumed the resume
//! context and produced a new outcome; a crash in between leaves a running
//! ticket whose persisted position restarts the walk at its last committed
//! step, relying on step idempotency rather than losing work.

use crate::checkpoint::Checkpoint;
use crate::events::{EventBus, StateChanged};
use crate::failure::{FailureKind, TicketFailure};
use crate::graph::engine::{Entry, ExecutionScope, GraphEngine, GraphOutcome};
use crate::graph::{graph_for, Graph};
use crate::policy::{RejectionPolicy, RetryPolicy};
use crate::state_model::{next_state, StateKind, TicketEvent, TicketState};
use crate::step::StepExecutor;
use crate::store::{CheckpointStore, TicketStore};
use crate::structured_logger::StructuredLogger;
use crate::ticket::{Ticket, TicketId};
use anyhow::{anyhow, Context, Result};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// What one `handle_event` call did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandleResult {
    /// The event was folded; the ticket ended the invocation in this state.
    Applied(TicketState),
    /// The event is not legal for the current state and was dropped. The
    /// ticket is unchanged.
    Refused(String),
}

/// How a fold commits the checkpoint alongside the ticket.
enum CheckpointCommit {
    /// Ticket only; any existing checkpoint stays (in-flight resume).
    Keep,
    /// Upsert the new checkpoint with the ticket.
    Set(Checkpoint),
    /// Remove the checkpoint with the ticket.
    Clear,
}

pub struct Orchestrator {
    tickets: Arc<dyn TicketStore>,
    checkpoints: Arc<dyn CheckpointStore>,
    engine: GraphEngine,
    bus: EventBus,
    logger: Arc<StructuredLogger>,
    retry: RetryPolicy,
    rejection: RejectionPolicy,
    /// Process-wide shutdown signal, honored between steps.
    cancel_rx: watch::Receiver<bool>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tickets: Arc<dyn TicketStore>,
        checkpoints: Arc<dyn CheckpointStore>,
        executor: Arc<dyn StepExecutor>,
        bus: EventBus,
        logger: Arc<StructuredLogger>,
        retry: RetryPolicy,
        rejection: RejectionPolicy,
        default_step_timeout: Duration,
        cancel_rx: watch::Receiver<bool>,
    ) -> Self {
        let engine = GraphEngine::new(executor, Arc::clone(&logger), default_step_timeout);
        Self {
            tickets,
            checkpoints,
            engine,
            bus,
            logger,
            retry,
            rejection,
            cancel_rx,
        }
    }

    /// Folds one event into the ticket, driving the active graph until it
    /// suspends, completes the workflow, fails, or is interrupted.
    ///
    /// Must be called under the per-ticket execution lock; two concurrent
    /// invocations for one ticket would race on the checkpoint.
    pub async fn handle_event(
        &self,
        ticket_id: &TicketId,
        event: TicketEvent,
    ) -> Result<HandleResult> {
        self.logger.log_event_received(ticket_id, &event);

        let mut ticket = self
            .tickets
            .load(ticket_id)
            .await?
            .ok_or_else(|| anyhow!("unknown ticket {}", ticket_id))?;
        let checkpoint = self.checkpoints.load(ticket_id).await?;

        // Terminal states accept nothing; let the table refuse uniformly.
        if let Err(rejected) = next_state(ticket.state, &event) {
            self.logger
                .log_event_refused(ticket_id, &event, &rejected.to_string());
            return Ok(HandleResult::Refused(rejected.to_string()));
        }

        if let Some(detail) = self.invariant_breach(&ticket, checkpoint.as_ref()) {
            let state = self.fail_ticket(&mut ticket, FailureKind::InvariantViolation, None, detail)
                .await?;
            return Ok(HandleResult::Applied(state));
        }

        // Rejection gate: an exhausted bound refuses the event and fails the
        // ticket instead; otherwise the counter advances with the event.
        let effective = event;
        if let TicketEvent::HumanRejected { reason } = &effective {
            if let Some(phase) = ticket.state.phase() {
                let bound = self.rejection.bound_for(phase);
                let record = ticket.rejection_record_mut(phase);
                if record.exhausted(bound) {
                    let reason = format!("max {} rejections exceeded", phase);
                    self.logger
                        .log_event_refused(ticket_id, &effective, &reason);
                    let state = self
                        .fail_ticket(&mut ticket, FailureKind::RejectionsExhausted, None, reason)
                        .await?;
                    return Ok(HandleResult::Applied(state));
                }
                record.record(reason);
            }
        }

        let previous = ticket.state;
        let next = next_state(previous, &effective)
            .map_err(|rejected| anyhow!("internal fold refused: {}", rejected))?;

        merge_human_payload(&mut ticket, &effective);
        let mut resume_payload = human_payload(&effective);

        // Same-phase resume from a suspension point follows the graph's
        // conditional edge; drift there is fatal, never a silent skip.
        let mut pending_entry: Option<Entry> = None;
        if previous.kind() == StateKind::Suspended
            && next.kind() == StateKind::Running
            && previous.phase() == next.phase()
        {
            let suspended = checkpoint
                .as_ref()
                .map(|cp| cp.step_id.clone())
                .context("suspended ticket lost its checkpoint mid-fold")?;
            let graph = self.graph(next)?;
            match graph.resume_target(&suspended, &effective) {
                Ok(target) => {
                    ticket.position = Some(target.clone());
                    pending_entry = Some(Entry::At(target));
                }
                Err(drift) => {
                    let state = self
                        .fail_ticket(
                            &mut ticket,
                            FailureKind::ConfigurationDrift,
                            Some(suspended),
                            drift.to_string(),
                        )
                        .await?;
                    return Ok(HandleResult::Applied(state));
                }
            }
        }

        // Fold the external event. The checkpoint survives this commit: it is
        // cleared only once the engine has produced a new outcome.
        self.apply_state(&mut ticket, next);
        let commit = if next.is_terminal() {
            CheckpointCommit::Clear
        } else {
            CheckpointCommit::Keep
        };
        let reason = fold_reason(&effective);
        self.commit_and_emit(&ticket, previous, commit, reason).await?;

        // Drive the graph while the ticket has runnable work.
        while ticket.state.kind() == StateKind::Running {
            let graph = self.graph(ticket.state)?;
            let entry = pending_entry.take().unwrap_or_else(|| match &ticket.position {
                Some(step_id) => Entry::At(step_id.clone()),
                None => Entry::Fresh,
            });
            let scope = ExecutionScope {
                tenant: ticket.tenant.clone(),
                ticket_id: ticket.id,
                title: ticket.title.clone(),
                objective: ticket.objective.clone(),
                artifacts: ticket.artifacts.clone(),
                resume: resume_payload.take(),
                cancel_rx: self.cancel_rx.clone(),
            };

            let report = self.engine.run(&graph, entry, &scope).await;
            ticket.artifacts = report.artifacts;
            for step in &report.completed {
                ticket.record_step_attempts(&step.step_id, step.attempts);
                // Bookkeeping self-transition; running states always accept it.
                let fold = TicketEvent::StepCompleted {
                    step_id: step.step_id.clone(),
                };
                if let Err(rejected) = next_state(ticket.state, &fold) {
                    tracing::warn!("step completion fold refused: {}", rejected);
                }
            }

            match report.outcome {
                GraphOutcome::Advanced { next_step } => {
                    // Interrupted by shutdown; persist the position and stop.
                    ticket.position = Some(next_step);
                    ticket.set_updated_at();
                    self.tickets.save(&ticket).await?;
                    break;
                }
                GraphOutcome::PhaseComplete => {
                    let previous = ticket.state;
                    let next = match next_state(previous, &TicketEvent::PhaseCompleted) {
                        Ok(next) => next,
                        Err(rejected) => {
                            let state = self
                                .fail_ticket(
                                    &mut ticket,
                                    FailureKind::InvariantViolation,
                                    None,
                                    format!("graph completed but {}", rejected),
                                )
                                .await?;
                            return Ok(HandleResult::Applied(state));
                        }
                    };
                    self.apply_state(&mut ticket, next);
                    self.commit_and_emit(&ticket, previous, CheckpointCommit::Clear, None)
                        .await?;
                }
                GraphOutcome::Suspended {
                    step_id,
                    kind,
                    resume_context,
                } => {
                    let previous = ticket.state;
                    let next = match next_state(previous, &TicketEvent::Suspended { kind }) {
                        Ok(next) => next,
                        Err(rejected) => {
                            let state = self
                                .fail_ticket(
                                    &mut ticket,
                                    FailureKind::InvariantViolation,
                                    Some(step_id),
                                    format!("graph suspended but {}", rejected),
                                )
                                .await?;
                            return Ok(HandleResult::Applied(state));
                        }
                    };
                    let checkpoint =
                        Checkpoint::new(ticket.id, graph.phase, step_id, kind, resume_context);
                    self.apply_state(&mut ticket, next);
                    self.commit_and_emit(
                        &ticket,
                        previous,
                        CheckpointCommit::Set(checkpoint),
                        None,
                    )
                    .await?;
                }
                GraphOutcome::PhaseFailed {
                    step_id,
                    kind,
                    reason,
                } => {
                    let state = self.fail_ticket(&mut ticket, kind, step_id, reason).await?;
                    return Ok(HandleResult::Applied(state));
                }
            }
        }

        Ok(HandleResult::Applied(ticket.state))
    }

    fn graph(&self, state: TicketState) -> Result<Graph> {
        let phase = state
            .phase()
            .ok_or_else(|| anyhow!("state {} has no graph", state))?;
        let graph = graph_for(phase, self.retry);
        graph
            .validate()
            .map_err(|drift| anyhow!("invalid graph definition: {}", drift))?;
        Ok(graph)
    }

    /// Load-time consistency checks. Never silently repaired.
    fn invariant_breach(&self, ticket: &Ticket, checkpoint: Option<&Checkpoint>) -> Option<String> {
        if ticket.state.kind() != StateKind::Suspended {
            return None;
        }
        let Some(checkpoint) = checkpoint else {
            return Some(format!(
                "ticket is suspended in {} but has no checkpoint",
                ticket.state
            ));
        };
        if Some(checkpoint.graph) != ticket.state.phase() {
            return Some(format!(
                "checkpoint belongs to graph {} but ticket is in {}",
                checkpoint.graph, ticket.state
            ));
        }
        if ticket.state.suspension() != Some(checkpoint.kind) {
            return Some(format!(
                "checkpoint kind {} does not match state {}",
                checkpoint.kind, ticket.state
            ));
        }
        None
    }

    /// Applies a validated transition to the ticket, resetting per-phase
    /// scratch when the phase is exited successfully. Failed and cancelled
    /// tickets keep their counters as diagnostics.
    fn apply_state(&self, ticket: &mut Ticket, next: TicketState) {
        let previous = ticket.state;
        if previous.phase() != next.phase() {
            let exited_cleanly =
                !matches!(next, TicketState::Failed | TicketState::Cancelled);
            if let Some(old) = previous.phase() {
                if exited_cleanly {
                    ticket.reset_phase_scratch(old);
                }
            }
            ticket.position = None;
        }
        ticket.state = next;
        ticket.active_graph = next.phase();
        if next.kind() == StateKind::Suspended || next.is_terminal() {
            ticket.position = None;
        }
        ticket.set_updated_at();
    }

    /// Marks the ticket failed with diagnostics and commits the fold.
    async fn fail_ticket(
        &self,
        ticket: &mut Ticket,
        kind: FailureKind,
        step_id: Option<String>,
        reason: String,
    ) -> Result<TicketState> {
        let previous = ticket.state;
        ticket.failure = Some(TicketFailure::new(
            kind,
            previous.phase(),
            step_id,
            reason.clone(),
        ));
        self.apply_state(ticket, TicketState::Failed);
        self.commit_and_emit(ticket, previous, CheckpointCommit::Clear, Some(reason))
            .await?;
        Ok(ticket.state)
    }

    /// Persists the fold (atomically with its checkpoint change) and then
    /// notifies subscribers. Emission is fire-and-forget.
    async fn commit_and_emit(
        &self,
        ticket: &Ticket,
        previous: TicketState,
        commit: CheckpointCommit,
        reason: Option<String>,
    ) -> Result<()> {
        match commit {
            CheckpointCommit::Keep => self.tickets.save(ticket).await?,
            CheckpointCommit::Set(checkpoint) => {
                self.tickets
                    .save_with_checkpoint(ticket, Some(&checkpoint))
                    .await?
            }
            CheckpointCommit::Clear => self.tickets.save_with_checkpoint(ticket, None).await?,
        }

        if previous != ticket.state {
            let change = StateChanged::new(
                ticket.id,
                ticket.tenant.clone(),
                previous,
                ticket.state,
                reason,
            );
            self.logger.log_state_changed(&change);
            self.bus.publish(change);
        }
        Ok(())
    }
}

fn human_payload(event: &TicketEvent) -> Option<Value> {
    match event {
        TicketEvent::HumanAnswered { answers } => Some(answers.clone()),
        TicketEvent::HumanRefined { feedback } => Some(Value::String(feedback.clone())),
        TicketEvent::HumanRejected { reason } => Some(Value::String(reason.clone())),
        _ => None,
    }
}

/// Human payloads become artifacts so later prompts can use them.
fn merge_human_payload(ticket: &mut Ticket, event: &TicketEvent) {
    match event {
        TicketEvent::HumanAnswered { answers } => {
            ticket
                .artifacts
                .insert("answers".to_string(), answers.clone());
        }
        TicketEvent::HumanRefined { feedback } => {
            ticket
                .artifacts
                .insert("feedback".to_string(), Value::String(feedback.clone()));
        }
        TicketEvent::HumanRejected { reason } => {
            ticket
                .artifacts
                .insert("rejection_reason".to_string(), Value::String(reason.clone()));
        }
        _ => {}
    }
}

fn fold_reason(event: &TicketEvent) -> Option<String> {
    match event {
        TicketEvent::PhaseFailed { reason } => Some(reason.clone()),
        TicketEvent::HumanRejected { reason } => Some(reason.clone()),
        TicketEvent::Cancel { reason } => Some(reason.clone()),
        _ => None,
    }
}

#[cfg(test)]
#[path = "tests/orchestrator_tests.rs"]
mod tests;
