//! Graph execution: walks a phase graph from a resume position and reports a
//! single outcome.
//!
//! The engine owns step retries, per-step timeouts, parallel-group joins and
//! cancellation checks. It never touches persistence and never interprets
//! ticket state — the orchestrator folds the report into the transition
//! table.

use crate::failure::FailureKind;
use crate::graph::{ExecMode, Graph, NextStep, StepSpec};
use crate::state_model::SuspensionKind;
use crate::step::{StepContext, StepExecutor, StepFailure, StepResult};
use crate::structured_logger::StructuredLogger;
use crate::ticket::{TenantId, TicketId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Where the walk starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// First step of the graph.
    Fresh,
    /// A specific step id, resolved from a checkpoint's resume edge or a
    /// persisted position.
    At(String),
}

/// The single outcome of one engine run.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphOutcome {
    /// The walk stopped early (cancellation); `next_step` is where to
    /// re-enter.
    Advanced { next_step: String },
    /// The walk ran past the last step.
    PhaseComplete,
    /// A suspension point was reached; the resume context is the step's
    /// output.
    Suspended {
        step_id: String,
        kind: SuspensionKind,
        resume_context: Value,
    },
    /// The phase aborted.
    PhaseFailed {
        step_id: Option<String>,
        kind: FailureKind,
        reason: String,
    },
}

impl GraphOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            GraphOutcome::Advanced { .. } => "advanced",
            GraphOutcome::PhaseComplete => "phase_complete",
            GraphOutcome::Suspended { .. } => "suspended",
            GraphOutcome::PhaseFailed { .. } => "phase_failed",
        }
    }
}

/// Attempts a completed step consumed, for the ticket's counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepReport {
    pub step_id: String,
    pub attempts: u32,
}

/// Everything the orchestrator needs back from one run.
#[derive(Debug)]
pub struct EngineReport {
    pub outcome: GraphOutcome,
    /// Steps that completed this run, in completion order.
    pub completed: Vec<StepReport>,
    /// Artifact map including this run's step outputs.
    pub artifacts: HashMap<String, Value>,
}

/// Per-invocation inputs shared by every step of the walk.
#[derive(Debug, Clone)]
pub struct ExecutionScope {
    pub tenant: TenantId,
    pub ticket_id: TicketId,
    pub title: String,
    pub objective: String,
    pub artifacts: HashMap<String, Value>,
    /// Payload of the resume event, if the walk re-enters after a suspension.
    pub resume: Option<Value>,
    pub cancel_rx: watch::Receiver<bool>,
}

/// Outcome of one step after its internal retry loop.
#[derive(Debug)]
enum StepRun {
    Success(Value),
    Suspend(Value),
    Failed { kind: FailureKind, message: String },
    /// Shutdown arrived before the step could complete; the walk stops here
    /// and the step re-runs on the next invocation.
    Interrupted,
}

/// Cloneable seed for building per-attempt step contexts; parallel members
/// get an artifact snapshot taken at group entry.
#[derive(Clone)]
struct StepSeed {
    tenant: TenantId,
    ticket_id: TicketId,
    title: String,
    objective: String,
    artifacts: HashMap<String, Value>,
    resume: Option<Value>,
    cancel_rx: watch::Receiver<bool>,
}

impl StepSeed {
    fn context(&self, step_id: &str, attempt: u32) -> StepContext {
        StepContext {
            tenant: self.tenant.clone(),
            ticket_id: self.ticket_id,
            step_id: step_id.to_string(),
            attempt,
            title: self.title.clone(),
            objective: self.objective.clone(),
            artifacts: self.artifacts.clone(),
            resume: self.resume.clone(),
            cancel_rx: self.cancel_rx.clone(),
        }
    }
}

pub struct GraphEngine {
    executor: Arc<dyn StepExecutor>,
    logger: Arc<StructuredLogger>,
    /// Applied to steps without their own timeout.
    default_timeout: Duration,
}

impl GraphEngine {
    pub fn new(
        executor: Arc<dyn StepExecutor>,
        logger: Arc<StructuredLogger>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            executor,
            logger,
            default_timeout,
        }
    }

    /// Walks `graph` from `entry` until it suspends, completes, fails, or is
    /// interrupted by cancellation.
    pub async fn run(&self, graph: &Graph, entry: Entry, scope: &ExecutionScope) -> EngineReport {
        let mut completed: Vec<StepReport> = Vec::new();
        let mut artifacts = scope.artifacts.clone();

        let mut index = match entry {
            Entry::Fresh => 0,
            Entry::At(step_id) => match graph.index_of(&step_id) {
                Some(i) => i,
                None => {
                    let outcome = GraphOutcome::PhaseFailed {
                        step_id: Some(step_id.clone()),
                        kind: FailureKind::ConfigurationDrift,
                        reason: format!(
                            "resume position '{}' is not in graph {}",
                            step_id, graph.phase
                        ),
                    };
                    self.logger
                        .log_graph_outcome(&scope.ticket_id, outcome.label());
                    return EngineReport {
                        outcome,
                        completed,
                        artifacts,
                    };
                }
            },
        };

        let outcome = loop {
            let Some(spec) = graph.steps.get(index) else {
                break GraphOutcome::PhaseComplete;
            };

            // Cancellation is honored between steps only; an in-flight step
            // (or group) always finishes first.
            if *scope.cancel_rx.borrow() {
                break GraphOutcome::Advanced {
                    next_step: spec.id.to_string(),
                };
            }

            match spec.mode {
                ExecMode::Parallel(group) => {
                    let members: Vec<StepSpec> = graph
                        .steps
                        .iter()
                        .skip(index)
                        .take_while(
                            |s| matches!(s.mode, ExecMode::Parallel(g) if g == group),
                        )
                        .cloned()
                        .collect();
                    let member_count = members.len();

                    match self
                        .run_group(&members, &mut completed, &mut artifacts, scope)
                        .await
                    {
                        Ok(()) => {
                            index += member_count;
                        }
                        Err(outcome) => break outcome,
                    }
                }
                ExecMode::Sequential => {
                    let seed = self.seed(scope, &artifacts);
                    let (run, attempts) = execute_step(
                        Arc::clone(&self.executor),
                        Arc::clone(&self.logger),
                        spec.clone(),
                        seed,
                        self.default_timeout,
                    )
                    .await;

                    match run {
                        StepRun::Success(output) => {
                            completed.push(StepReport {
                                step_id: spec.id.to_string(),
                                attempts,
                            });
                            if !output.is_null() {
                                artifacts.insert(spec.id.to_string(), output.clone());
                            }
                            if let Some(suspension) = &spec.suspension {
                                break GraphOutcome::Suspended {
                                    step_id: spec.id.to_string(),
                                    kind: suspension.kind,
                                    resume_context: output,
                                };
                            }
                            index = match spec.next {
                                NextStep::Continue => index + 1,
                                NextStep::Goto(target) => match graph.index_of(target) {
                                    Some(i) => i,
                                    None => {
                                        break GraphOutcome::PhaseFailed {
                                            step_id: Some(spec.id.to_string()),
                                            kind: FailureKind::ConfigurationDrift,
                                            reason: format!(
                                                "step '{}' goes to unknown step '{}'",
                                                spec.id, target
                                            ),
                                        }
                                    }
                                },
                            };
                        }
                        StepRun::Suspend(resume_context) => match &spec.suspension {
                            Some(suspension) => {
                                completed.push(StepReport {
                                    step_id: spec.id.to_string(),
                                    attempts,
                                });
                                break GraphOutcome::Suspended {
                                    step_id: spec.id.to_string(),
                                    kind: suspension.kind,
                                    resume_context,
                                };
                            }
                            None => {
                                break GraphOutcome::PhaseFailed {
                                    step_id: Some(spec.id.to_string()),
                                    kind: FailureKind::ConfigurationDrift,
                                    reason: format!(
                                        "step '{}' suspended without a declared suspension point",
                                        spec.id
                                    ),
                                }
                            }
                        },
                        StepRun::Failed { kind, message } => {
                            break GraphOutcome::PhaseFailed {
                                step_id: Some(spec.id.to_string()),
                                kind,
                                reason: message,
                            }
                        }
                        StepRun::Interrupted => {
                            break GraphOutcome::Advanced {
                                next_step: spec.id.to_string(),
                            }
                        }
                    }
                }
            }
        };

        self.logger
            .log_graph_outcome(&scope.ticket_id, outcome.label());
        EngineReport {
            outcome,
            completed,
            artifacts,
        }
    }

    /// Runs a parallel group to completion. Each member retries itself within
    /// its own budget, so a transiently failing member never re-runs a
    /// sibling that already succeeded. Any fatal member fails the whole
    /// group.
    async fn run_group(
        &self,
        members: &[StepSpec],
        completed: &mut Vec<StepReport>,
        artifacts: &mut HashMap<String, Value>,
        scope: &ExecutionScope,
    ) -> Result<(), GraphOutcome> {
        let mut set: JoinSet<(&'static str, StepRun, u32)> = JoinSet::new();
        for member in members {
            let executor = Arc::clone(&self.executor);
            let logger = Arc::clone(&self.logger);
            let seed = self.seed(scope, artifacts);
            let spec = member.clone();
            let default_timeout = self.default_timeout;
            set.spawn(async move {
                let step_id = spec.id;
                let (run, attempts) =
                    execute_step(executor, logger, spec, seed, default_timeout).await;
                (step_id, run, attempts)
            });
        }

        let mut results: HashMap<&'static str, (StepRun, u32)> = HashMap::new();
        let mut join_panic: Option<String> = None;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((step_id, run, attempts)) => {
                    results.insert(step_id, (run, attempts));
                }
                Err(err) => join_panic = Some(err.to_string()),
            }
        }

        let mut failed: Option<(String, FailureKind, String)> = None;
        let mut interrupted = false;
        for member in members {
            match results.remove(member.id) {
                Some((StepRun::Success(output), attempts)) => {
                    completed.push(StepReport {
                        step_id: member.id.to_string(),
                        attempts,
                    });
                    if !output.is_null() {
                        artifacts.insert(member.id.to_string(), output);
                    }
                }
                Some((StepRun::Interrupted, _)) => {
                    interrupted = true;
                }
                Some((StepRun::Suspend(_), _)) => {
                    if failed.is_none() {
                        failed = Some((
                            member.id.to_string(),
                            FailureKind::ConfigurationDrift,
                            "suspension inside a parallel group".to_string(),
                        ));
                    }
                }
                Some((StepRun::Failed { kind, message }, _)) => {
                    if failed.is_none() {
                        failed = Some((member.id.to_string(), kind, message));
                    }
                }
                None => {
                    if failed.is_none() {
                        failed = Some((
                            member.id.to_string(),
                            FailureKind::Unknown(
                                join_panic.clone().unwrap_or_else(|| "task lost".to_string()),
                            ),
                            "group member task did not report".to_string(),
                        ));
                    }
                }
            }
        }

        match failed {
            Some((step_id, kind, reason)) => Err(GraphOutcome::PhaseFailed {
                step_id: Some(step_id),
                kind,
                reason,
            }),
            // Completed members are checkpointed as artifacts; the group
            // re-enters at its first member and idempotency skips them.
            None if interrupted => Err(GraphOutcome::Advanced {
                next_step: members
                    .first()
                    .map(|m| m.id.to_string())
                    .unwrap_or_default(),
            }),
            None => Ok(()),
        }
    }

    fn seed(&self, scope: &ExecutionScope, artifacts: &HashMap<String, Value>) -> StepSeed {
        StepSeed {
            tenant: scope.tenant.clone(),
            ticket_id: scope.ticket_id,
            title: scope.title.clone(),
            objective: scope.objective.clone(),
            artifacts: artifacts.clone(),
            resume: scope.resume.clone(),
            cancel_rx: scope.cancel_rx.clone(),
        }
    }
}

/// Runs one step through its retry loop. Timeouts fold as transient failures
/// against the step's budget; attempt counting restarts at 1 every time the
/// step is entered afresh.
async fn execute_step(
    executor: Arc<dyn StepExecutor>,
    logger: Arc<StructuredLogger>,
    spec: StepSpec,
    seed: StepSeed,
    default_timeout: Duration,
) -> (StepRun, u32) {
    let budget = spec.timeout.unwrap_or(default_timeout);
    let mut attempt = 0u32;
    loop {
        // Shutdown wins over starting (or retrying) an attempt.
        if *seed.cancel_rx.borrow() {
            return (StepRun::Interrupted, attempt);
        }
        attempt += 1;
        logger.log_step_started(&seed.ticket_id, spec.id, attempt);
        let ctx = seed.context(spec.id, attempt);

        let result = match tokio::time::timeout(budget, executor.execute(&spec, ctx)).await {
            Ok(result) => result,
            Err(_) => StepResult::Transient(StepFailure::new(
                FailureKind::Timeout,
                format!("no result within {}ms", budget.as_millis()),
            )),
        };

        match result {
            StepResult::Success(output) => {
                logger.log_step_finished(&seed.ticket_id, spec.id, "success");
                return (StepRun::Success(output), attempt);
            }
            StepResult::Suspend(resume_context) => {
                logger.log_step_finished(&seed.ticket_id, spec.id, "suspend");
                return (StepRun::Suspend(resume_context), attempt);
            }
            StepResult::Transient(failure) => {
                logger.log_step_finished(&seed.ticket_id, spec.id, "transient_failure");
                if spec.retry.has_budget(attempt) {
                    tokio::time::sleep(spec.retry.backoff_delay(attempt)).await;
                    continue;
                }
                return (
                    StepRun::Failed {
                        kind: FailureKind::RetriesExhausted,
                        message: format!(
                            "{} after {} attempts: {}",
                            failure.kind, attempt, failure.message
                        ),
                    },
                    attempt,
                );
            }
            StepResult::Fatal(failure) => {
                logger.log_step_finished(&seed.ticket_id, spec.id, "fatal_failure");
                return (
                    StepRun::Failed {
                        kind: failure.kind,
                        message: failure.message,
                    },
                    attempt,
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/engine_tests.rs"]
mod tests;
