//! End-to-end orchestrator tests over the file store and scripted steps.

use super::*;
use crate::failure::FailureKind as Kind;
use crate::state_model::{Phase, SuspensionKind};
use crate::step::{StepFailure, StepResult};
use crate::store::CheckpointStore;
use crate::test_support::{harness, harness_with, Harness};
use serde_json::json;

fn answered() -> TicketEvent {
    TicketEvent::HumanAnswered {
        answers: json!("use streaming export"),
    }
}

fn rejected(reason: &str) -> TicketEvent {
    TicketEvent::HumanRejected {
        reason: reason.to_string(),
    }
}

async fn apply(h: &Harness, id: &TicketId, event: TicketEvent) -> TicketState {
    match h.orchestrator.handle_event(id, event).await.unwrap() {
        HandleResult::Applied(state) => state,
        HandleResult::Refused(reason) => panic!("unexpected refusal: {}", reason),
    }
}

/// Drives a fresh ticket to `PlanUnderReview`.
async fn drive_to_plan_review(h: &Harness, id: &TicketId) {
    assert_eq!(apply(h, id, TicketEvent::Start).await, TicketState::AwaitingAnswers);
    assert_eq!(
        apply(h, id, answered()).await,
        TicketState::TicketUpdateGenerated
    );
    assert_eq!(
        apply(h, id, TicketEvent::HumanApproved).await,
        TicketState::PlanUnderReview
    );
}

#[tokio::test]
async fn start_suspends_at_the_first_question_gate() {
    let h = harness();
    let id = h.create_ticket().await;

    let state = apply(&h, &id, TicketEvent::Start).await;

    assert_eq!(state, TicketState::AwaitingAnswers);
    let ticket = h.ticket(&id).await;
    assert_eq!(ticket.state, TicketState::AwaitingAnswers);
    assert_eq!(ticket.active_graph, Some(Phase::Refinement));

    let checkpoint = CheckpointStore::load(&*h.store, &id).await.unwrap().unwrap();
    assert_eq!(checkpoint.step_id, "post-questions");
    assert_eq!(checkpoint.kind, SuspensionKind::AwaitingAnswers);
}

#[tokio::test]
async fn answers_resume_exactly_after_the_suspension_point() {
    let h = harness();
    let id = h.create_ticket().await;
    apply(&h, &id, TicketEvent::Start).await;

    let state = apply(&h, &id, answered()).await;

    assert_eq!(state, TicketState::TicketUpdateGenerated);
    // Refinement's earlier steps ran exactly once — no replay on resume.
    assert_eq!(h.executor.call_count("analyze-codebase"), 1);
    assert_eq!(h.executor.call_count("post-questions"), 1);
    assert_eq!(h.executor.call_count("incorporate-answers"), 1);

    // The human payload is preserved for later prompts.
    let ticket = h.ticket(&id).await;
    assert_eq!(
        ticket.artifacts.get("answers"),
        Some(&json!("use streaming export"))
    );
}

#[tokio::test]
async fn duplicate_resume_is_refused_without_side_effects() {
    let h = harness();
    let id = h.create_ticket().await;
    apply(&h, &id, TicketEvent::Start).await;
    apply(&h, &id, answered()).await;
    let calls_before = h.executor.calls().len();

    let result = h.orchestrator.handle_event(&id, answered()).await.unwrap();

    assert!(matches!(result, HandleResult::Refused(_)));
    assert_eq!(h.ticket(&id).await.state, TicketState::TicketUpdateGenerated);
    assert_eq!(h.executor.calls().len(), calls_before);
}

#[tokio::test]
async fn ticket_approval_crosses_into_planning() {
    let h = harness();
    let id = h.create_ticket().await;
    drive_to_plan_review(&h, &id).await;

    // The refinement tail ran, then the planning graph to its review gate.
    assert_eq!(h.executor.call_count("apply-ticket-update"), 1);
    assert_eq!(h.executor.call_count("gather-context"), 1);
    assert_eq!(h.executor.call_count("draft-plan"), 1);
    assert_eq!(h.executor.call_count("post-plan"), 1);

    let checkpoint = CheckpointStore::load(&*h.store, &id).await.unwrap().unwrap();
    assert_eq!(checkpoint.graph, Phase::Planning);
    assert_eq!(checkpoint.step_id, "post-plan");
}

#[tokio::test]
async fn refine_loops_without_counting_as_rejection() {
    let h = harness();
    let id = h.create_ticket().await;
    drive_to_plan_review(&h, &id).await;

    let state = apply(
        &h,
        &id,
        TicketEvent::HumanRefined {
            feedback: "merge steps 2 and 3".to_string(),
        },
    )
    .await;

    assert_eq!(state, TicketState::PlanUnderReview);
    assert_eq!(h.executor.call_count("revise-plan"), 1);
    assert_eq!(h.executor.call_count("post-plan"), 2);
    // Refinement feedback is not a rejection.
    let ticket = h.ticket(&id).await;
    assert!(ticket
        .rejections
        .get(&Phase::Planning)
        .map_or(true, |r| r.count == 0));
}

#[tokio::test]
async fn rejection_regenerates_the_plan_and_counts() {
    let h = harness();
    let id = h.create_ticket().await;
    drive_to_plan_review(&h, &id).await;

    let state = apply(&h, &id, rejected("wrong approach")).await;

    assert_eq!(state, TicketState::PlanUnderReview);
    // Discard-and-regenerate re-enters at drafting, not context gathering.
    assert_eq!(h.executor.call_count("draft-plan"), 2);
    assert_eq!(h.executor.call_count("gather-context"), 1);

    let ticket = h.ticket(&id).await;
    let record = ticket.rejections.get(&Phase::Planning).unwrap();
    assert_eq!(record.count, 1);
    assert_eq!(record.last_reason.as_deref(), Some("wrong approach"));
}

#[tokio::test]
async fn sixth_rejection_is_refused_and_fails_the_ticket() {
    let h = harness();
    let id = h.create_ticket().await;
    drive_to_plan_review(&h, &id).await;

    for round in 1..=5u32 {
        let state = apply(&h, &id, rejected("not good enough")).await;
        assert_eq!(state, TicketState::PlanUnderReview, "round {}", round);
        let ticket = h.ticket(&id).await;
        assert_eq!(ticket.rejections.get(&Phase::Planning).unwrap().count, round);
    }

    let state = apply(&h, &id, rejected("still wrong")).await;
    assert_eq!(state, TicketState::Failed);

    let ticket = h.ticket(&id).await;
    let failure = ticket.failure.unwrap();
    assert_eq!(failure.kind, Kind::RejectionsExhausted);
    assert!(failure.message.contains("max planning rejections exceeded"));

    // The failed ticket no longer accepts rejections at all.
    let result = h
        .orchestrator
        .handle_event(&id, rejected("again"))
        .await
        .unwrap();
    assert!(matches!(result, HandleResult::Refused(_)));
}

#[tokio::test]
async fn full_happy_path_reaches_completed() {
    let h = harness();
    let id = h.create_ticket().await;
    let mut changes = h.bus.subscribe();
    drive_to_plan_review(&h, &id).await;

    assert_eq!(
        apply(&h, &id, TicketEvent::HumanApproved).await,
        TicketState::ImplementationUnderReview
    );
    assert_eq!(
        apply(&h, &id, TicketEvent::HumanApproved).await,
        TicketState::PrCreated
    );
    assert_eq!(
        apply(&h, &id, TicketEvent::HumanApproved).await,
        TicketState::Completed
    );

    let ticket = h.ticket(&id).await;
    assert_eq!(ticket.state, TicketState::Completed);
    assert!(ticket.rejections.is_empty());
    assert!(CheckpointStore::load(&*h.store, &id).await.unwrap().is_none());

    // The implementation phase ran its whole graph exactly once.
    for step in [
        "announce-start",
        "prepare-branch",
        "implement-changes",
        "verify-changes",
        "push-branch",
        "post-progress",
        "request-review",
        "open-pr",
        "announce-pr",
    ] {
        assert_eq!(h.executor.call_count(step), 1, "step {}", step);
    }
    assert_eq!(h.executor.call_count("revise-implementation"), 0);

    // Subscribers saw every fold, ending in Completed.
    let mut seen = Vec::new();
    while let Ok(change) = changes.try_recv() {
        seen.push((change.previous, change.new));
    }
    assert_eq!(seen.first().unwrap().0, TicketState::Pending);
    assert_eq!(seen.last().unwrap().1, TicketState::Completed);
}

#[tokio::test]
async fn rejection_bounds_are_independently_configurable() {
    let h = harness_with(
        RetryPolicy::immediate(3),
        RejectionPolicy {
            max_refinement_rejections: 3,
            max_planning_rejections: 1,
            max_implementation_rejections: 5,
        },
    );
    let id = h.create_ticket().await;
    drive_to_plan_review(&h, &id).await;

    assert_eq!(
        apply(&h, &id, rejected("first")).await,
        TicketState::PlanUnderReview
    );
    // The configured bound is 1, so the second rejection is refused fatally.
    assert_eq!(apply(&h, &id, rejected("second")).await, TicketState::Failed);
}

#[tokio::test]
async fn shutdown_interrupts_between_steps_and_persists_position() {
    let h = harness();
    let id = h.create_ticket().await;
    h.cancel_tx.send(true).unwrap();

    let state = apply(&h, &id, TicketEvent::Start).await;

    // The invocation stopped before running any step; the walk position is
    // durable so a later scheduler pass resumes exactly there.
    assert_eq!(state, TicketState::Analyzing);
    let ticket = h.ticket(&id).await;
    assert_eq!(ticket.position.as_deref(), Some("analyze-codebase"));
    assert!(h.executor.calls().is_empty());
}

#[tokio::test]
async fn fatal_step_failure_carries_diagnostics() {
    let h = harness();
    let id = h.create_ticket().await;
    h.executor.script(
        "analyze-codebase",
        vec![StepResult::Fatal(StepFailure::fatal("no such repository"))],
    );

    let state = apply(&h, &id, TicketEvent::Start).await;

    assert_eq!(state, TicketState::Failed);
    let ticket = h.ticket(&id).await;
    let failure = ticket.failure.unwrap();
    assert_eq!(failure.phase, Some(Phase::Refinement));
    assert_eq!(failure.step_id.as_deref(), Some("analyze-codebase"));
    assert!(failure.message.contains("no such repository"));
    assert!(CheckpointStore::load(&*h.store, &id).await.unwrap().is_none());
}

#[tokio::test]
async fn suspended_ticket_without_checkpoint_is_an_invariant_violation() {
    let h = harness();
    let id = h.create_ticket().await;
    {
        use crate::store::TicketStore;
        let mut ticket = h.ticket(&id).await;
        ticket.state = TicketState::PlanUnderReview;
        TicketStore::save(&*h.store, &ticket).await.unwrap();
    }

    let state = apply(&h, &id, TicketEvent::HumanApproved).await;

    assert_eq!(state, TicketState::Failed);
    let failure = h.ticket(&id).await.failure.unwrap();
    assert_eq!(failure.kind, Kind::InvariantViolation);
}

#[tokio::test]
async fn cancel_clears_the_checkpoint() {
    let h = harness();
    let id = h.create_ticket().await;
    apply(&h, &id, TicketEvent::Start).await;
    assert!(CheckpointStore::load(&*h.store, &id).await.unwrap().is_some());

    let state = apply(
        &h,
        &id,
        TicketEvent::Cancel {
            reason: "tenant deactivated".to_string(),
        },
    )
    .await;

    assert_eq!(state, TicketState::Cancelled);
    assert!(CheckpointStore::load(&*h.store, &id).await.unwrap().is_none());
}

#[tokio::test]
async fn events_illegal_for_the_state_are_refused() {
    let h = harness();
    let id = h.create_ticket().await;

    let result = h
        .orchestrator
        .handle_event(&id, TicketEvent::HumanApproved)
        .await
        .unwrap();

    assert!(matches!(result, HandleResult::Refused(_)));
    assert_eq!(h.ticket(&id).await.state, TicketState::Pending);
}

#[tokio::test]
async fn unknown_tickets_error_rather_than_create() {
    let h = harness();
    let missing = TicketId::new();
    assert!(h
        .orchestrator
        .handle_event(&missing, TicketEvent::Start)
        .await
        .is_err());
}
