//! Structural tests for the built-in graph definitions.

use super::*;
use crate::policy::RetryPolicy;
use crate::state_model::TicketEvent;
use serde_json::json;

fn retry() -> RetryPolicy {
    RetryPolicy::immediate(3)
}

#[test]
fn all_builtin_graphs_validate() {
    for phase in [Phase::Refinement, Phase::Planning, Phase::Implementation] {
        graph_for(phase, retry()).validate().expect("valid graph");
    }
}

#[test]
fn refinement_has_two_suspension_points() {
    let graph = refinement_graph(retry());
    let suspensions: Vec<&str> = graph
        .steps
        .iter()
        .filter(|s| s.suspension.is_some())
        .map(|s| s.id)
        .collect();
    assert_eq!(suspensions, vec!["post-questions", "propose-ticket-update"]);
}

#[test]
fn publish_group_members_are_contiguous_and_parallel() {
    let graph = implementation_graph(retry());
    let members: Vec<&str> = graph
        .steps
        .iter()
        .filter(|s| matches!(s.mode, ExecMode::Parallel("publish")))
        .map(|s| s.id)
        .collect();
    assert_eq!(members, vec!["push-branch", "post-progress"]);

    let push = graph.index_of("push-branch").unwrap();
    let post = graph.index_of("post-progress").unwrap();
    assert_eq!(post, push + 1);
}

#[test]
fn answered_resumes_at_the_following_step() {
    let graph = refinement_graph(retry());
    let target = graph
        .resume_target(
            "post-questions",
            &TicketEvent::HumanAnswered {
                answers: json!("streaming"),
            },
        )
        .unwrap();
    assert_eq!(target, "incorporate-answers");
}

#[test]
fn rejection_edge_regenerates_the_update() {
    let graph = refinement_graph(retry());
    let target = graph
        .resume_target(
            "propose-ticket-update",
            &TicketEvent::HumanRejected {
                reason: "too vague".to_string(),
            },
        )
        .unwrap();
    assert_eq!(target, "propose-ticket-update");
}

#[test]
fn plan_review_edges_cover_refine_and_reject() {
    let graph = planning_graph(retry());
    assert_eq!(
        graph
            .resume_target(
                "post-plan",
                &TicketEvent::HumanRefined {
                    feedback: "simplify".to_string()
                }
            )
            .unwrap(),
        "revise-plan"
    );
    assert_eq!(
        graph
            .resume_target(
                "post-plan",
                &TicketEvent::HumanRejected {
                    reason: "wrong".to_string()
                }
            )
            .unwrap(),
        "draft-plan"
    );
    // The revise step loops back to publication.
    let revise = graph.step("revise-plan").unwrap();
    assert_eq!(revise.next, NextStep::Goto("post-plan"));
}

#[test]
fn implementation_review_edges_cover_all_decisions() {
    let graph = implementation_graph(retry());
    assert_eq!(
        graph
            .resume_target("request-review", &TicketEvent::HumanApproved)
            .unwrap(),
        "open-pr"
    );
    assert_eq!(
        graph
            .resume_target(
                "request-review",
                &TicketEvent::HumanRefined {
                    feedback: "rename".to_string()
                }
            )
            .unwrap(),
        "revise-implementation"
    );
    assert_eq!(
        graph
            .resume_target(
                "request-review",
                &TicketEvent::HumanRejected {
                    reason: "redo".to_string()
                }
            )
            .unwrap(),
        "implement-changes"
    );
}

#[test]
fn resume_from_unknown_step_is_drift() {
    let graph = planning_graph(retry());
    let err = graph
        .resume_target("removed-step", &TicketEvent::HumanApproved)
        .unwrap_err();
    assert!(err.detail.contains("unknown step"));
}

#[test]
fn resume_with_engine_event_is_drift() {
    let graph = planning_graph(retry());
    assert!(graph
        .resume_target("post-plan", &TicketEvent::PhaseCompleted)
        .is_err());
}

#[test]
fn validation_rejects_suspension_inside_group() {
    let bad = Graph {
        phase: Phase::Implementation,
        steps: vec![
            StepSpec::new("a", StepKind::Vcs(VcsAction::PushBranch), retry()).parallel("g"),
            StepSpec::new("b", StepKind::Tracker(TrackerAction::PostProgress), retry())
                .parallel("g")
                .suspend(SuspensionSpec::new(SuspensionKind::AwaitingMerge)),
        ],
    };
    assert!(bad.validate().is_err());
}

#[test]
fn validation_rejects_split_groups() {
    let bad = Graph {
        phase: Phase::Implementation,
        steps: vec![
            StepSpec::new("a", StepKind::Vcs(VcsAction::PushBranch), retry()).parallel("g"),
            StepSpec::new("b", StepKind::Vcs(VcsAction::PrepareBranch), retry()),
            StepSpec::new("c", StepKind::Tracker(TrackerAction::PostProgress), retry())
                .parallel("g"),
        ],
    };
    assert!(bad.validate().is_err());
}

#[test]
fn validation_rejects_dangling_goto() {
    let bad = Graph {
        phase: Phase::Planning,
        steps: vec![
            StepSpec::new("a", StepKind::Agent(AgentAction::DraftPlan), retry()).goto("nowhere"),
        ],
    };
    assert!(bad.validate().is_err());
}
