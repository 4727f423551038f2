//! Tests for the file-backed store.

use super::*;
use crate::state_model::{SuspensionKind, TicketState};
use crate::ticket::TenantId;
use serde_json::json;
use tempfile::TempDir;

fn store() -> (FileTicketStore, TempDir) {
    let dir = TempDir::new().expect("temp dir");
    let store = FileTicketStore::new(dir.path()).expect("store");
    (store, dir)
}

fn ticket() -> Ticket {
    Ticket::new(TenantId::new("acme"), "Add CSV export", "Users need CSV")
}

fn checkpoint_for(ticket: &Ticket) -> Checkpoint {
    Checkpoint::new(
        ticket.id,
        crate::state_model::Phase::Planning,
        "post-plan",
        SuspensionKind::AwaitingPlanReview,
        json!({"plan": "1. do it"}),
    )
}

#[tokio::test]
async fn ticket_roundtrip() {
    let (store, _dir) = store();
    let ticket = ticket();
    store.create(&ticket).await.unwrap();

    let loaded = TicketStore::load(&store, &ticket.id).await.unwrap().unwrap();
    assert_eq!(loaded.id, ticket.id);
    assert_eq!(loaded.state, TicketState::Pending);

    assert!(TicketStore::load(&store, &crate::ticket::TicketId::new())
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn create_refuses_duplicates() {
    let (store, _dir) = store();
    let ticket = ticket();
    store.create(&ticket).await.unwrap();
    assert!(store.create(&ticket).await.is_err());
}

#[tokio::test]
async fn combined_commit_upserts_and_clears_the_checkpoint() {
    let (store, _dir) = store();
    let mut ticket = ticket();
    store.create(&ticket).await.unwrap();

    // Upsert.
    ticket.state = TicketState::PlanUnderReview;
    let checkpoint = checkpoint_for(&ticket);
    store
        .save_with_checkpoint(&ticket, Some(&checkpoint))
        .await
        .unwrap();
    let loaded = CheckpointStore::load(&store, &ticket.id).await.unwrap();
    assert_eq!(loaded, Some(checkpoint.clone()));

    // A second upsert supersedes — at most one live checkpoint per ticket.
    let replacement = Checkpoint::new(
        ticket.id,
        crate::state_model::Phase::Planning,
        "post-plan",
        SuspensionKind::AwaitingPlanReview,
        json!({"plan": "v2"}),
    );
    store
        .save_with_checkpoint(&ticket, Some(&replacement))
        .await
        .unwrap();
    let loaded = CheckpointStore::load(&store, &ticket.id).await.unwrap().unwrap();
    assert_eq!(loaded.resume_context, json!({"plan": "v2"}));

    // Clear.
    ticket.state = TicketState::Implementing;
    store.save_with_checkpoint(&ticket, None).await.unwrap();
    assert!(CheckpointStore::load(&store, &ticket.id)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn combined_commit_rejects_foreign_checkpoints() {
    let (store, _dir) = store();
    let ticket_a = ticket();
    let ticket_b = ticket();
    store.create(&ticket_a).await.unwrap();
    let foreign = checkpoint_for(&ticket_b);
    assert!(store
        .save_with_checkpoint(&ticket_a, Some(&foreign))
        .await
        .is_err());
}

#[tokio::test]
async fn inbox_is_fifo() {
    let (store, _dir) = store();
    let ticket = ticket();
    store.create(&ticket).await.unwrap();

    store
        .enqueue(&ticket.id, &TicketEvent::Start)
        .await
        .unwrap();
    store
        .enqueue(&ticket.id, &TicketEvent::HumanApproved)
        .await
        .unwrap();

    let first = store.peek(&ticket.id).await.unwrap().unwrap();
    assert_eq!(first.event, TicketEvent::Start);

    // Peek does not consume.
    let again = store.peek(&ticket.id).await.unwrap().unwrap();
    assert_eq!(again.entry_id, first.entry_id);

    store.ack(&ticket.id, &first.entry_id).await.unwrap();
    let second = store.peek(&ticket.id).await.unwrap().unwrap();
    assert_eq!(second.event, TicketEvent::HumanApproved);

    store.ack(&ticket.id, &second.entry_id).await.unwrap();
    assert!(store.peek(&ticket.id).await.unwrap().is_none());

    // Acking twice is harmless.
    store.ack(&ticket.id, &second.entry_id).await.unwrap();
}

#[tokio::test]
async fn runnable_means_queued_event_or_interrupted_run() {
    let (store, _dir) = store();

    let idle = ticket();
    store.create(&idle).await.unwrap();

    let queued = ticket();
    store.create(&queued).await.unwrap();
    store
        .enqueue(&queued.id, &TicketEvent::Start)
        .await
        .unwrap();

    let mut interrupted = ticket();
    interrupted.state = TicketState::Planning;
    interrupted.position = Some("draft-plan".to_string());
    store.create(&interrupted).await.unwrap();

    let mut suspended = ticket();
    suspended.state = TicketState::PlanUnderReview;
    store.create(&suspended).await.unwrap();

    let runnable = store.list_runnable().await.unwrap();
    assert!(runnable.contains(&queued.id));
    assert!(runnable.contains(&interrupted.id));
    assert!(!runnable.contains(&idle.id));
    assert!(!runnable.contains(&suspended.id));
}

#[tokio::test]
async fn internal_events_cannot_be_enqueued() {
    let (store, _dir) = store();
    let ticket = ticket();
    store.create(&ticket).await.unwrap();

    assert!(store
        .enqueue(&ticket.id, &TicketEvent::PhaseCompleted)
        .await
        .is_err());
    assert!(store
        .enqueue(
            &ticket.id,
            &TicketEvent::Suspended {
                kind: SuspensionKind::AwaitingMerge
            }
        )
        .await
        .is_err());
    assert!(store.peek(&ticket.id).await.unwrap().is_none());
}

#[tokio::test]
async fn list_orders_by_creation() {
    let (store, _dir) = store();
    let first = ticket();
    let second = ticket();
    store.create(&first).await.unwrap();
    store.create(&second).await.unwrap();
    let all = store.list().await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[0].created_at <= all[1].created_at);
}
