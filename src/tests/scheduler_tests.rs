//! Scheduler loop tests: inbox draining, lock exclusion, crash recovery.

use super::*;
use crate::config::SchedulerConfig;
use crate::state_model::{TicketEvent, TicketState};
use crate::store::{CheckpointStore, EventInbox, TicketStore};
use crate::test_support::{harness, Harness};
use fs2::FileExt;

fn scheduler_for(h: &Harness) -> (Scheduler, watch::Sender<bool>) {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Scheduler::new(
        Arc::clone(&h.store),
        Arc::clone(&h.orchestrator),
        Arc::clone(&h.logger),
        SchedulerConfig::default(),
        shutdown_rx,
    );
    (scheduler, shutdown_tx)
}

#[tokio::test]
async fn tick_drains_one_event_per_ticket() {
    let h = harness();
    let id = h.create_ticket().await;
    h.store.enqueue(&id, &TicketEvent::Start).await.unwrap();
    let (scheduler, _shutdown) = scheduler_for(&h);

    let processed = scheduler.tick().await.unwrap();

    assert_eq!(processed, 1);
    assert_eq!(h.ticket(&id).await.state, TicketState::AwaitingAnswers);
    // The trigger was acked.
    assert!(h.store.peek(&id).await.unwrap().is_none());
}

#[tokio::test]
async fn idle_store_processes_nothing() {
    let h = harness();
    let _id = h.create_ticket().await;
    let (scheduler, _shutdown) = scheduler_for(&h);

    assert_eq!(scheduler.tick().await.unwrap(), 0);
}

#[tokio::test]
async fn refused_events_are_dropped_not_retried() {
    let h = harness();
    let id = h.create_ticket().await;
    // Approving a pending ticket is illegal; the event must not loop forever.
    h.store
        .enqueue(&id, &TicketEvent::HumanApproved)
        .await
        .unwrap();
    let (scheduler, _shutdown) = scheduler_for(&h);

    let processed = scheduler.tick().await.unwrap();

    assert_eq!(processed, 1);
    assert_eq!(h.ticket(&id).await.state, TicketState::Pending);
    assert!(h.store.peek(&id).await.unwrap().is_none());
    assert_eq!(scheduler.tick().await.unwrap(), 0);
}

#[tokio::test]
async fn interrupted_running_ticket_resumes_from_its_position() {
    let h = harness();
    let id = h.create_ticket().await;
    {
        let mut ticket = h.ticket(&id).await;
        ticket.state = TicketState::Planning;
        ticket.active_graph = Some(crate::state_model::Phase::Planning);
        ticket.position = Some("draft-plan".to_string());
        TicketStore::save(&*h.store, &ticket).await.unwrap();
    }
    let (scheduler, _shutdown) = scheduler_for(&h);

    let processed = scheduler.tick().await.unwrap();

    assert_eq!(processed, 1);
    assert_eq!(h.ticket(&id).await.state, TicketState::PlanUnderReview);
    // The walk resumed at the persisted position, not from the start.
    assert_eq!(h.executor.call_count("gather-context"), 0);
    assert_eq!(h.executor.call_count("draft-plan"), 1);
    assert_eq!(h.executor.call_count("post-plan"), 1);
    assert!(CheckpointStore::load(&*h.store, &id)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn held_exec_lock_defers_the_ticket() {
    let h = harness();
    let id = h.create_ticket().await;
    h.store.enqueue(&id, &TicketEvent::Start).await.unwrap();
    let (scheduler, _shutdown) = scheduler_for(&h);

    // Another replica is mid-invocation on this ticket.
    let lock_path = h.store.exec_lock_path(&id);
    std::fs::create_dir_all(lock_path.parent().unwrap()).unwrap();
    let held = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .unwrap();
    held.lock_exclusive().unwrap();

    let processed = scheduler.tick().await.unwrap();
    assert_eq!(processed, 0);
    assert_eq!(h.ticket(&id).await.state, TicketState::Pending);
    assert!(h.store.peek(&id).await.unwrap().is_some());

    // Once released, the next tick picks it up.
    fs2::FileExt::unlock(&held).unwrap();
    assert_eq!(scheduler.tick().await.unwrap(), 1);
    assert_eq!(h.ticket(&id).await.state, TicketState::AwaitingAnswers);
}

#[tokio::test]
async fn run_honors_shutdown() {
    let h = harness();
    let (scheduler, shutdown_tx) = scheduler_for(&h);
    shutdown_tx.send(true).unwrap();
    // Returns promptly instead of looping.
    scheduler.run().await.unwrap();
}
