//! Persistence interfaces for tickets, checkpoints and the event inbox.
//!
//! The orchestrator talks to these traits only; the file-backed
//! implementation lives in [`file_store`]. The combined
//! `save_with_checkpoint` commit exists because a ticket pointing at a
//! missing checkpoint (or vice versa) is an invariant violation — both
//! records must change together or not at all.

pub mod file_store;

pub use file_store::FileTicketStore;

use crate::checkpoint::Checkpoint;
use crate::state_model::TicketEvent;
use crate::ticket::{Ticket, TicketId};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Persists a brand-new ticket; fails if the id already exists.
    async fn create(&self, ticket: &Ticket) -> Result<()>;
    async fn load(&self, id: &TicketId) -> Result<Option<Ticket>>;
    /// Saves the ticket without touching its checkpoint.
    async fn save(&self, ticket: &Ticket) -> Result<()>;
    /// Atomic combined commit: the ticket plus its checkpoint (upserted when
    /// `Some`, cleared when `None`) under one exclusive lock.
    async fn save_with_checkpoint(
        &self,
        ticket: &Ticket,
        checkpoint: Option<&Checkpoint>,
    ) -> Result<()>;
    async fn list(&self) -> Result<Vec<Ticket>>;
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    #[allow(dead_code)]
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()>;
    async fn load(&self, id: &TicketId) -> Result<Option<Checkpoint>>;
    #[allow(dead_code)]
    async fn clear(&self, id: &TicketId) -> Result<()>;
}

/// An external trigger parked in a ticket's inbox until the scheduler picks
/// it up. At-least-once delivery: the scheduler acks after the orchestrator
/// returns, and the transition table refuses duplicates.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedEvent {
    /// Store-assigned id, used to ack.
    pub entry_id: String,
    pub event: TicketEvent,
    pub enqueued_at: String,
}

#[async_trait]
pub trait EventInbox: Send + Sync {
    async fn enqueue(&self, id: &TicketId, event: &TicketEvent) -> Result<()>;
    /// Oldest queued event, without removing it.
    async fn peek(&self, id: &TicketId) -> Result<Option<QueuedEvent>>;
    async fn ack(&self, id: &TicketId, entry_id: &str) -> Result<()>;
    /// Tickets with runnable work: a queued inbox event, or a running-state
    /// ticket left behind by a crash or cancellation interrupt.
    async fn list_runnable(&self) -> Result<Vec<TicketId>>;
}
