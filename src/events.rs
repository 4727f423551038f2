//! Outward state-change events for external subscribers (UI, notification).
//!
//! Emitted after every successful fold. Delivery is fire-and-forget over a
//! broadcast channel: an absent or lagging subscriber never blocks the
//! orchestrator.

use crate::state_model::TicketState;
use crate::ticket::{TenantId, TicketId};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// One ticket state transition, as seen from outside.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateChanged {
    pub ticket_id: TicketId,
    pub tenant: TenantId,
    pub previous: TicketState,
    pub new: TicketState,
    pub timestamp: String,
    /// Present for failure and rejection transitions.
    pub reason: Option<String>,
}

impl StateChanged {
    pub fn new(
        ticket_id: TicketId,
        tenant: TenantId,
        previous: TicketState,
        new: TicketState,
        reason: Option<String>,
    ) -> Self {
        Self {
            ticket_id,
            tenant,
            previous,
            new,
            timestamp: Utc::now().to_rfc3339(),
            reason,
        }
    }
}

/// Broadcast bus for state-change events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StateChanged>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes a change. Send errors (no subscribers) are ignored.
    pub fn publish(&self, change: StateChanged) {
        let _ = self.tx.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChanged> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_is_silent() {
        let bus = EventBus::default();
        bus.publish(StateChanged::new(
            TicketId::new(),
            TenantId::new("acme"),
            TicketState::Pending,
            TicketState::Analyzing,
            None,
        ));
    }

    #[tokio::test]
    async fn subscribers_receive_changes() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        let change = StateChanged::new(
            TicketId::new(),
            TenantId::new("acme"),
            TicketState::Planning,
            TicketState::PlanUnderReview,
            None,
        );
        bus.publish(change.clone());
        let received = rx.recv().await.unwrap();
        assert_eq!(received, change);
    }
}
