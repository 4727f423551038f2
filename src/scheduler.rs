//! The process-level driver: discovers tickets with runnable work and invokes
//! the orchestrator, one concurrent invocation per ticket.
//!
//! Exclusion is two-layered: an in-process async mutex per ticket, plus an
//! `fs2` advisory lock on the ticket's `exec.lock` so replicas sharing the
//! data dir cannot double-execute a step. The lock scope is exactly one event
//! fold; it is released whether the invocation suspends, completes or fails.

use crate::config::SchedulerConfig;
use crate::orchestrator::{HandleResult, Orchestrator};
use crate::state_model::TicketEvent;
use crate::store::{EventInbox, FileTicketStore, TicketStore};
use crate::structured_logger::StructuredLogger;
use crate::ticket::TicketId;
use anyhow::Result;
use fs2::FileExt;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<FileTicketStore>,
    orchestrator: Arc<Orchestrator>,
    logger: Arc<StructuredLogger>,
    config: SchedulerConfig,
    locks: Arc<Mutex<HashMap<TicketId, Arc<tokio::sync::Mutex<()>>>>>,
    limiter: Arc<Semaphore>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Scheduler {
    pub fn new(
        store: Arc<FileTicketStore>,
        orchestrator: Arc<Orchestrator>,
        logger: Arc<StructuredLogger>,
        config: SchedulerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            orchestrator,
            logger,
            config,
            locks: Arc::new(Mutex::new(HashMap::new())),
            limiter: Arc::new(Semaphore::new(config.max_concurrent_tickets.max(1))),
            shutdown_rx,
        }
    }

    /// Poll loop. Returns once the shutdown signal fires; in-flight
    /// invocations finish their current step first.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            if let Err(e) = self.tick().await {
                tracing::warn!("scheduler tick failed: {:#}", e);
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)) => {}
                _ = shutdown_rx.changed() => break,
            }
        }
        Ok(())
    }

    /// One scan: process every runnable ticket, concurrently across tickets.
    /// Returns how many invocations actually ran.
    pub async fn tick(&self) -> Result<usize> {
        let runnable = self.store.list_runnable().await?;
        self.logger.log_scheduler_tick(runnable.len());

        let mut set = JoinSet::new();
        for ticket_id in runnable {
            let scheduler = self.clone();
            set.spawn(async move {
                let _permit = scheduler.limiter.acquire().await;
                match scheduler.process_one(&ticket_id).await {
                    Ok(ran) => ran,
                    Err(e) => {
                        tracing::warn!("ticket {} failed to process: {:#}", ticket_id, e);
                        false
                    }
                }
            });
        }

        let mut processed = 0;
        while let Some(joined) = set.join_next().await {
            if matches!(joined, Ok(true)) {
                processed += 1;
            }
        }
        Ok(processed)
    }

    /// Runs at most one event fold for the ticket, under both locks.
    async fn process_one(&self, ticket_id: &TicketId) -> Result<bool> {
        let lock = self.ticket_lock(ticket_id);
        let Ok(_guard) = lock.try_lock() else {
            self.logger.log_lock_busy(ticket_id);
            return Ok(false);
        };

        // Cross-replica exclusion; released when the handle drops.
        let lock_path = self.store.exec_lock_path(ticket_id);
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let exec_lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        if exec_lock.try_lock_exclusive().is_err() {
            self.logger.log_lock_busy(ticket_id);
            return Ok(false);
        }

        let queued = self.store.peek(ticket_id).await?;
        let (event, entry_id) = match queued {
            Some(queued) => (queued.event, Some(queued.entry_id)),
            None => {
                // No trigger: interrupted running-state work. Re-drive the
                // walk from its persisted position via a timeout fold.
                let Some(ticket) = self.store.load(ticket_id).await? else {
                    return Ok(false);
                };
                let step_id = ticket.position.clone().unwrap_or_default();
                (TicketEvent::Timeout { step_id }, None)
            }
        };

        let result = self.orchestrator.handle_event(ticket_id, event).await?;
        if let HandleResult::Refused(reason) = &result {
            tracing::warn!("ticket {} dropped event: {}", ticket_id, reason);
        }

        // Ack after the fold returned; a crash before this point re-delivers
        // and the transition table refuses the duplicate.
        if let Some(entry_id) = entry_id {
            self.store.ack(ticket_id, &entry_id).await?;
        }
        Ok(true)
    }

    fn ticket_lock(&self, ticket_id: &TicketId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = match self.locks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Arc::clone(locks.entry(*ticket_id).or_default())
    }
}

#[cfg(test)]
#[path = "tests/scheduler_tests.rs"]
mod tests;
