//! File-backed ticket, checkpoint and inbox store.
//!
//! Layout under the data root:
//!
//! ```text
//! tickets/<ticket-id>/
//!   ticket.json       — the ticket record
//!   checkpoint.json   — live checkpoint, absent when none
//!   inbox/<seq>.json  — queued external events, oldest first
//!   exec.lock         — per-ticket execution lock (scheduler)
//!   store.lock        — write lock for atomic combined commits
//! ```
//!
//! Writes go through a temp file plus rename; combined ticket/checkpoint
//! commits hold an exclusive `fs2` lock on `store.lock` so concurrent
//! replicas cannot interleave the pair.

use super::{CheckpointStore, EventInbox, QueuedEvent, TicketStore};
use crate::checkpoint::Checkpoint;
use crate::state_model::{StateKind, TicketEvent};
use crate::ticket::{Ticket, TicketId};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct FileTicketStore {
    root: PathBuf,
}

impl FileTicketStore {
    /// Opens (and creates) a store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(root.join("tickets"))
            .with_context(|| format!("Failed to create store root: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn ticket_dir(&self, id: &TicketId) -> PathBuf {
        self.root.join("tickets").join(id.to_string())
    }

    /// Lock file guarding one orchestrator invocation per ticket across
    /// processes. The scheduler holds this for the duration of an event fold.
    pub fn exec_lock_path(&self, id: &TicketId) -> PathBuf {
        self.ticket_dir(id).join("exec.lock")
    }

    fn ticket_path(&self, id: &TicketId) -> PathBuf {
        self.ticket_dir(id).join("ticket.json")
    }

    fn checkpoint_path(&self, id: &TicketId) -> PathBuf {
        self.ticket_dir(id).join("checkpoint.json")
    }

    fn inbox_dir(&self, id: &TicketId) -> PathBuf {
        self.ticket_dir(id).join("inbox")
    }

    fn store_lock(&self, id: &TicketId) -> Result<File> {
        let dir = self.ticket_dir(id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create ticket directory: {}", dir.display()))?;
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join("store.lock"))?;
        lock.lock_exclusive()?;
        Ok(lock)
    }

    fn write_atomic(path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, content)
            .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;
        fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to rename temp file to: {}", path.display()))?;
        Ok(())
    }

    fn write_ticket(&self, ticket: &Ticket) -> Result<()> {
        let content = serde_json::to_string_pretty(ticket)
            .with_context(|| "Failed to serialize ticket to JSON")?;
        Self::write_atomic(&self.ticket_path(&ticket.id), &content)
    }

    fn write_checkpoint(&self, checkpoint: &Checkpoint) -> Result<()> {
        let content = serde_json::to_string_pretty(checkpoint)
            .with_context(|| "Failed to serialize checkpoint to JSON")?;
        Self::write_atomic(&self.checkpoint_path(&checkpoint.ticket_id), &content)
    }

    fn remove_checkpoint(&self, id: &TicketId) -> Result<()> {
        let path = self.checkpoint_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to remove checkpoint: {}", path.display()))
            }
        }
    }

    fn read_ticket(&self, id: &TicketId) -> Result<Option<Ticket>> {
        let path = self.ticket_path(id);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read ticket: {}", path.display()))
            }
        };
        let ticket = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse ticket file: {}", path.display()))?;
        Ok(Some(ticket))
    }
}

#[async_trait]
impl TicketStore for FileTicketStore {
    async fn create(&self, ticket: &Ticket) -> Result<()> {
        let _lock = self.store_lock(&ticket.id)?;
        if self.ticket_path(&ticket.id).exists() {
            bail!("ticket {} already exists", ticket.id);
        }
        self.write_ticket(ticket)
    }

    async fn load(&self, id: &TicketId) -> Result<Option<Ticket>> {
        self.read_ticket(id)
    }

    async fn save(&self, ticket: &Ticket) -> Result<()> {
        let _lock = self.store_lock(&ticket.id)?;
        self.write_ticket(ticket)
    }

    async fn save_with_checkpoint(
        &self,
        ticket: &Ticket,
        checkpoint: Option<&Checkpoint>,
    ) -> Result<()> {
        let _lock = self.store_lock(&ticket.id)?;
        self.write_ticket(ticket)?;
        match checkpoint {
            Some(checkpoint) => {
                if checkpoint.ticket_id != ticket.id {
                    bail!(
                        "checkpoint for {} committed against ticket {}",
                        checkpoint.ticket_id,
                        ticket.id
                    );
                }
                self.write_checkpoint(checkpoint)
            }
            None => self.remove_checkpoint(&ticket.id),
        }
    }

    async fn list(&self) -> Result<Vec<Ticket>> {
        let tickets_dir = self.root.join("tickets");
        let mut tickets = Vec::new();
        for entry in fs::read_dir(&tickets_dir)
            .with_context(|| format!("Failed to read store root: {}", tickets_dir.display()))?
        {
            let entry = entry?;
            let Some(name) = entry.file_name().to_str().map(String::from) else {
                continue;
            };
            let Ok(id) = TicketId::parse(&name) else {
                continue;
            };
            if let Some(ticket) = self.read_ticket(&id)? {
                tickets.push(ticket);
            }
        }
        tickets.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(tickets)
    }
}

#[async_trait]
impl CheckpointStore for FileTicketStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<()> {
        let _lock = self.store_lock(&checkpoint.ticket_id)?;
        self.write_checkpoint(checkpoint)
    }

    async fn load(&self, id: &TicketId) -> Result<Option<Checkpoint>> {
        let path = self.checkpoint_path(id);
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read checkpoint: {}", path.display()))
            }
        };
        let checkpoint = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse checkpoint file: {}", path.display()))?;
        Ok(Some(checkpoint))
    }

    async fn clear(&self, id: &TicketId) -> Result<()> {
        let _lock = self.store_lock(id)?;
        self.remove_checkpoint(id)
    }
}

#[async_trait]
impl EventInbox for FileTicketStore {
    async fn enqueue(&self, id: &TicketId, event: &TicketEvent) -> Result<()> {
        if !event.is_external() {
            bail!("event {} is engine-internal and cannot be enqueued", event.kind());
        }
        let inbox = self.inbox_dir(id);
        fs::create_dir_all(&inbox)
            .with_context(|| format!("Failed to create inbox: {}", inbox.display()))?;
        // Microsecond timestamp prefix keeps lexicographic order == FIFO.
        let entry_id = format!(
            "{}-{}",
            Utc::now().format("%Y%m%dT%H%M%S%.6f"),
            Uuid::new_v4()
        );
        let queued = QueuedEvent {
            entry_id: entry_id.clone(),
            event: event.clone(),
            enqueued_at: Utc::now().to_rfc3339(),
        };
        let content = serde_json::to_string_pretty(&queued)
            .with_context(|| "Failed to serialize queued event")?;
        Self::write_atomic(&inbox.join(format!("{}.json", entry_id)), &content)
    }

    async fn peek(&self, id: &TicketId) -> Result<Option<QueuedEvent>> {
        let inbox = self.inbox_dir(id);
        let mut names: Vec<String> = match fs::read_dir(&inbox) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .filter_map(|e| e.file_name().to_str().map(String::from))
                .filter(|n| n.ends_with(".json"))
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read inbox: {}", inbox.display()))
            }
        };
        names.sort();
        let Some(oldest) = names.first() else {
            return Ok(None);
        };
        let path = inbox.join(oldest);
        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read queued event: {}", path.display()))?;
        let queued = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse queued event: {}", path.display()))?;
        Ok(Some(queued))
    }

    async fn ack(&self, id: &TicketId, entry_id: &str) -> Result<()> {
        let path = self.inbox_dir(id).join(format!("{}.json", entry_id));
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                Err(e).with_context(|| format!("Failed to ack event: {}", path.display()))
            }
        }
    }

    async fn list_runnable(&self) -> Result<Vec<TicketId>> {
        let mut runnable = Vec::new();
        for ticket in self.list().await? {
            let has_inbox = self.peek(&ticket.id).await?.is_some();
            // A running-state ticket with no active invocation is interrupted
            // work (crash or cancellation); the exec lock keeps this from
            // racing a live invocation.
            let interrupted = ticket.state.kind() == StateKind::Running;
            if has_inbox || interrupted {
                runnable.push(ticket.id);
            }
        }
        Ok(runnable)
    }
}

#[cfg(test)]
#[path = "tests/file_store_tests.rs"]
mod tests;
