//! Structured JSONL logger for debugging and event reconstruction.
//!
//! Machine-parseable logging with monotonic sequence numbers, ISO 8601
//! timestamps with microsecond precision, and a process id for correlating
//! entries across scheduler restarts. Every orchestrator fold, engine step
//! and scheduler decision lands here as one JSON line.

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::events::StateChanged;
use crate::state_model::TicketEvent;
use crate::ticket::TicketId;

/// Structured JSONL logger shared by all components of one process.
pub struct StructuredLogger {
    process_id: String,
    seq: AtomicU64,
    log_file: Mutex<File>,
    log_path: PathBuf,
}

/// A single log entry in JSONL format.
#[derive(Serialize, serde::Deserialize)]
pub struct LogEntry {
    /// Monotonic sequence number, unique within the process.
    pub seq: u64,
    /// ISO 8601 timestamp with microseconds.
    pub ts: String,
    /// Process instance id (new on every scheduler start).
    pub process_id: String,
    /// Component that emitted the entry.
    pub component: String,
    /// Structured event data.
    pub event: Value,
}

impl StructuredLogger {
    /// Creates a logger writing to `<logs_dir>/events.jsonl`.
    ///
    /// # Errors
    ///
    /// Returns an error if the logs directory cannot be created or the log
    /// file cannot be opened.
    pub fn new(process_id: &str, logs_dir: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(logs_dir)?;
        let log_path = logs_dir.join("events.jsonl");
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;

        Ok(Self {
            process_id: process_id.to_string(),
            seq: AtomicU64::new(0),
            log_file: Mutex::new(file),
            log_path,
        })
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Logs a structured event. Thread-safe; failures to write are ignored
    /// so logging can never take the orchestrator down.
    pub fn log(&self, component: &str, event: impl Serialize) {
        let entry = LogEntry {
            seq: self.next_seq(),
            ts: Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            process_id: self.process_id.clone(),
            component: component.to_string(),
            event: serde_json::to_value(event).unwrap_or(Value::Null),
        };

        if let Ok(mut file) = self.log_file.lock() {
            if let Ok(line) = serde_json::to_string(&entry) {
                let _ = writeln!(file, "{}", line);
                let _ = file.flush();
            }
        }
    }

    pub fn log_event_received(&self, ticket_id: &TicketId, event: &TicketEvent) {
        self.log(
            "Orchestrator",
            serde_json::json!({
                "type": "EventReceived",
                "ticket_id": ticket_id,
                "event": event
            }),
        );
    }

    pub fn log_event_refused(&self, ticket_id: &TicketId, event: &TicketEvent, reason: &str) {
        self.log(
            "Orchestrator",
            serde_json::json!({
                "type": "EventRefused",
                "ticket_id": ticket_id,
                "event_kind": event.kind(),
                "reason": reason
            }),
        );
    }

    pub fn log_state_changed(&self, change: &StateChanged) {
        self.log(
            "Orchestrator",
            serde_json::json!({
                "type": "StateChanged",
                "change": change
            }),
        );
    }

    pub fn log_step_started(&self, ticket_id: &TicketId, step_id: &str, attempt: u32) {
        self.log(
            "Engine",
            serde_json::json!({
                "type": "StepStarted",
                "ticket_id": ticket_id,
                "step_id": step_id,
                "attempt": attempt
            }),
        );
    }

    pub fn log_step_finished(&self, ticket_id: &TicketId, step_id: &str, result: &str) {
        self.log(
            "Engine",
            serde_json::json!({
                "type": "StepFinished",
                "ticket_id": ticket_id,
                "step_id": step_id,
                "result": result
            }),
        );
    }

    pub fn log_graph_outcome(&self, ticket_id: &TicketId, outcome: &str) {
        self.log(
            "Engine",
            serde_json::json!({
                "type": "GraphOutcome",
                "ticket_id": ticket_id,
                "outcome": outcome
            }),
        );
    }

    pub fn log_scheduler_tick(&self, runnable: usize) {
        self.log(
            "Scheduler",
            serde_json::json!({
                "type": "Tick",
                "runnable": runnable
            }),
        );
    }

    pub fn log_lock_busy(&self, ticket_id: &TicketId) {
        self.log(
            "Scheduler",
            serde_json::json!({
                "type": "LockBusy",
                "ticket_id": ticket_id
            }),
        );
    }

    pub fn path(&self) -> &PathBuf {
        &self.log_path
    }
}
