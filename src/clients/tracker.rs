//! File-backed tracker client.
//!
//! Records per-ticket comments and descriptions as files under the data dir.
//! The comment log is append-only JSONL keyed by step id, which makes the
//! `(ticket, step)` idempotency check a scan for a prior entry.

use super::TrackerClient;
use crate::step::StepFailure;
use crate::ticket::TicketId;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommentRecord {
    step_id: String,
    body: String,
    posted_at: String,
}

#[derive(Debug, Clone)]
pub struct FileTracker {
    root: PathBuf,
}

impl FileTracker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn comments_path(&self, ticket: &TicketId) -> PathBuf {
        self.root.join(format!("{}-comments.jsonl", ticket))
    }

    fn description_path(&self, ticket: &TicketId) -> PathBuf {
        self.root.join(format!("{}-description.md", ticket))
    }

    fn io_failure(context: &str, e: std::io::Error) -> StepFailure {
        StepFailure::fatal(format!("{}: {}", context, e))
    }

    /// Comments posted for a ticket, oldest first. Used by tests and the
    /// status CLI.
    pub fn comments(&self, ticket: &TicketId) -> Result<Vec<(String, String)>, StepFailure> {
        let path = self.comments_path(ticket);
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_failure("failed to open comment log", e)),
        };
        let mut comments = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| Self::io_failure("failed to read comment log", e))?;
            let record: CommentRecord = serde_json::from_str(&line)
                .map_err(|e| StepFailure::fatal(format!("corrupt comment log: {}", e)))?;
            comments.push((record.step_id, record.body));
        }
        Ok(comments)
    }
}

#[async_trait]
impl TrackerClient for FileTracker {
    async fn comment_exists(
        &self,
        ticket: &TicketId,
        step_id: &str,
    ) -> Result<bool, StepFailure> {
        Ok(self
            .comments(ticket)?
            .iter()
            .any(|(recorded, _)| recorded == step_id))
    }

    async fn post_comment(
        &self,
        ticket: &TicketId,
        step_id: &str,
        body: &str,
    ) -> Result<(), StepFailure> {
        fs::create_dir_all(&self.root)
            .map_err(|e| Self::io_failure("failed to create tracker dir", e))?;
        let record = CommentRecord {
            step_id: step_id.to_string(),
            body: body.to_string(),
            posted_at: Utc::now().to_rfc3339(),
        };
        let line = serde_json::to_string(&record)
            .map_err(|e| StepFailure::fatal(format!("failed to serialize comment: {}", e)))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.comments_path(ticket))
            .map_err(|e| Self::io_failure("failed to open comment log", e))?;
        writeln!(file, "{}", line)
            .map_err(|e| Self::io_failure("failed to append comment", e))?;
        Ok(())
    }

    async fn update_description(
        &self,
        ticket: &TicketId,
        body: &str,
    ) -> Result<(), StepFailure> {
        fs::create_dir_all(&self.root)
            .map_err(|e| Self::io_failure("failed to create tracker dir", e))?;
        fs::write(self.description_path(ticket), body)
            .map_err(|e| Self::io_failure("failed to write description", e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn comment_existence_is_per_step() {
        let dir = TempDir::new().unwrap();
        let tracker = FileTracker::new(dir.path());
        let ticket = TicketId::new();

        assert!(!tracker.comment_exists(&ticket, "post-plan").await.unwrap());
        tracker
            .post_comment(&ticket, "post-plan", "the plan")
            .await
            .unwrap();
        assert!(tracker.comment_exists(&ticket, "post-plan").await.unwrap());
        assert!(!tracker
            .comment_exists(&ticket, "post-questions")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn description_updates_overwrite() {
        let dir = TempDir::new().unwrap();
        let tracker = FileTracker::new(dir.path());
        let ticket = TicketId::new();

        tracker.update_description(&ticket, "v1").await.unwrap();
        tracker.update_description(&ticket, "v2").await.unwrap();
        let content = std::fs::read_to_string(tracker.description_path(&ticket)).unwrap();
        assert_eq!(content, "v2");
    }
}
