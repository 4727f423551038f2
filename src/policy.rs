//! Retry and rejection policy.
//!
//! Two independent counters, never conflated: a transient retry budget per
//! step (reset each time the step is entered afresh) and a human-rejection
//! budget per phase (persists across suspend/resume cycles within the phase,
//! reset only on successful phase exit). Exceeding either bound is fatal.

use crate::state_model::Phase;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Transient retry budget and backoff for a single step.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts including the first. Default: 3
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff in seconds; doubled per retry. Default: 5
    #[serde(default = "default_backoff_secs")]
    pub backoff_secs: u32,
    /// Ceiling for the computed backoff. Default: 60
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u32,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_secs() -> u32 {
    5
}

fn default_max_backoff_secs() -> u32 {
    60
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_secs: default_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never sleeps, for tests.
    #[cfg(test)]
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff_secs: 0,
            max_backoff_secs: 0,
        }
    }

    /// True while `attempt` (1-based, already executed) leaves budget.
    pub fn has_budget(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Exponential backoff with jitter before retry number `attempt + 1`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        if self.backoff_secs == 0 {
            return Duration::ZERO;
        }
        let exp = attempt.saturating_sub(1).min(16);
        let base = u64::from(self.backoff_secs).saturating_mul(1u64 << exp);
        let capped = base.min(u64::from(self.max_backoff_secs));
        let jitter_ms = rand::thread_rng().gen_range(0..=u64::from(self.backoff_secs) * 100);
        Duration::from_secs(capped) + Duration::from_millis(jitter_ms)
    }
}

/// Per-phase human-rejection bounds.
///
/// The reference bounds (3 for refinement's ticket-description step, 5 for
/// plan review) are product policy, so each phase is independently
/// configurable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RejectionPolicy {
    /// Default: 3
    #[serde(default = "default_refinement_rejections")]
    pub max_refinement_rejections: u32,
    /// Default: 5
    #[serde(default = "default_planning_rejections")]
    pub max_planning_rejections: u32,
    /// Default: 5
    #[serde(default = "default_planning_rejections")]
    pub max_implementation_rejections: u32,
}

fn default_refinement_rejections() -> u32 {
    3
}

fn default_planning_rejections() -> u32 {
    5
}

impl Default for RejectionPolicy {
    fn default() -> Self {
        Self {
            max_refinement_rejections: default_refinement_rejections(),
            max_planning_rejections: default_planning_rejections(),
            max_implementation_rejections: default_planning_rejections(),
        }
    }
}

impl RejectionPolicy {
    pub fn bound_for(&self, phase: Phase) -> u32 {
        match phase {
            Phase::Refinement => self.max_refinement_rejections,
            Phase::Planning => self.max_planning_rejections,
            Phase::Implementation => self.max_implementation_rejections,
        }
    }
}

/// Rejection count and last reason, scoped to one phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RejectionRecord {
    pub count: u32,
    pub last_reason: Option<String>,
}

impl RejectionRecord {
    /// Records one more "reject & regenerate" decision.
    pub fn record(&mut self, reason: &str) {
        self.count += 1;
        self.last_reason = Some(reason.to_string());
    }

    /// True if a further rejection would exceed the bound.
    pub fn exhausted(&self, bound: u32) -> bool {
        self.count >= bound
    }
}
