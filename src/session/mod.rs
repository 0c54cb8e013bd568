//! Session state: per-attempt phase outcomes and artifact pointers.
//!
//! Everything here is append-only. The final state of a phase is the last
//! outcome recorded for it.

pub mod layout;
pub mod scope;
mod store;

pub use layout::{SessionLayout, create_session, normalize_name};
pub use scope::{ScopeCheck, ScopePolicy};
pub use store::SessionStore;

use crate::gates::{CheckDetail, FailureClass};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Status of one recorded attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Passed,
    Failed,
    Blocked,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeStatus::Passed => write!(f, "passed"),
            OutcomeStatus::Failed => write!(f, "failed"),
            OutcomeStatus::Blocked => write!(f, "blocked"),
        }
    }
}

/// The result of one attempt at one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseOutcome {
    pub phase_id: String,
    /// 1-based attempt counter
    pub attempt_number: u32,
    pub status: OutcomeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_classification: Option<FailureClass>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub detail: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unresolved_checks: Vec<CheckDetail>,
    /// Set only when a human forced the outcome
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub overridden: bool,
}

impl PhaseOutcome {
    fn new(phase_id: &str, attempt_number: u32, status: OutcomeStatus, detail: &str) -> Self {
        Self {
            phase_id: phase_id.to_string(),
            attempt_number,
            status,
            failure_classification: None,
            timestamp: Utc::now(),
            detail: detail.to_string(),
            unresolved_checks: Vec::new(),
            overridden: false,
        }
    }

    pub fn passed(phase_id: &str, attempt_number: u32) -> Self {
        Self::new(phase_id, attempt_number, OutcomeStatus::Passed, "")
    }

    pub fn failed(phase_id: &str, attempt_number: u32, detail: &str) -> Self {
        Self::new(phase_id, attempt_number, OutcomeStatus::Failed, detail)
    }

    pub fn blocked(phase_id: &str, attempt_number: u32, unresolved: Vec<CheckDetail>) -> Self {
        let detail = format!("{} unresolved check(s)", unresolved.len());
        Self {
            unresolved_checks: unresolved,
            ..Self::new(phase_id, attempt_number, OutcomeStatus::Blocked, &detail)
        }
    }

    pub fn with_detail(mut self, detail: &str) -> Self {
        self.detail = detail.to_string();
        self
    }

    pub fn with_classification(mut self, class: FailureClass) -> Self {
        self.failure_classification = Some(class);
        self
    }

    pub fn with_unresolved(mut self, checks: Vec<CheckDetail>) -> Self {
        self.unresolved_checks = checks;
        self
    }

    /// Whether this outcome ends the phase for good given its attempt limit.
    ///
    /// Passed and Blocked always do. Failed does once the limit is used up.
    pub fn is_terminal(&self, attempt_limit: u32) -> bool {
        match self.status {
            OutcomeStatus::Passed | OutcomeStatus::Blocked => true,
            OutcomeStatus::Failed => self.attempt_number >= attempt_limit,
        }
    }
}

/// What an artifact pointer refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Briefing,
    Plan,
    Requirements,
    Progress,
    TestResults,
    ReviewNotes,
    Report,
}

/// Pointer to a file produced or consumed during a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub kind: ArtifactKind,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ArtifactRef {
    pub fn new(kind: ArtifactKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            path: path.into(),
            phase_id: None,
            content_hash: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn for_phase(mut self, phase_id: &str) -> Self {
        self.phase_id = Some(phase_id.to_string());
        self
    }

    pub fn with_hash(mut self, hash: &str) -> Self {
        self.content_hash = Some(hash.to_string());
        self
    }
}

/// Read-only copy of everything the store holds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub outcomes: Vec<PhaseOutcome>,
    pub artifacts: Vec<ArtifactRef>,
}

impl SessionState {
    /// Last outcome recorded for a phase.
    pub fn latest(&self, phase_id: &str) -> Option<&PhaseOutcome> {
        self.outcomes.iter().rev().find(|o| o.phase_id == phase_id)
    }

    /// All outcomes for a phase in append order.
    pub fn history(&self, phase_id: &str) -> Vec<&PhaseOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.phase_id == phase_id)
            .collect()
    }

    pub fn is_passed(&self, phase_id: &str) -> bool {
        self.latest(phase_id)
            .is_some_and(|o| o.status == OutcomeStatus::Passed)
    }

    pub fn artifacts_for(&self, phase_id: &str) -> Vec<&ArtifactRef> {
        self.artifacts
            .iter()
            .filter(|a| a.phase_id.as_deref() == Some(phase_id))
            .collect()
    }
}
