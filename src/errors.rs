//! Typed error hierarchy for the phasegate orchestrator.
//!
//! Each enum maps to one failure family:
//! - `PlanValidationError` — authoring defects (graph or plan markers), fatal before a run starts
//! - `SequenceError` — out-of-order outcome append, always a caller bug
//! - `StoreError` — session store persistence failures
//! - `WorkflowStalledError` — nothing eligible but the run is incomplete
//! - `GateBlockedError` — a gate exhausted its retries
//! - `ExecutorFault` — infrastructure failures raised by an executor
//! - `OrchestratorError` — everything a run can surface

use crate::gates::CheckDetail;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Authoring defects in the phase graph or the plan document.
///
/// These are never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanValidationError {
    #[error("Cycle detected in phase prerequisites. Involved phases: {involved:?}")]
    Cycle { involved: Vec<String> },

    #[error("Duplicate phase id: {id}")]
    DuplicateId { id: String },

    #[error("Unknown prerequisite '{prerequisite}' in phase '{phase}': no phase with that id exists")]
    UnknownPrerequisite { phase: String, prerequisite: String },

    #[error("Phase {phase} ({kind}) has invalid max_retries {max_retries}: {message}")]
    InvalidRetryBound {
        phase: String,
        kind: String,
        max_retries: u32,
        message: String,
    },

    #[error("Malformed marker at line {line}: {message}")]
    MalformedMarker { line: usize, message: String },

    #[error("Phase {phase} has more than one marker pair (lines {first_line} and {second_line})")]
    DuplicatePhase {
        phase: String,
        first_line: usize,
        second_line: usize,
    },

    #[error("Briefing for phase {phase} points back to a source document: \"{excerpt}\"")]
    ForwardReference { phase: String, excerpt: String },

    #[error("Marker contract violated for phase {phase}: {message}")]
    MarkerContract { phase: String, message: String },
}

/// An outcome was appended with an attempt number that is not `previous + 1`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Out-of-order outcome for phase {phase}: expected attempt {expected}, got {actual}")]
pub struct SequenceError {
    pub phase: String,
    pub expected: u32,
    pub actual: u32,
}

/// Errors from the session state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sequence(#[from] SequenceError),

    #[error("Failed to persist session record to {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt record in {path} at line {line}: {message}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("Cannot override phase {phase}: {message}")]
    InvalidOverride { phase: String, message: String },
}

/// No phase is eligible but the run has phases that are neither settled nor excluded.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Workflow stalled at phase {phase} (blocking chain: {})", .chain.join(" -> "))]
pub struct WorkflowStalledError {
    pub phase: String,
    pub chain: Vec<String>,
}

/// A gate used every attempt without all checks passing.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("Gate {phase} blocked after {attempts} attempt(s); unresolved checks:\n{}", format_unresolved(.unresolved))]
pub struct GateBlockedError {
    pub phase: String,
    pub attempts: u32,
    pub unresolved: Vec<CheckDetail>,
}

fn format_unresolved(checks: &[CheckDetail]) -> String {
    checks
        .iter()
        .map(|c| format!("  - {}", c))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Infrastructure failures raised by an executor, unrelated to check content.
#[derive(Debug, Error)]
pub enum ExecutorFault {
    #[error("Environment under test is unreachable: {0}")]
    Unreachable(String),

    #[error("Failed to spawn executor command: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("Executor produced unreadable output: {0}")]
    InvalidOutput(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors that abort a workflow run.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    PlanValidation(#[from] PlanValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Stalled(#[from] WorkflowStalledError),

    #[error("Failed to read plan document at {path}: {source}")]
    PlanReadFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<SequenceError> for OrchestratorError {
    fn from(err: SequenceError) -> Self {
        OrchestratorError::Store(StoreError::Sequence(err))
    }
}
