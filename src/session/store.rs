//! Append-only session store backed by JSONL files.
//!
//! Two logs live in the session directory:
//! - `outcomes.jsonl`: one `PhaseOutcome` per line, one line per attempt
//! - `artifacts.jsonl`: one `ArtifactRef` per line
//!
//! The in-memory index and the log are updated under one mutex, and each file
//! write also holds an advisory exclusive lock so a second process appending to
//! the same session cannot interleave lines.

use super::{ArtifactRef, OutcomeStatus, PhaseOutcome, SessionState};
use crate::errors::{SequenceError, StoreError};
use fs2::FileExt;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

pub const OUTCOMES_FILE: &str = "outcomes.jsonl";
pub const ARTIFACTS_FILE: &str = "artifacts.jsonl";

#[derive(Debug, Default)]
struct Inner {
    outcomes: Vec<PhaseOutcome>,
    artifacts: Vec<ArtifactRef>,
    /// Highest attempt number recorded per phase
    last_attempt: HashMap<String, u32>,
}

/// Thread-safe outcome log. Share it as `Arc<SessionStore>`.
#[derive(Debug)]
pub struct SessionStore {
    dir: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl SessionStore {
    /// Open (or create) a store in `dir`, replaying any existing logs.
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir).map_err(|source| StoreError::Persist {
            path: dir.to_path_buf(),
            source,
        })?;

        let outcomes: Vec<PhaseOutcome> = read_jsonl(&dir.join(OUTCOMES_FILE))?;
        let artifacts: Vec<ArtifactRef> = read_jsonl(&dir.join(ARTIFACTS_FILE))?;

        let mut last_attempt = HashMap::new();
        for outcome in &outcomes {
            last_attempt.insert(outcome.phase_id.clone(), outcome.attempt_number);
        }

        tracing::debug!(
            dir = %dir.display(),
            outcomes = outcomes.len(),
            artifacts = artifacts.len(),
            "Session store opened"
        );

        Ok(Self {
            dir: Some(dir.to_path_buf()),
            inner: Mutex::new(Inner {
                outcomes,
                artifacts,
                last_attempt,
            }),
        })
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the index half-updated:
        // every mutation is a single push/insert after the file write succeeded.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append an outcome. The attempt number must be exactly one past the
    /// previous attempt for that phase (or 1 for the first).
    pub fn append(&self, outcome: PhaseOutcome) -> Result<(), StoreError> {
        let mut inner = self.lock();

        let expected = inner
            .last_attempt
            .get(&outcome.phase_id)
            .map_or(1, |n| n + 1);
        if outcome.attempt_number != expected {
            return Err(SequenceError {
                phase: outcome.phase_id.clone(),
                expected,
                actual: outcome.attempt_number,
            }
            .into());
        }

        if let Some(dir) = &self.dir {
            append_jsonl(&dir.join(OUTCOMES_FILE), &outcome)?;
        }

        tracing::debug!(
            phase = %outcome.phase_id,
            attempt = outcome.attempt_number,
            status = %outcome.status,
            "Outcome recorded"
        );

        inner
            .last_attempt
            .insert(outcome.phase_id.clone(), outcome.attempt_number);
        inner.outcomes.push(outcome);
        Ok(())
    }

    pub fn latest(&self, phase_id: &str) -> Option<PhaseOutcome> {
        self.lock()
            .outcomes
            .iter()
            .rev()
            .find(|o| o.phase_id == phase_id)
            .cloned()
    }

    pub fn history(&self, phase_id: &str) -> Vec<PhaseOutcome> {
        self.lock()
            .outcomes
            .iter()
            .filter(|o| o.phase_id == phase_id)
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> SessionState {
        let inner = self.lock();
        SessionState {
            outcomes: inner.outcomes.clone(),
            artifacts: inner.artifacts.clone(),
        }
    }

    pub fn record_artifact(&self, artifact: ArtifactRef) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(dir) = &self.dir {
            append_jsonl(&dir.join(ARTIFACTS_FILE), &artifact)?;
        }
        inner.artifacts.push(artifact);
        Ok(())
    }

    pub fn artifacts(&self) -> Vec<ArtifactRef> {
        self.lock().artifacts.clone()
    }

    /// Record a human decision that a phase is done, releasing its dependents.
    pub fn record_override(&self, phase_id: &str, note: &str) -> Result<PhaseOutcome, StoreError> {
        let attempt = {
            let inner = self.lock();
            let latest = inner.outcomes.iter().rev().find(|o| o.phase_id == phase_id);
            if latest.is_some_and(|o| o.status == OutcomeStatus::Passed) {
                return Err(StoreError::InvalidOverride {
                    phase: phase_id.to_string(),
                    message: "phase already passed".to_string(),
                });
            }
            inner.last_attempt.get(phase_id).map_or(1, |n| n + 1)
        };

        let detail = if note.is_empty() {
            "manual override".to_string()
        } else {
            format!("manual override: {}", note)
        };
        let mut outcome = PhaseOutcome::passed(phase_id, attempt).with_detail(&detail);
        outcome.overridden = true;

        tracing::info!(phase = %phase_id, attempt, "Phase overridden to passed");
        self.append(outcome.clone())?;
        Ok(outcome)
    }
}

fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StoreError> {
    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Persist {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    file.lock_shared().map_err(|source| StoreError::Persist {
        path: path.to_path_buf(),
        source,
    })?;

    let mut records = Vec::new();
    for (i, line) in BufReader::new(&file).lines().enumerate() {
        let line = line.map_err(|source| StoreError::Persist {
            path: path.to_path_buf(),
            source,
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|e| StoreError::Corrupt {
            path: path.to_path_buf(),
            line: i + 1,
            message: e.to_string(),
        })?;
        records.push(record);
    }

    let _ = FileExt::unlock(&file);
    Ok(records)
}

fn append_jsonl<T: Serialize>(path: &Path, record: &T) -> Result<(), StoreError> {
    let persist = |source: std::io::Error| StoreError::Persist {
        path: path.to_path_buf(),
        source,
    };

    let mut line = serde_json::to_string(record)
        .map_err(|e| persist(std::io::Error::new(ErrorKind::InvalidData, e)))?;
    line.push('\n');

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(persist)?;

    file.lock_exclusive().map_err(persist)?;
    let written = file.write_all(line.as_bytes()).and_then(|_| file.flush());
    let _ = FileExt::unlock(&file);
    written.map_err(persist)
}
