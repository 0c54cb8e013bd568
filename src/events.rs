//! Progress events emitted while a workflow runs.
//!
//! Events are informational: the session store is the source of truth. A
//! missing or slow receiver never changes what gets recorded.

use crate::gates::FailureClass;
use crate::session::OutcomeStatus;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        phases: usize,
    },
    PhaseStarted {
        phase: String,
        attempt: u32,
    },
    /// Final outcome of a phase in this run
    PhaseFinished {
        phase: String,
        attempt: u32,
        status: OutcomeStatus,
        detail: String,
    },
    /// A gate attempt had failing checks; another attempt may follow
    ChecksFailed {
        phase: String,
        attempt: u32,
        failing: usize,
        total: usize,
    },
    RepairRequested {
        phase: String,
        check_id: String,
    },
    FixDelegated {
        phase: String,
        attempt: u32,
        check_id: String,
        /// Location, message and expected/actual of the failing check
        detail: String,
    },
    FixTimedOut {
        phase: String,
        check_id: String,
    },
    InfrastructureFault {
        phase: String,
        attempt: u32,
        message: String,
        class: FailureClass,
    },
    PhaseSkipped {
        phase: String,
        because_of: String,
    },
    Aborted {
        pending: Vec<String>,
    },
    RunFinished {
        status: String,
    },
}

/// Optional event channel; sends are best effort.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::Sender<RunEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<RunEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn none() -> Self {
        Self { tx: None }
    }

    pub async fn emit(&self, event: RunEvent) {
        if let Some(ref tx) = self.tx {
            tx.send(event).await.ok();
        }
    }
}
