//! The summary a run leaves behind in `report.json`.

use crate::dag::PhaseStatus;
use crate::errors::GateBlockedError;
use crate::gates::GateReport;
use crate::phase::PhaseKind;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Every phase passed
    Success,
    /// At least one phase ended without passing
    PartialFailure {
        blocked: Vec<String>,
        failed: Vec<String>,
        skipped: Vec<String>,
    },
    /// Stopped at a phase boundary on request
    Aborted { pending: Vec<String> },
}

impl RunStatus {
    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::PartialFailure { .. } => "partial_failure",
            RunStatus::Aborted { .. } => "aborted",
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::PartialFailure { .. } => 2,
            RunStatus::Aborted { .. } => 3,
        }
    }
}

/// Final state of one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub id: String,
    pub name: String,
    pub kind: PhaseKind,
    pub status: PhaseStatus,
    /// Attempts recorded across all runs of this session
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub phases: Vec<PhaseSummary>,
    /// Gates run during this invocation
    #[serde(default)]
    pub gate_reports: Vec<GateReport>,
    /// Every gate whose latest stored outcome is Blocked, whichever run blocked it
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_gates: Vec<GateBlockedError>,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }

    pub fn phase(&self, id: &str) -> Option<&PhaseSummary> {
        self.phases.iter().find(|p| p.id == id)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize run report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run report: {}", path.display()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read run report: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse run report: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn report(status: RunStatus) -> RunReport {
        RunReport {
            run_id: "r1".into(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            status,
            phases: vec![PhaseSummary {
                id: "01".into(),
                name: "Scaffold".into(),
                kind: PhaseKind::Subagent,
                status: PhaseStatus::Passed { overridden: false },
                attempts: 1,
                detail: String::new(),
            }],
            gate_reports: vec![],
            blocked_gates: vec![],
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunStatus::Success.exit_code(), 0);
        let partial = RunStatus::PartialFailure {
            blocked: vec!["03".into()],
            failed: vec![],
            skipped: vec!["04".into()],
        };
        assert_eq!(partial.exit_code(), 2);
        assert_eq!(RunStatus::Aborted { pending: vec![] }.exit_code(), 3);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("report.json");
        let original = report(RunStatus::Aborted {
            pending: vec!["02".into()],
        });
        original.save(&path).unwrap();

        let loaded = RunReport::load(&path).unwrap();
        assert_eq!(loaded, original);

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["status"]["status"], "aborted");
        assert_eq!(raw["phases"][0]["status"]["state"], "passed");
    }
}
