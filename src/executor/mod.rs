//! Seams to the outside world: whatever actually performs a phase, and
//! whatever fixes the code under test when a gate finds a bug.
//!
//! The orchestrator and gate controller only ever talk to these traits. The
//! `command` module provides shell-command adapters for the CLI.

pub mod command;

pub use command::{CommandExecutor, CommandFixer, SKIP_EXIT_CODE, UNREACHABLE_EXIT_CODE};

use crate::briefing::PhaseBriefing;
use crate::errors::ExecutorFault;
use crate::gates::{CheckDetail, CheckResult};
use crate::phase::Phase;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Inputs for one attempt at one phase.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    /// 1-based attempt number
    pub attempt: u32,
    pub briefing: Option<PhaseBriefing>,
    /// Where the briefing lives on disk, if persisted
    pub briefing_path: Option<PathBuf>,
}

impl ExecutionContext {
    pub fn attempt(attempt: u32) -> Self {
        Self {
            attempt,
            ..Self::default()
        }
    }

    pub fn with_briefing(mut self, briefing: Option<PhaseBriefing>, path: Option<PathBuf>) -> Self {
        self.briefing = briefing;
        self.briefing_path = path;
        self
    }
}

/// What an executor reports back for one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionReport {
    /// A plain step finished
    Completed { detail: String },
    /// A plain step did not finish
    Failed { detail: String },
    /// A conditional phase whose condition did not hold
    Skipped { reason: String },
    /// A gate's check results
    Checks(Vec<CheckResult>),
}

/// Performs phases.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        phase: &Phase,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionReport, ExecutorFault>;

    /// Fix a broken test artifact locally (stale selector, bad fixture).
    async fn repair(&self, _phase: &Phase, _check: &CheckDetail) -> Result<(), ExecutorFault> {
        Ok(())
    }
}

/// A self-contained request to fix one failing check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixRequest {
    pub phase_id: String,
    pub attempt: u32,
    pub check: CheckDetail,
}

/// Fixes the code under test.
#[async_trait]
pub trait Fixer: Send + Sync {
    async fn fix(&self, request: &FixRequest) -> anyhow::Result<()>;
}

/// Fixer that does nothing. Gates still retry, which helps with flaky checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopFixer;

#[async_trait]
impl Fixer for NoopFixer {
    async fn fix(&self, request: &FixRequest) -> anyhow::Result<()> {
        tracing::debug!(phase = %request.phase_id, check = %request.check.check_id, "No fixer configured");
        Ok(())
    }
}
