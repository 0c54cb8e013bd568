//! Shell-command executor and fixer.
//!
//! Each phase's `command` runs through `sh -c` in the project directory with:
//! - `PHASEGATE_PHASE_ID`
//! - `PHASEGATE_ATTEMPT`
//! - `PHASEGATE_BRIEFING` (path to the briefing file, when there is one)
//!
//! Exit code conventions:
//! - `0` success
//! - `UNREACHABLE_EXIT_CODE` (69) the environment under test is down
//! - `SKIP_EXIT_CODE` (75) a conditional phase's condition did not hold
//! - anything else is a failure
//!
//! Gate commands print a JSON array of checks to stdout. A gate command
//! without one is turned into a single check from its exit status.

use super::{ExecutionContext, ExecutionReport, Executor, FixRequest, Fixer};
use crate::errors::ExecutorFault;
use crate::gates::{CheckDetail, CheckResult, SimilarityThresholds};
use crate::phase::{Phase, PhaseKind};
use crate::util::{extract_object_array, tail_lines};
use anyhow::{Context, bail};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{Output, Stdio};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// `EX_UNAVAILABLE` from sysexits.h.
pub const UNREACHABLE_EXIT_CODE: i32 = 69;
/// `EX_TEMPFAIL` from sysexits.h, reused as "condition not met".
pub const SKIP_EXIT_CODE: i32 = 75;

const TAIL: usize = 20;

async fn run_shell(
    command: &str,
    dir: &PathBuf,
    env: &[(&str, String)],
    stdin: Option<&[u8]>,
) -> std::io::Result<Output> {
    let mut cmd = Command::new("sh");
    cmd.arg("-c")
        .arg(command)
        .current_dir(dir)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut child = cmd.spawn()?;
    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input).await?;
        pipe.shutdown().await?;
    }
    child.wait_with_output().await
}

fn failure_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let tail = tail_lines(&stderr, TAIL);
    if tail.is_empty() {
        tail_lines(&stdout, TAIL)
    } else {
        tail
    }
}

/// Runs each phase's `command` in a shell.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    project_dir: PathBuf,
    /// Command run to repair a broken test artifact; receives the check on stdin
    repair_command: Option<String>,
    thresholds: SimilarityThresholds,
}

impl CommandExecutor {
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            repair_command: None,
            thresholds: SimilarityThresholds::default(),
        }
    }

    /// Bands applied to checks that report a `similarity` score instead of `passed`.
    pub fn with_thresholds(mut self, thresholds: SimilarityThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_repair_command(mut self, command: Option<String>) -> Self {
        self.repair_command = command;
        self
    }

    fn parse_check(&self, value: serde_json::Value) -> serde_json::Result<CheckResult> {
        let score = value.get("similarity").and_then(|v| v.as_f64());
        match score {
            Some(score) if value.get("passed").is_none() => {
                let id = ["check_id", "id", "name"]
                    .iter()
                    .find_map(|k| value.get(*k).and_then(|v| v.as_str()))
                    .unwrap_or("similarity");
                Ok(CheckResult::from_similarity(id, score, &self.thresholds))
            }
            _ => serde_json::from_value(value),
        }
    }

    fn gate_report(&self, phase: &Phase, output: &Output) -> Result<ExecutionReport, ExecutorFault> {
        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(values) = extract_object_array(&stdout) {
            let checks = values
                .into_iter()
                .map(|v| self.parse_check(v))
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| {
                    ExecutorFault::InvalidOutput(format!("check array for phase {}: {}", phase.id, e))
                })?;
            return Ok(ExecutionReport::Checks(checks));
        }

        let check = if output.status.success() {
            CheckResult::passing(&phase.id)
        } else {
            CheckResult::failing(&phase.id, &failure_text(output))
                .at(phase.command.as_deref().unwrap_or_default())
        };
        Ok(ExecutionReport::Checks(vec![check]))
    }
}

#[async_trait]
impl Executor for CommandExecutor {
    async fn execute(
        &self,
        phase: &Phase,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionReport, ExecutorFault> {
        let Some(command) = phase.command.as_deref() else {
            if phase.kind == PhaseKind::Orchestrator {
                return Ok(ExecutionReport::Completed {
                    detail: "handled by the orchestrator".to_string(),
                });
            }
            return Err(ExecutorFault::Other(anyhow::anyhow!(
                "phase {} ({}) has no command",
                phase.id,
                phase.kind
            )));
        };

        let mut env = vec![
            ("PHASEGATE_PHASE_ID", phase.id.clone()),
            ("PHASEGATE_ATTEMPT", ctx.attempt.to_string()),
        ];
        if let Some(path) = &ctx.briefing_path {
            env.push(("PHASEGATE_BRIEFING", path.display().to_string()));
        }

        tracing::debug!(phase = %phase.id, attempt = ctx.attempt, command, "Spawning phase command");
        let output = run_shell(command, &self.project_dir, &env, None)
            .await
            .map_err(ExecutorFault::SpawnFailed)?;
        let code = output.status.code().unwrap_or(-1);
        tracing::debug!(phase = %phase.id, exit_code = code, "Phase command finished");

        if code == UNREACHABLE_EXIT_CODE {
            return Err(ExecutorFault::Unreachable(failure_text(&output)));
        }
        if phase.kind.is_gate() {
            return self.gate_report(phase, &output);
        }
        if code == SKIP_EXIT_CODE && phase.kind == PhaseKind::Conditional {
            return Ok(ExecutionReport::Skipped {
                reason: tail_lines(&String::from_utf8_lossy(&output.stdout), 1),
            });
        }
        if output.status.success() {
            Ok(ExecutionReport::Completed {
                detail: tail_lines(&String::from_utf8_lossy(&output.stdout), 1),
            })
        } else {
            Ok(ExecutionReport::Failed {
                detail: format!("exit code {}: {}", code, failure_text(&output)),
            })
        }
    }

    async fn repair(&self, phase: &Phase, check: &CheckDetail) -> Result<(), ExecutorFault> {
        let Some(command) = self.repair_command.as_deref() else {
            tracing::debug!(phase = %phase.id, check = %check.check_id, "No repair command configured");
            return Ok(());
        };

        let payload = serde_json::to_vec(check)
            .map_err(|e| ExecutorFault::InvalidOutput(e.to_string()))?;
        let env = [
            ("PHASEGATE_PHASE_ID", phase.id.clone()),
            ("PHASEGATE_CHECK_ID", check.check_id.clone()),
        ];
        let output = run_shell(command, &self.project_dir, &env, Some(&payload))
            .await
            .map_err(ExecutorFault::SpawnFailed)?;
        if !output.status.success() {
            return Err(ExecutorFault::Other(anyhow::anyhow!(
                "repair command failed for check {}: {}",
                check.check_id,
                failure_text(&output)
            )));
        }
        Ok(())
    }
}

/// Pipes each `FixRequest` as JSON into a shell command's stdin.
#[derive(Debug, Clone)]
pub struct CommandFixer {
    command: String,
    project_dir: PathBuf,
}

impl CommandFixer {
    pub fn new(command: &str, project_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.to_string(),
            project_dir: project_dir.into(),
        }
    }
}

#[async_trait]
impl Fixer for CommandFixer {
    async fn fix(&self, request: &FixRequest) -> anyhow::Result<()> {
        let payload = serde_json::to_vec(request).context("Failed to serialize fix request")?;
        let env = [
            ("PHASEGATE_PHASE_ID", request.phase_id.clone()),
            ("PHASEGATE_ATTEMPT", request.attempt.to_string()),
        ];
        let output = run_shell(&self.command, &self.project_dir, &env, Some(&payload))
            .await
            .with_context(|| format!("Failed to spawn fixer command: {}", self.command))?;
        if !output.status.success() {
            bail!(
                "Fixer exited with {}: {}",
                output.status.code().unwrap_or(-1),
                failure_text(&output)
            );
        }
        Ok(())
    }
}
