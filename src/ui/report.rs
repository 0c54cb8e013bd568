//! Text rendering for `status`, `plan` and the end-of-run summary.

use crate::dag::PhaseStatus;
use crate::orchestrator::{RunReport, RunStatus};
use crate::phase::Phase;
use crate::ui::icons::{BLOCKED, CHECK, CROSS, RETRY, RUNNING, SKIPPED, STOP, WAVE};
use console::style;
use std::fmt::Write;

fn status_icon(status: &PhaseStatus) -> String {
    match status {
        PhaseStatus::Passed { .. } => CHECK.to_string(),
        PhaseStatus::Failed { .. } => CROSS.to_string(),
        PhaseStatus::Blocked { .. } => BLOCKED.to_string(),
        PhaseStatus::Skipped { .. } => SKIPPED.to_string(),
        PhaseStatus::Retrying { .. } => RETRY.to_string(),
        PhaseStatus::Ready => RUNNING.to_string(),
        PhaseStatus::Pending | PhaseStatus::Waiting { .. } => "  ".to_string(),
    }
}

fn status_note(status: &PhaseStatus) -> String {
    match status {
        PhaseStatus::Passed { overridden: true } => "overridden".to_string(),
        PhaseStatus::Waiting { waiting_on } => format!("waiting on {}", waiting_on.join(", ")),
        PhaseStatus::Retrying { attempts }
        | PhaseStatus::Failed { attempts }
        | PhaseStatus::Blocked { attempts } => format!("{} attempt(s)", attempts),
        PhaseStatus::Skipped { because_of } => format!("after {}", because_of),
        _ => String::new(),
    }
}

/// One line per phase, in id order.
pub fn render_statuses(phases: &[Phase], statuses: &[(String, PhaseStatus)]) -> String {
    let mut out = String::new();
    let width = phases.iter().map(|p| p.name.len()).max().unwrap_or(0);

    for (id, status) in statuses {
        let name = phases
            .iter()
            .find(|p| &p.id == id)
            .map(|p| p.name.as_str())
            .unwrap_or("");
        let _ = writeln!(
            out,
            "{}{} {:<width$}  {:<9} {}",
            status_icon(status),
            style(id).bold(),
            name,
            status.label(),
            style(status_note(status)).dim(),
            width = width
        );
    }
    out
}

/// Waves of phases that may run side by side.
pub fn render_waves(waves: &[Vec<String>]) -> String {
    let mut out = String::new();
    let total: usize = waves.iter().map(Vec::len).sum();
    let _ = writeln!(
        out,
        "{} phase(s) in {} wave(s)",
        style(total).yellow().bold(),
        style(waves.len()).yellow().bold()
    );

    for (i, wave) in waves.iter().enumerate() {
        let parallel = if wave.len() > 1 {
            format!(" {}", style("(parallel)").dim())
        } else {
            String::new()
        };
        let _ = writeln!(out, "  {}Wave {}: {}{}", WAVE, i, wave.join(", "), parallel);
    }
    out
}

/// End-of-run summary with the unresolved checks of every blocked gate.
pub fn render_report(report: &RunReport) -> String {
    let mut out = String::new();
    let passed = report.phases.iter().filter(|p| p.status.is_success()).count();
    let elapsed = report.finished_at - report.started_at;

    let headline = match &report.status {
        RunStatus::Success => style("SUCCESS").green().bold(),
        RunStatus::PartialFailure { .. } => style("PARTIAL FAILURE").red().bold(),
        RunStatus::Aborted { .. } => style("ABORTED").yellow().bold(),
    };
    let _ = writeln!(out, "Run {}: {}", report.run_id, headline);
    let _ = writeln!(
        out,
        "  {}/{} phase(s) passed in {:.1}s",
        passed,
        report.phases.len(),
        elapsed.num_milliseconds() as f64 / 1000.0
    );

    match &report.status {
        RunStatus::PartialFailure {
            blocked,
            failed,
            skipped,
        } => {
            for (label, ids) in [("blocked", blocked), ("failed", failed), ("skipped", skipped)] {
                if !ids.is_empty() {
                    let _ = writeln!(out, "  {}: {}", label, ids.join(", "));
                }
            }
        }
        RunStatus::Aborted { pending } => {
            let _ = writeln!(out, "  {}not started: {}", STOP, pending.join(", "));
        }
        RunStatus::Success => {}
    }

    for blocked in &report.blocked_gates {
        let _ = writeln!(
            out,
            "\n{}Gate {} blocked after {} attempt(s); unresolved checks:",
            BLOCKED, blocked.phase, blocked.attempts
        );
        for check in &blocked.unresolved {
            let _ = writeln!(out, "  - {}", check);
        }
    }

    for phase in &report.phases {
        if matches!(phase.status, PhaseStatus::Failed { .. }) && !phase.detail.is_empty() {
            let _ = writeln!(out, "\n{}Phase {} failed: {}", CROSS, phase.id, phase.detail);
        }
    }
    out
}
