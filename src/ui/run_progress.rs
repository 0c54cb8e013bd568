//! Live progress display for a workflow run.
//!
//! Consumes `RunEvent`s from the orchestrator's channel. Three output modes:
//! - `full`: a header bar for the whole run plus a spinner per active phase
//! - `minimal`: one line per settled phase
//! - `json`: each event as a JSON line on stdout

use crate::events::RunEvent;
use crate::session::OutcomeStatus;
use crate::ui::icons::{
    BLOCKED, CHECK, CROSS, RETRY, RUNNING, SKIPPED, SPARKLE, STOP, WARN, WRENCH,
};
use console::{Term, style};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    #[default]
    Full,
    Minimal,
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "minimal" => Self::Minimal,
            _ => Self::Full,
        })
    }
}

impl UiMode {
    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

fn header_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▓░")
}

fn phase_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("  {spinner:.cyan} {prefix:.bold} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Terminal UI for one run. Driven from a single task, so it owns its state.
pub struct RunUI {
    mode: UiMode,
    multi: MultiProgress,
    header: ProgressBar,
    bars: HashMap<String, ProgressBar>,
    verbose: bool,
    term: Term,
}

impl RunUI {
    pub fn new(total_phases: usize, mode: UiMode, verbose: bool) -> Self {
        let multi = MultiProgress::new();
        let header = if mode == UiMode::Full {
            let bar = multi.add(ProgressBar::new(total_phases as u64));
            bar.set_style(header_style());
            bar.set_prefix("RUN");
            bar.set_message("Starting...");
            bar
        } else {
            ProgressBar::hidden()
        };

        Self {
            mode,
            multi,
            header,
            bars: HashMap::new(),
            verbose,
            term: Term::stdout(),
        }
    }

    pub fn mode(&self) -> UiMode {
        self.mode
    }

    pub fn handle_event(&mut self, event: &RunEvent) {
        match self.mode {
            UiMode::Json => self.handle_json(event),
            UiMode::Minimal => self.handle_minimal(event),
            UiMode::Full => self.handle_full(event),
        }
    }

    fn handle_json(&self, event: &RunEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            let _ = writeln!(&self.term, "{}", json);
        }
    }

    fn handle_minimal(&self, event: &RunEvent) {
        match event {
            RunEvent::PhaseFinished {
                phase,
                status,
                detail,
                ..
            } => {
                let line = match status {
                    OutcomeStatus::Passed => format!("ok {}", phase),
                    OutcomeStatus::Failed => format!("failed {} ({})", phase, detail),
                    OutcomeStatus::Blocked => format!("blocked {} ({})", phase, detail),
                };
                let _ = writeln!(&self.term, "{}", line);
            }
            RunEvent::PhaseSkipped { phase, because_of } => {
                let _ = writeln!(&self.term, "skipped {} (after {})", phase, because_of);
            }
            RunEvent::Aborted { pending } => {
                let _ = writeln!(&self.term, "aborted, pending: {}", pending.join(", "));
            }
            RunEvent::RunFinished { status } => {
                let _ = writeln!(&self.term, "done: {}", status);
            }
            _ => {}
        }
    }

    fn handle_full(&mut self, event: &RunEvent) {
        match event {
            RunEvent::RunStarted { run_id, phases } => {
                self.header.set_length(*phases as u64);
                self.header.set_message(format!("run {}", short_id(run_id)));
            }
            RunEvent::PhaseStarted { phase, attempt } => self.on_phase_started(phase, *attempt),
            RunEvent::ChecksFailed {
                phase,
                attempt,
                failing,
                total,
            } => {
                self.set_phase_message(
                    phase,
                    format!(
                        "{}attempt {}: {}/{} checks failing",
                        RETRY,
                        attempt,
                        style(failing).red(),
                        total
                    ),
                );
            }
            RunEvent::RepairRequested { phase, check_id } => {
                self.set_phase_message(phase, format!("{}repairing {}", WRENCH, check_id));
            }
            RunEvent::FixDelegated {
                phase,
                check_id,
                detail,
                ..
            } => {
                self.set_phase_message(phase, format!("{}fixing {}", WRENCH, check_id));
                if self.verbose {
                    self.println(format!("    {}{}", WRENCH, style(detail).dim()));
                }
            }
            RunEvent::FixTimedOut { phase, check_id } => {
                self.println(format!(
                    "    {}Fix for {} in phase {} timed out",
                    WARN,
                    style(check_id).yellow(),
                    phase
                ));
            }
            RunEvent::InfrastructureFault { phase, message, .. } => {
                self.println(format!(
                    "    {}Infrastructure fault in phase {}: {}",
                    WARN,
                    style(phase).yellow(),
                    message
                ));
            }
            RunEvent::PhaseFinished {
                phase,
                attempt,
                status,
                detail,
            } => self.on_phase_finished(phase, *attempt, *status, detail),
            RunEvent::PhaseSkipped { phase, because_of } => {
                self.header.inc(1);
                self.println(format!(
                    "  {}Phase {} {} (after {})",
                    SKIPPED,
                    style(phase).dim(),
                    style("skipped").yellow(),
                    because_of
                ));
            }
            RunEvent::Aborted { pending } => {
                self.println(format!(
                    "{}Run {}; not started: {}",
                    STOP,
                    style("aborted").red().bold(),
                    pending.join(", ")
                ));
            }
            RunEvent::RunFinished { status } => self.on_run_finished(status),
        }
    }

    fn on_phase_started(&mut self, phase: &str, attempt: u32) {
        if let Some(bar) = self.bars.get(phase) {
            bar.set_message(format!("{}attempt {}", RUNNING, attempt));
            return;
        }

        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(phase_style());
        bar.set_prefix(format!("[{}]", phase));
        bar.set_message(format!("{}running", RUNNING));
        bar.enable_steady_tick(Duration::from_millis(100));
        self.bars.insert(phase.to_string(), bar);

        if self.verbose {
            self.println(format!(
                "  {} Phase {} started",
                style("▶").cyan(),
                style(phase).yellow()
            ));
        }
    }

    fn on_phase_finished(&mut self, phase: &str, attempt: u32, status: OutcomeStatus, detail: &str) {
        let (icon, word) = match status {
            OutcomeStatus::Passed => (CHECK, style("passed").green()),
            OutcomeStatus::Failed => (CROSS, style("failed").red()),
            OutcomeStatus::Blocked => (BLOCKED, style("blocked").red().bold()),
        };

        if let Some(bar) = self.bars.remove(phase) {
            bar.finish_and_clear();
        }
        self.header.inc(1);

        let attempts = if attempt > 1 {
            format!(" after {} attempts", attempt)
        } else {
            String::new()
        };
        if detail.is_empty() {
            self.println(format!("  {}Phase {} {}{}", icon, style(phase).bold(), word, attempts));
        } else {
            self.println(format!(
                "  {}Phase {} {}{}: {}",
                icon,
                style(phase).bold(),
                word,
                attempts,
                style(detail).dim()
            ));
        }
    }

    fn on_run_finished(&mut self, status: &str) {
        for (_, bar) in self.bars.drain() {
            bar.finish_and_clear();
        }
        self.header.finish_and_clear();

        self.println(String::new());
        if status == "success" {
            self.println(format!(
                "{}Run {} {}",
                SPARKLE,
                style("COMPLETE").green().bold(),
                SPARKLE
            ));
        } else {
            self.println(format!(
                "{}Run finished: {}",
                CROSS,
                style(status.to_uppercase()).red().bold()
            ));
        }
    }

    fn set_phase_message(&self, phase: &str, message: String) {
        if let Some(bar) = self.bars.get(phase) {
            bar.set_message(message);
        }
    }

    fn println(&self, line: String) {
        self.multi.println(line).ok();
    }
}

fn short_id(run_id: &str) -> &str {
    run_id.get(..8).unwrap_or(run_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ui_mode_parse() {
        assert_eq!(UiMode::parse("json"), UiMode::Json);
        assert_eq!(UiMode::parse("MINIMAL"), UiMode::Minimal);
        assert_eq!(UiMode::parse("full"), UiMode::Full);
        assert_eq!(UiMode::parse("anything"), UiMode::Full);
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_full_mode_tracks_phase_bars() {
        let mut ui = RunUI::new(2, UiMode::Full, false);
        ui.handle_event(&RunEvent::PhaseStarted {
            phase: "01".into(),
            attempt: 1,
        });
        ui.handle_event(&RunEvent::PhaseStarted {
            phase: "01".into(),
            attempt: 2,
        });
        assert_eq!(ui.bars.len(), 1);

        ui.handle_event(&RunEvent::PhaseFinished {
            phase: "01".into(),
            attempt: 2,
            status: OutcomeStatus::Passed,
            detail: String::new(),
        });
        assert!(ui.bars.is_empty());
        assert_eq!(ui.header.position(), 1);

        ui.handle_event(&RunEvent::PhaseSkipped {
            phase: "02".into(),
            because_of: "01".into(),
        });
        assert_eq!(ui.header.position(), 2);
    }

    #[test]
    fn test_run_finished_clears_bars() {
        let mut ui = RunUI::new(1, UiMode::Full, true);
        ui.handle_event(&RunEvent::PhaseStarted {
            phase: "01".into(),
            attempt: 1,
        });
        ui.handle_event(&RunEvent::RunFinished {
            status: "aborted".into(),
        });
        assert!(ui.bars.is_empty());
        assert!(ui.header.is_finished());
    }
}
