//! Inspecting and steering a session: `status`, `abort`, `override`.

use anyhow::{Result, bail};
use console::style;
use std::path::Path;

use super::{load_config, session_orchestrator};

pub fn cmd_status(project_dir: &Path, session: Option<&str>) -> Result<()> {
    use phasegate::dag::DagScheduler;
    use phasegate::orchestrator::RunReport;
    use phasegate::ui::render_statuses;

    let config = load_config(project_dir)?;
    let (layout, orchestrator) = session_orchestrator(&config, session)?;
    let scheduler = DagScheduler::from_phases(orchestrator.phases())?;
    let state = orchestrator.store().snapshot();

    println!();
    println!("Session: {}", style(layout.name()).bold());
    println!(
        "Completion: {:.1}%",
        scheduler.completion_percentage(&state)
    );
    println!();
    print!(
        "{}",
        render_statuses(orchestrator.phases(), &scheduler.statuses(&state))
    );

    if layout.abort_file().exists() {
        println!();
        println!("{}", style("Abort requested; the run stops at the next phase boundary.").yellow());
    }

    let report_path = layout.report();
    if report_path.exists() {
        match RunReport::load(&report_path) {
            Ok(report) => {
                println!();
                println!(
                    "Last run {} finished {}: {}",
                    report.run_id,
                    report.finished_at.format("%Y-%m-%d %H:%M:%S"),
                    report.status.label()
                );
            }
            Err(e) => tracing::warn!(error = %e, "Could not read last run report"),
        }
    }
    println!();
    Ok(())
}

pub fn cmd_abort(project_dir: &Path, session: Option<&str>) -> Result<()> {
    use phasegate::orchestrator::AbortHandle;

    let config = load_config(project_dir)?;
    let layout = config.resolve_session(session)?;
    AbortHandle::request(&layout.abort_file())?;

    println!(
        "Abort requested for {}. Running phases finish; nothing new starts.",
        style(layout.name()).bold()
    );
    Ok(())
}

pub fn cmd_override(
    project_dir: &Path,
    session: Option<&str>,
    phase_id: &str,
    note: &str,
) -> Result<()> {
    let config = load_config(project_dir)?;
    let (layout, orchestrator) = session_orchestrator(&config, session)?;

    if !orchestrator.phases().iter().any(|p| p.id == phase_id) {
        bail!("Phase '{}' not found in {}", phase_id, layout.phases_file().display());
    }

    let outcome = orchestrator.store().record_override(phase_id, note)?;
    println!(
        "{} Phase {} marked passed (attempt {}): {}",
        style("✓").green(),
        style(phase_id).bold(),
        outcome.attempt_number,
        outcome.detail
    );
    Ok(())
}
