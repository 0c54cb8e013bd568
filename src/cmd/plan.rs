//! Authoring checks: `phasegate validate`, `phasegate split`, `phasegate plan`.

use anyhow::Result;
use console::style;
use std::path::Path;

use super::{load_config, session_orchestrator};

pub fn cmd_validate(project_dir: &Path, session: Option<&str>) -> Result<()> {
    use phasegate::dag::validate;

    let config = load_config(project_dir)?;
    let (layout, orchestrator) = session_orchestrator(&config, session)?;

    validate(orchestrator.phases())?;
    let split = orchestrator.prepare()?;

    println!("Session: {}", style(layout.name()).bold());
    println!(
        "  {} phase(s), {} briefing(s)",
        orchestrator.phases().len(),
        split.briefings.len()
    );
    for warning in &split.warnings {
        println!("  {} {}", style("warning:").yellow(), warning);
    }
    println!("{} Phase graph and plan markers are valid.", style("✓").green());
    Ok(())
}

pub fn cmd_split(project_dir: &Path, session: Option<&str>) -> Result<()> {
    use phasegate::briefing::BriefingStore;

    let config = load_config(project_dir)?;
    let (layout, orchestrator) = session_orchestrator(&config, session)?;

    let split = orchestrator.prepare()?;
    let store = BriefingStore::new(layout.briefings_dir());
    let summary = store.write_all(&split)?;

    println!("Briefings in {}", store.dir().display());
    for (id, briefing) in &split.briefings {
        let state = if summary.written.contains(id) {
            style("written").green()
        } else {
            style("unchanged").dim()
        };
        println!(
            "  {} {:>6} bytes  {}",
            BriefingStore::file_name(id),
            briefing.size_bytes,
            state
        );
    }
    for id in &summary.removed {
        println!("  {} {}", BriefingStore::file_name(id), style("removed").red());
    }
    for warning in &split.warnings {
        println!("  {} {}", style("warning:").yellow(), warning);
    }
    Ok(())
}

pub fn cmd_plan(project_dir: &Path, session: Option<&str>) -> Result<()> {
    use phasegate::dag::DagScheduler;
    use phasegate::ui::render_waves;

    let config = load_config(project_dir)?;
    let (layout, orchestrator) = session_orchestrator(&config, session)?;
    let scheduler = DagScheduler::from_phases(orchestrator.phases())?;

    println!("Session: {}", style(layout.name()).bold());
    print!("{}", render_waves(&scheduler.compute_waves()));
    Ok(())
}
