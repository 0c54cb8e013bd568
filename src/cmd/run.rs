//! Workflow execution: `phasegate run`.

use anyhow::Result;
use console::Term;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::super::Cli;

/// Run a session to completion and return the process exit code.
pub async fn cmd_run(
    cli: &Cli,
    project_dir: &Path,
    session: Option<&str>,
    max_parallel: Option<usize>,
    fixer: Option<String>,
    ui: &str,
) -> Result<i32> {
    use phasegate::config::Config;
    use phasegate::events::EventSink;
    use phasegate::executor::{CommandExecutor, CommandFixer};
    use phasegate::gates::GateController;
    use phasegate::orchestrator::{AbortHandle, Orchestrator};
    use phasegate::ui::{RunUI, UiMode, render_report};

    let config = Config::with_overrides(project_dir.to_path_buf(), cli.verbose, max_parallel, fixer)?;
    config.ensure_directories()?;
    for warning in config.settings.validate() {
        tracing::warn!("{}", warning);
    }
    let layout = config.resolve_session(session)?;
    let toml = &config.settings.toml;

    let stale = AbortHandle::watching(layout.abort_file());
    if stale.is_aborted() {
        tracing::info!(session = %layout.name(), "Clearing abort request left by an earlier run");
        stale.clear()?;
    }

    let executor = CommandExecutor::new(&config.project_dir)
        .with_thresholds(toml.similarity)
        .with_repair_command(toml.commands.repair.clone());
    let controller = GateController::new(Arc::new(toml.classifier()?), config.settings.retry_policy());

    let mut orchestrator = Orchestrator::for_session(&layout, Arc::new(executor))?
        .with_config(toml)
        .with_controller(controller);
    if let Some(command) = &toml.commands.fixer {
        orchestrator =
            orchestrator.with_fixer(Arc::new(CommandFixer::new(command, &config.project_dir)));
    }

    // Bars are invisible off a terminal
    let mut mode = UiMode::parse(ui);
    if mode == UiMode::Full && !Term::stderr().is_term() {
        mode = UiMode::Minimal;
    }

    let (tx, mut rx) = mpsc::channel(256);
    let mut run_ui = RunUI::new(orchestrator.phases().len(), mode, cli.verbose);
    let ui_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            run_ui.handle_event(&event);
        }
    });
    let orchestrator = orchestrator.with_events(EventSink::new(tx));

    let abort = orchestrator.abort_handle();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping at the next phase boundary");
            abort.abort();
        }
    });

    tracing::info!(
        session = %layout.name(),
        run_id = %orchestrator.run_id(),
        "Running session"
    );
    let result = orchestrator.run().await;

    interrupt.abort();
    drop(orchestrator);
    ui_task.await.ok();

    let report = result?;
    if mode != UiMode::Json {
        print!("{}", render_report(&report));
    }
    Ok(report.status.exit_code())
}
