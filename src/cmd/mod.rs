//! CLI command implementations.
//!
//! | Module    | Commands handled                          |
//! |-----------|-------------------------------------------|
//! | `project` | `Init`, `Session`                         |
//! | `plan`    | `Validate`, `Split`, `Plan`               |
//! | `run`     | `Run`                                     |
//! | `session` | `Status`, `Abort`, `Override`             |
//! | `config`  | `Config`                                  |

pub mod config;
pub mod plan;
pub mod project;
pub mod run;
pub mod session;

pub use config::cmd_config;
pub use plan::{cmd_plan, cmd_split, cmd_validate};
pub use project::{cmd_init, cmd_session};
pub use run::cmd_run;
pub use session::{cmd_abort, cmd_override, cmd_status};

use anyhow::Result;
use phasegate::config::Config;
use phasegate::executor::CommandExecutor;
use phasegate::orchestrator::Orchestrator;
use phasegate::session::SessionLayout;
use std::path::Path;
use std::sync::Arc;

/// Orchestrator for a session with `phasegate.toml` applied, without running it.
fn session_orchestrator(
    config: &Config,
    session: Option<&str>,
) -> Result<(SessionLayout, Orchestrator)> {
    let layout = config.resolve_session(session)?;
    let toml = &config.settings.toml;
    let executor = CommandExecutor::new(&config.project_dir)
        .with_thresholds(toml.similarity)
        .with_repair_command(toml.commands.repair.clone());
    let orchestrator = Orchestrator::for_session(&layout, Arc::new(executor))?.with_config(toml);
    Ok((layout, orchestrator))
}

fn load_config(project_dir: &Path) -> Result<Config> {
    let config = Config::new(project_dir.to_path_buf(), false)?;
    for warning in &config.settings.env_warnings {
        tracing::warn!("{}", warning);
    }
    Ok(config)
}
