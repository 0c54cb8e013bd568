use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use phasegate::config::STATE_DIR;
use phasegate::logging::{LogOptions, init_tracing};
use std::path::{Path, PathBuf};

mod cmd;

#[derive(Parser)]
#[command(name = "phasegate")]
#[command(version, about = "Phase-gated workflow orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Emit logs on stderr as JSON lines
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create the .phasegate directory in the project
    Init,
    /// Create or list workflow sessions
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Validate the phase graph and the plan markers of a session
    Validate {
        /// Session name or path (defaults to the most recent session)
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Split the plan into per-phase briefings
    Split {
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Show the execution waves of the phase graph
    Plan {
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Run the workflow, resuming from recorded outcomes
    Run {
        #[arg(short, long)]
        session: Option<String>,

        /// Maximum concurrent phases (overrides phasegate.toml)
        #[arg(long, env = "PHASEGATE_MAX_PARALLEL")]
        max_parallel: Option<usize>,

        /// Command that receives fix requests as JSON on stdin
        #[arg(long, env = "PHASEGATE_FIXER_CMD")]
        fixer: Option<String>,

        /// UI output mode: full, minimal, json
        #[arg(long, default_value = "full")]
        ui: String,
    },
    /// Show the status of every phase in a session
    Status {
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Ask a running workflow to stop at the next phase boundary
    Abort {
        #[arg(short, long)]
        session: Option<String>,
    },
    /// Mark a phase as passed by hand, releasing its dependents
    Override {
        /// Phase id
        phase: String,

        #[arg(short, long)]
        session: Option<String>,

        /// Reason recorded with the override
        #[arg(short, long, default_value = "")]
        note: String,
    },
    /// View or validate configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum SessionCommands {
    /// Create a dated session folder with template documents
    New {
        #[arg(short, long)]
        name: String,

        #[arg(long, default_value = "1")]
        version: u32,
    },
    /// List existing sessions
    List,
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Validate configuration and show any warnings
    Validate,
    /// Initialize a default phasegate.toml file
    Init,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let state_dir = project_dir.join(STATE_DIR);
    let guard = init_tracing(&LogOptions {
        verbose: cli.verbose,
        json: cli.json_logs,
        log_dir: state_dir.is_dir().then(|| state_dir.join("logs")),
    })?;

    let code = execute(&cli, &project_dir).await?;
    if code != 0 {
        drop(guard);
        std::process::exit(code);
    }
    Ok(())
}

/// Run the selected command and return the process exit code.
async fn execute(cli: &Cli, project_dir: &Path) -> Result<i32> {
    match &cli.command {
        Commands::Run {
            session,
            max_parallel,
            fixer,
            ui,
        } => {
            return cmd::cmd_run(
                cli,
                project_dir,
                session.as_deref(),
                *max_parallel,
                fixer.clone(),
                ui,
            )
            .await;
        }
        Commands::Init => cmd::cmd_init(project_dir)?,
        Commands::Session { command } => cmd::cmd_session(project_dir, command.clone())?,
        Commands::Validate { session } => cmd::cmd_validate(project_dir, session.as_deref())?,
        Commands::Split { session } => cmd::cmd_split(project_dir, session.as_deref())?,
        Commands::Plan { session } => cmd::cmd_plan(project_dir, session.as_deref())?,
        Commands::Status { session } => cmd::cmd_status(project_dir, session.as_deref())?,
        Commands::Abort { session } => cmd::cmd_abort(project_dir, session.as_deref())?,
        Commands::Override {
            phase,
            session,
            note,
        } => cmd::cmd_override(project_dir, session.as_deref(), phase, note)?,
        Commands::Config { command } => cmd::cmd_config(project_dir, command.clone())?,
    }
    Ok(0)
}
