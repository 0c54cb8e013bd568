//! Project and session setup: `phasegate init`, `phasegate session`.

use anyhow::{Context, Result};
use console::style;
use glob::glob;
use std::path::Path;

use super::super::SessionCommands;
use super::load_config;

pub fn cmd_init(project_dir: &Path) -> Result<()> {
    use phasegate::init::init_project;

    let result = init_project(project_dir)?;

    if result.created {
        println!(
            "Initialized phasegate project at {}",
            result.state_dir.display()
        );
        println!();
        println!("Created directory structure:");
        println!("  .phasegate/");
        println!("  ├── phasegate.toml  # configuration (use `phasegate config show`)");
        println!("  ├── sessions/       # workflow sessions");
        println!("  └── logs/           # run logs");
        println!();
        println!("Next steps:");
        println!("  1. Run `phasegate session new --name <name>` to create a session");
        println!("  2. Fill in plan.md and phases.json in the session folder");
        println!("  3. Run `phasegate validate`, then `phasegate run`");
    } else {
        println!(
            "phasegate project already initialized at {}",
            result.state_dir.display()
        );
        if result.wrote_config {
            println!("Wrote missing phasegate.toml.");
        }
        println!("Directory structure verified.");
    }

    Ok(())
}

pub fn cmd_session(project_dir: &Path, command: SessionCommands) -> Result<()> {
    use phasegate::session::create_session;

    let config = load_config(project_dir)?;
    config.ensure_directories()?;

    match command {
        SessionCommands::New { name, version } => {
            let layout = create_session(&config.sessions_dir, &name, version)?;
            println!(
                "{} Created session {}",
                style("✓").green(),
                style(layout.name()).bold()
            );
            println!("  {}", layout.root().display());
            println!();
            println!("Edit plan.md and phases.json, then run `phasegate validate`.");
        }
        SessionCommands::List => {
            let pattern = config.sessions_dir.join("*").to_string_lossy().to_string();
            let mut names: Vec<String> = glob(&pattern)
                .context("Failed to read glob pattern")?
                .filter_map(|entry| entry.ok())
                .filter(|p| p.is_dir())
                .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
                .collect();
            names.sort();

            if names.is_empty() {
                println!("No sessions yet. Create one with `phasegate session new --name <name>`.");
            }
            for name in names {
                println!("{}", name);
            }
        }
    }

    Ok(())
}
