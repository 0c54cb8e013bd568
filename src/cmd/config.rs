//! Configuration view and validation commands: `phasegate config`.

use anyhow::{Context, Result};
use std::path::Path;

use super::super::ConfigCommands;

pub fn cmd_config(project_dir: &Path, command: Option<ConfigCommands>) -> Result<()> {
    use phasegate::init::get_state_dir;
    use phasegate::phasegate_config::{CONFIG_FILE, PhasegateConfig, PhasegateToml};

    let state_dir = get_state_dir(project_dir);
    let config_path = state_dir.join(CONFIG_FILE);

    match command {
        None | Some(ConfigCommands::Show) => {
            println!();
            println!("phasegate Configuration");
            println!("=======================");
            println!();

            if config_path.exists() {
                println!("Config file: {}", config_path.display());
            } else {
                println!("No phasegate.toml found at {}", config_path.display());
                println!("Using default configuration.");
            }
            println!();

            let config = PhasegateConfig::new(project_dir.to_path_buf())?;
            let rendered = toml::to_string_pretty(&config.toml)
                .context("Failed to render configuration")?;
            println!("Effective values (with env overrides):");
            println!();
            println!("{}", rendered.trim_end());
            println!();
            for warning in &config.env_warnings {
                println!("warning: {}", warning);
            }
            if !config_path.exists() {
                println!("Run 'phasegate config init' to create a phasegate.toml file.");
                println!();
            }
        }
        Some(ConfigCommands::Validate) => {
            println!();
            println!("Validating configuration...");
            println!();

            if !config_path.exists() {
                println!("No phasegate.toml found. Using defaults (valid).");
                return Ok(());
            }

            let toml = PhasegateToml::load(&config_path)?;
            let warnings = toml.validate();

            if warnings.is_empty() {
                println!("Configuration is valid.");
            } else {
                println!("Configuration warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
            println!();
        }
        Some(ConfigCommands::Init) => {
            if config_path.exists() {
                println!("phasegate.toml already exists at {}", config_path.display());
                println!("Delete it first if you want to recreate it.");
                return Ok(());
            }

            std::fs::create_dir_all(&state_dir).with_context(|| {
                format!("Failed to create directory: {}", state_dir.display())
            })?;
            PhasegateToml::default().save(&config_path)?;

            println!("Created phasegate.toml at {}", config_path.display());
            println!();
            println!("You can now customize:");
            println!("  - [defaults] max_retries, briefing_budget_bytes, max_parallel");
            println!("  - [retry] fix timeout and backoff");
            println!("  - [commands] fixer and repair commands");
            println!("  - [phases.overrides.\"pattern-*\"] for phase-specific settings");
            println!();
        }
    }

    Ok(())
}
