//! `phasegate init`: create the per-project state directory.
//!
//! ```text
//! .phasegate/
//! ├── phasegate.toml   # project configuration (defaults written on init)
//! ├── sessions/        # one folder per workflow session
//! └── logs/            # daily-rotated JSON logs
//! ```

use crate::config::STATE_DIR;
use crate::phasegate_config::{CONFIG_FILE, PhasegateToml};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct InitResult {
    pub state_dir: PathBuf,
    /// False when the directory already existed and was only completed
    pub created: bool,
    pub wrote_config: bool,
}

/// Initialize phasegate in `project_dir`. Safe to run again; existing files are kept.
pub fn init_project(project_dir: &Path) -> Result<InitResult> {
    let state_dir = get_state_dir(project_dir);
    let created = !state_dir.exists();

    for dir in [
        state_dir.clone(),
        state_dir.join("sessions"),
        state_dir.join("logs"),
    ] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    }

    let config_path = state_dir.join(CONFIG_FILE);
    let wrote_config = if config_path.exists() {
        false
    } else {
        PhasegateToml::default().save(&config_path)?;
        true
    };

    tracing::info!(dir = %state_dir.display(), created, "Project initialized");
    Ok(InitResult {
        state_dir,
        created,
        wrote_config,
    })
}

pub fn is_initialized(project_dir: &Path) -> bool {
    get_state_dir(project_dir).is_dir()
}

pub fn get_state_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(STATE_DIR)
}
