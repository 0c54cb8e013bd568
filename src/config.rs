use anyhow::{Context, Result, anyhow, bail};
use glob::glob;
use std::path::{Path, PathBuf};

use crate::phasegate_config::PhasegateConfig;
use crate::session::SessionLayout;

/// Per-project state directory.
pub const STATE_DIR: &str = ".phasegate";

/// Runtime configuration for the CLI.
///
/// Bridges the layered `PhasegateConfig` with the paths the commands need
/// and resolves which session a command operates on.
#[derive(Debug, Clone)]
pub struct Config {
    pub project_dir: PathBuf,
    pub state_dir: PathBuf,
    pub sessions_dir: PathBuf,
    pub log_dir: PathBuf,
    pub verbose: bool,
    pub settings: PhasegateConfig,
}

impl Config {
    pub fn new(project_dir: PathBuf, verbose: bool) -> Result<Self> {
        Self::with_overrides(project_dir, verbose, None, None)
    }

    pub fn with_overrides(
        project_dir: PathBuf,
        verbose: bool,
        max_parallel: Option<usize>,
        fixer: Option<String>,
    ) -> Result<Self> {
        let settings = PhasegateConfig::with_cli_args(project_dir, verbose, max_parallel, fixer)?;
        let project_dir = settings.project_dir.clone();
        let state_dir = settings.state_dir.clone();

        Ok(Self {
            sessions_dir: state_dir.join("sessions"),
            log_dir: state_dir.join("logs"),
            project_dir,
            state_dir,
            verbose,
            settings,
        })
    }

    pub fn ensure_directories(&self) -> Result<()> {
        std::fs::create_dir_all(&self.sessions_dir)
            .context("Failed to create sessions directory")?;
        std::fs::create_dir_all(&self.log_dir).context("Failed to create log directory")?;
        Ok(())
    }

    /// Resolve the session a command operates on.
    ///
    /// An explicit name is looked up under the sessions directory, then as a
    /// path. Without one, the most recently modified session is used.
    pub fn resolve_session(&self, name: Option<&str>) -> Result<SessionLayout> {
        match name {
            Some(name) => {
                let under_sessions = self.sessions_dir.join(name);
                if under_sessions.is_dir() {
                    return Ok(SessionLayout::new(under_sessions));
                }
                let as_path = Path::new(name);
                if as_path.is_dir() {
                    return Ok(SessionLayout::new(
                        as_path
                            .canonicalize()
                            .context("Failed to resolve session directory")?,
                    ));
                }
                bail!(
                    "Session '{}' not found in {}",
                    name,
                    self.sessions_dir.display()
                )
            }
            None => self.latest_session().map(SessionLayout::new),
        }
    }

    /// Most recently modified session directory.
    fn latest_session(&self) -> Result<PathBuf> {
        let pattern = self.sessions_dir.join("*").to_string_lossy().to_string();

        let mut sessions: Vec<PathBuf> = glob(&pattern)
            .context("Failed to read glob pattern")?
            .filter_map(|entry| entry.ok())
            .filter(|p| p.is_dir())
            .collect();

        if sessions.is_empty() {
            return Err(anyhow!(
                "No session found. Create one with `phasegate session new --name <name>`"
            ));
        }

        // Most recent first
        sessions.sort_by(|a, b| {
            let a_time = a.metadata().and_then(|m| m.modified()).ok();
            let b_time = b.metadata().and_then(|m| m.modified()).ok();
            b_time.cmp(&a_time).then_with(|| b.cmp(a))
        });

        Ok(sessions.remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_paths_live_in_state_dir() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), true).unwrap();
        let root = dir.path().canonicalize().unwrap();
        assert!(config.verbose);
        assert_eq!(config.state_dir, root.join(".phasegate"));
        assert_eq!(config.sessions_dir, root.join(".phasegate/sessions"));
        assert_eq!(config.log_dir, root.join(".phasegate/logs"));
    }

    #[test]
    fn test_ensure_directories() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        config.ensure_directories().unwrap();
        assert!(config.sessions_dir.exists());
        assert!(config.log_dir.exists());
    }

    #[test]
    fn test_resolve_named_session() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        fs::create_dir_all(config.sessions_dir.join("2026-01-02-auth-v1")).unwrap();

        let layout = config.resolve_session(Some("2026-01-02-auth-v1")).unwrap();
        assert_eq!(layout.root(), config.sessions_dir.join("2026-01-02-auth-v1"));
    }

    #[test]
    fn test_resolve_unknown_session_errors() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        let err = config.resolve_session(Some("nope")).unwrap_err();
        assert!(err.to_string().contains("Session 'nope' not found"));
    }

    #[test]
    fn test_resolve_latest_session() {
        let dir = tempdir().unwrap();
        let config = Config::new(dir.path().to_path_buf(), false).unwrap();
        assert!(config.resolve_session(None).is_err());

        fs::create_dir_all(config.sessions_dir.join("2026-01-01-a-v1")).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        fs::create_dir_all(config.sessions_dir.join("2026-01-02-b-v1")).unwrap();

        let layout = config.resolve_session(None).unwrap();
        assert_eq!(layout.name(), "2026-01-02-b-v1");
    }
}
