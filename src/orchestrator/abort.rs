//! Cooperative abort, observed only between phases.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared abort flag, optionally backed by a marker file so another process
/// (`phasegate abort`) can stop a running workflow.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    flag: Arc<AtomicBool>,
    file: Option<PathBuf>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also treat the existence of `file` as an abort request.
    pub fn watching(file: impl Into<PathBuf>) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            file: Some(file.into()),
        }
    }

    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.file.as_ref().is_some_and(|f| f.exists())
    }

    /// Reset the flag and remove a stale marker file.
    pub fn clear(&self) -> Result<()> {
        self.flag.store(false, Ordering::SeqCst);
        if let Some(file) = &self.file
            && file.exists()
        {
            std::fs::remove_file(file)
                .with_context(|| format!("Failed to remove abort file: {}", file.display()))?;
        }
        Ok(())
    }

    /// Write the marker file a watching handle looks for.
    pub fn request(file: &Path) -> Result<()> {
        std::fs::write(file, chrono::Utc::now().to_rfc3339())
            .with_context(|| format!("Failed to write abort file: {}", file.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_flag_is_shared_between_clones() {
        let handle = AbortHandle::new();
        let other = handle.clone();
        assert!(!other.is_aborted());
        handle.abort();
        assert!(other.is_aborted());
    }

    #[test]
    fn test_marker_file_aborts_and_clear_removes_it() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("ABORT");
        let handle = AbortHandle::watching(&file);
        assert!(!handle.is_aborted());

        AbortHandle::request(&file).unwrap();
        assert!(handle.is_aborted());

        handle.clear().unwrap();
        assert!(!file.exists());
        assert!(!handle.is_aborted());
    }
}
