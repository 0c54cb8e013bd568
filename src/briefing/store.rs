//! On-disk briefing artifacts.
//!
//! Layout under the briefings directory:
//! - `phase-<id>.md`: the briefing content, verbatim
//! - `index.json`: manifest of ids, files, sizes and hashes
//!
//! Writes are hash-stable: a file whose content already matches is left alone
//! (its mtime does not change). Changed files are replaced atomically through a
//! temp file and rename. Briefings for phases no longer in the plan are removed.

use super::splitter::{PhaseBriefing, SplitResult, content_hash};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BriefingIndexEntry {
    pub phase_id: String,
    pub file: String,
    pub size_bytes: usize,
    pub content_hash: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BriefingIndex {
    pub briefings: Vec<BriefingIndexEntry>,
}

/// What a `write_all` call changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub written: Vec<String>,
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BriefingStore {
    dir: PathBuf,
}

impl BriefingStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(phase_id: &str) -> String {
        format!("phase-{}.md", phase_id)
    }

    pub fn path_for(&self, phase_id: &str) -> PathBuf {
        self.dir.join(Self::file_name(phase_id))
    }

    /// Persist every briefing in `split`, replacing the previous plan version.
    pub fn write_all(&self, split: &SplitResult) -> Result<WriteSummary> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!("Failed to create briefings directory: {}", self.dir.display())
        })?;

        let mut summary = WriteSummary::default();
        let mut index = BriefingIndex::default();

        for (id, briefing) in &split.briefings {
            let path = self.path_for(id);
            if write_if_changed(&path, &briefing.content, &briefing.content_hash)? {
                tracing::debug!(phase = %id, path = %path.display(), "Briefing written");
                summary.written.push(id.clone());
            } else {
                summary.unchanged.push(id.clone());
            }
            index.briefings.push(BriefingIndexEntry {
                phase_id: id.clone(),
                file: Self::file_name(id),
                size_bytes: briefing.size_bytes,
                content_hash: briefing.content_hash.clone(),
            });
        }

        summary.removed = self.remove_stale(split)?;

        let index_json =
            serde_json::to_string_pretty(&index).context("Failed to serialize briefing index")?;
        write_if_changed(
            &self.dir.join(INDEX_FILE),
            &index_json,
            &content_hash(&index_json),
        )?;

        tracing::info!(
            written = summary.written.len(),
            unchanged = summary.unchanged.len(),
            removed = summary.removed.len(),
            "Briefings persisted"
        );
        Ok(summary)
    }

    fn remove_stale(&self, split: &SplitResult) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = name
                .strip_prefix("phase-")
                .and_then(|rest| rest.strip_suffix(".md"))
            else {
                continue;
            };
            if !split.briefings.contains_key(id) {
                std::fs::remove_file(entry.path())
                    .with_context(|| format!("Failed to remove stale briefing {}", name))?;
                removed.push(id.to_string());
            }
        }
        removed.sort();
        Ok(removed)
    }

    /// Read a briefing back, rebuilding its structured views.
    pub fn load(&self, phase_id: &str) -> Result<Option<PhaseBriefing>> {
        let path = self.path_for(phase_id);
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read briefing: {}", path.display()))?;
        Ok(Some(PhaseBriefing::from_content(phase_id, &content)))
    }

    pub fn load_index(&self) -> Result<BriefingIndex> {
        let path = self.dir.join(INDEX_FILE);
        if !path.exists() {
            return Ok(BriefingIndex::default());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid {}", path.display()))
    }
}

/// Returns true when the file was (re)written.
fn write_if_changed(path: &Path, content: &str, hash: &str) -> Result<bool> {
    if let Ok(existing) = std::fs::read_to_string(path)
        && content_hash(&existing) == hash
    {
        return Ok(false);
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));
    std::fs::write(&tmp, content)
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(true)
}
