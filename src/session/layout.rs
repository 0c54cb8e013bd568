//! Session directory layout and creation.
//!
//! A session directory holds everything one workflow run reads and writes:
//!
//! ```text
//! <YYYY-MM-DD>-<name>-v<N>/
//! ├── requirements.md   # business requirements (human-authored)
//! ├── plan.md           # shared plan with PHASE markers
//! ├── phases.json       # phase graph
//! ├── progress.md       # running notes
//! ├── context.md
//! ├── tests.md
//! ├── pendings.md
//! ├── scope.json        # allowed paths for files_to_touch
//! ├── briefings/        # per-phase briefings, generated
//! ├── outcomes.jsonl    # append-only outcome log
//! ├── artifacts.jsonl   # artifact pointers
//! ├── report.json       # last run report
//! └── ABORT             # present = stop at the next phase boundary
//! ```

use crate::session::store::{ARTIFACTS_FILE, OUTCOMES_FILE};
use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

/// Paths inside one session directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    root: PathBuf,
}

impl SessionLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory name, e.g. `2026-01-23-user-auth-v1`.
    pub fn name(&self) -> String {
        self.root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn plan(&self) -> PathBuf {
        self.root.join("plan.md")
    }

    pub fn requirements(&self) -> PathBuf {
        self.root.join("requirements.md")
    }

    pub fn progress(&self) -> PathBuf {
        self.root.join("progress.md")
    }

    pub fn phases_file(&self) -> PathBuf {
        self.root.join("phases.json")
    }

    pub fn scope_file(&self) -> PathBuf {
        self.root.join("scope.json")
    }

    pub fn briefings_dir(&self) -> PathBuf {
        self.root.join("briefings")
    }

    pub fn outcomes_log(&self) -> PathBuf {
        self.root.join(OUTCOMES_FILE)
    }

    pub fn artifacts_log(&self) -> PathBuf {
        self.root.join(ARTIFACTS_FILE)
    }

    pub fn report(&self) -> PathBuf {
        self.root.join("report.json")
    }

    pub fn abort_file(&self) -> PathBuf {
        self.root.join("ABORT")
    }

    pub fn exists(&self) -> bool {
        self.root.is_dir()
    }
}

/// Normalise a free-form session name to kebab-case.
///
/// Lowercases, maps spaces and underscores to hyphens, drops anything that is
/// not alphanumeric or a hyphen, collapses repeated hyphens and trims them.
pub fn normalize_name(name: &str) -> Result<String> {
    let mut cleaned = String::with_capacity(name.len());
    for c in name.trim().to_lowercase().chars() {
        let c = if c == ' ' || c == '_' { '-' } else { c };
        if !(c.is_alphanumeric() || c == '-') {
            continue;
        }
        if c == '-' && cleaned.ends_with('-') {
            continue;
        }
        cleaned.push(c);
    }
    let cleaned = cleaned.trim_matches('-').to_string();

    if cleaned.is_empty() {
        bail!(
            "Invalid session name '{}'. It must contain alphanumeric characters.",
            name
        );
    }
    Ok(cleaned)
}

/// Create a session dated today under `sessions_dir`.
pub fn create_session(sessions_dir: &Path, name: &str, version: u32) -> Result<SessionLayout> {
    create_session_on(
        sessions_dir,
        name,
        version,
        chrono::Local::now().date_naive(),
    )
}

/// Create a session for an explicit date.
pub fn create_session_on(
    sessions_dir: &Path,
    name: &str,
    version: u32,
    date: NaiveDate,
) -> Result<SessionLayout> {
    if version < 1 {
        bail!("Session version must be a positive integer, got {}", version);
    }

    let slug = normalize_name(name)?;
    let date_str = date.format("%Y-%m-%d").to_string();
    let session_name = format!("{}-{}-v{}", date_str, slug, version);
    let layout = SessionLayout::new(sessions_dir.join(&session_name));

    if layout.exists() {
        bail!(
            "Session already exists: {}\nHint: use --version {} to create a new version",
            layout.root().display(),
            version + 1
        );
    }

    std::fs::create_dir_all(layout.briefings_dir()).with_context(|| {
        format!(
            "Failed to create session directory: {}",
            layout.root().display()
        )
    })?;

    let title = title_case(name);
    for (file, template) in TEMPLATES {
        let content = template
            .replace("{{date}}", &date_str)
            .replace("{{title}}", &title)
            .replace("{{slug}}", &slug)
            .replace("{{session}}", &session_name);
        let path = layout.root().join(file);
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    tracing::info!(session = %session_name, "Session created");
    Ok(layout)
}

fn title_case(name: &str) -> String {
    name.split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

const TEMPLATES: &[(&str, &str)] = &[
    (
        "requirements.md",
        "# Requirements: {{title}}\n\nSession: {{session}}\nDate: {{date}}\n\n## Business Requirements\n\n- \n\n## Acceptance Criteria\n\n- \n",
    ),
    (
        "plan.md",
        "# Plan: {{title}}\n\nEach phase section below is cut out verbatim into its own briefing.\n\n<!-- PHASE:01 START -->\n## Objective\n\nDescribe what phase 01 must achieve.\n\n## Relevant Items\n\n- \n\n## Files to Touch\n\n- \n<!-- PHASE:01 END -->\n",
    ),
    (
        "phases.json",
        "{\n  \"generated_at\": \"{{date}}\",\n  \"phases\": [\n    { \"id\": \"01\", \"name\": \"Implementation\", \"kind\": \"subagent\" }\n  ]\n}\n",
    ),
    (
        "progress.md",
        "# Progress: {{title}}\n\n| Phase | Status | Notes |\n|-------|--------|-------|\n",
    ),
    ("context.md", "# Context: {{title}}\n\n"),
    ("tests.md", "# Tests: {{title}}\n\n"),
    ("pendings.md", "# Pending Items: {{title}}\n\n"),
    (
        "scope.json",
        "{\n  \"session\": \"{{session}}\",\n  \"date\": \"{{date}}\",\n  \"allowed_paths\": [\"**/*\"],\n  \"exceptions\": []\n}\n",
    ),
];
