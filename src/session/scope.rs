//! Scope enforcement: which files a session may touch.

use anyhow::{Context, Result};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Session files are always writable.
const ALWAYS_ALLOWED: &str = ".phasegate/sessions/**/*";

/// Contents of `scope.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopeFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    #[serde(default, alias = "allowedPaths")]
    pub allowed_paths: Vec<String>,
    #[serde(default)]
    pub exceptions: Vec<String>,
}

/// Result of checking a file list against a scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScopeCheck {
    pub valid: Vec<String>,
    pub violations: Vec<String>,
}

impl ScopeCheck {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }
}

/// Compiled allow-list.
#[derive(Debug, Clone)]
pub struct ScopePolicy {
    patterns: Vec<Pattern>,
}

impl ScopePolicy {
    /// Load and compile `scope.json`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scope file: {}", path.display()))?;
        let file: ScopeFile = serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in scope file: {}", path.display()))?;
        Self::from_file(&file)
    }

    /// Load `scope.json` if present. A session without one is unrestricted.
    pub fn load_optional(path: &Path) -> Result<Option<Self>> {
        if path.exists() {
            Self::load(path).map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn from_file(file: &ScopeFile) -> Result<Self> {
        let patterns = std::iter::once(ALWAYS_ALLOWED)
            .chain(file.allowed_paths.iter().map(String::as_str))
            .chain(file.exceptions.iter().map(String::as_str))
            .map(|p| {
                Pattern::new(&p.replace('\\', "/"))
                    .with_context(|| format!("Invalid scope pattern: {}", p))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn allows(&self, file: &str) -> bool {
        let file = file.trim().replace('\\', "/");
        let file = file.trim_start_matches("./");
        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: false,
            require_literal_leading_dot: false,
        };
        self.patterns.iter().any(|p| p.matches_with(file, options))
    }

    /// Split `files` into those inside and outside the scope. Blank entries are ignored.
    pub fn check(&self, files: &[String]) -> ScopeCheck {
        let mut result = ScopeCheck::default();
        for file in files.iter().map(|f| f.trim()).filter(|f| !f.is_empty()) {
            if self.allows(file) {
                result.valid.push(file.to_string());
            } else {
                result.violations.push(file.to_string());
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn policy(allowed: &[&str], exceptions: &[&str]) -> ScopePolicy {
        ScopePolicy::from_file(&ScopeFile {
            session: None,
            allowed_paths: allowed.iter().map(|s| s.to_string()).collect(),
            exceptions: exceptions.iter().map(|s| s.to_string()).collect(),
        })
        .unwrap()
    }

    #[test]
    fn test_check_splits_valid_and_violations() {
        let scope = policy(&["core/**/*", "app/api/**/*"], &["package.json"]);
        let result = scope.check(&[
            "core/lib/x.ts".into(),
            "app/api/users/route.ts".into(),
            "package.json".into(),
            "contents/themes/x/a.css".into(),
            "  ".into(),
        ]);

        assert_eq!(
            result.valid,
            vec!["core/lib/x.ts", "app/api/users/route.ts", "package.json"]
        );
        assert_eq!(result.violations, vec!["contents/themes/x/a.css"]);
        assert!(!result.is_valid());
    }

    #[test]
    fn test_session_files_always_allowed() {
        let scope = policy(&[], &[]);
        assert!(scope.allows(".phasegate/sessions/2026-01-23-x-v1/progress.md"));
        assert!(!scope.allows("src/main.rs"));
    }

    #[test]
    fn test_leading_dot_slash_is_ignored() {
        let scope = policy(&["src/**/*"], &[]);
        assert!(scope.allows("./src/main.rs"));
    }

    #[test]
    fn test_load_accepts_camel_case_key() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scope.json");
        std::fs::write(&path, r#"{"allowedPaths": ["docs/*"], "exceptions": []}"#).unwrap();

        let scope = ScopePolicy::load(&path).unwrap();
        assert!(scope.allows("docs/readme.md"));
    }

    #[test]
    fn test_load_optional_missing_file() {
        let dir = tempdir().unwrap();
        assert!(
            ScopePolicy::load_optional(&dir.path().join("scope.json"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let file = ScopeFile {
            allowed_paths: vec!["src/[".into()],
            ..Default::default()
        };
        assert!(ScopePolicy::from_file(&file).is_err());
    }
}
