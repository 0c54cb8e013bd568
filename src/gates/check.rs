//! Check results reported by gate executors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Root cause family for a failing check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// The test itself is wrong (stale selector, bad fixture). Repaired locally.
    TestArtifactIssue,
    /// The code under test is wrong. Delegated to the fixer.
    SubjectBug,
    /// The environment is down. Retried, never delegated.
    Infrastructure,
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureClass::TestArtifactIssue => write!(f, "test artifact issue"),
            FailureClass::SubjectBug => write!(f, "subject bug"),
            FailureClass::Infrastructure => write!(f, "infrastructure"),
        }
    }
}

/// Everything a fixer needs to act on one failing check without extra context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckDetail {
    #[serde(alias = "id", alias = "name")]
    pub check_id: String,
    /// File and line, URL, or endpoint the check exercised
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
}

impl CheckDetail {
    pub fn new(check_id: &str, message: &str) -> Self {
        Self {
            check_id: check_id.to_string(),
            location: None,
            message: message.to_string(),
            expected: None,
            actual: None,
        }
    }

    pub fn at(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    pub fn expecting(mut self, expected: &str, actual: &str) -> Self {
        self.expected = Some(expected.to_string());
        self.actual = Some(actual.to_string());
        self
    }
}

impl fmt::Display for CheckDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.check_id)?;
        if let Some(location) = &self.location {
            write!(f, " at {}", location)?;
        }
        write!(f, ": {}", self.message)?;
        if let (Some(expected), Some(actual)) = (&self.expected, &self.actual) {
            write!(f, " (expected {}, got {})", expected, actual)?;
        }
        Ok(())
    }
}

/// Outcome of a single check within a gate attempt.
///
/// Executors print these as a JSON array, for example:
///
/// ```json
/// [{"check_id": "login", "passed": false, "message": "button missing",
///   "location": "e2e/login.cy.ts:14", "classification": "subject_bug"}]
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub passed: bool,
    #[serde(flatten)]
    pub detail: CheckDetail,
    /// Classification hint from the executor; wins over signature matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<FailureClass>,
    /// Informational remark on a passing check (e.g. a similarity warning)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl CheckResult {
    pub fn passing(check_id: &str) -> Self {
        Self {
            passed: true,
            detail: CheckDetail::new(check_id, ""),
            classification: None,
            note: None,
        }
    }

    pub fn failing(check_id: &str, message: &str) -> Self {
        Self {
            passed: false,
            detail: CheckDetail::new(check_id, message),
            classification: None,
            note: None,
        }
    }

    pub fn at(mut self, location: &str) -> Self {
        self.detail = self.detail.at(location);
        self
    }

    pub fn expecting(mut self, expected: &str, actual: &str) -> Self {
        self.detail = self.detail.expecting(expected, actual);
        self
    }

    pub fn classified(mut self, class: FailureClass) -> Self {
        self.classification = Some(class);
        self
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }

    pub fn check_id(&self) -> &str {
        &self.detail.check_id
    }
}
