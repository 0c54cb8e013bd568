//! Failure classification for failing gate checks.
//!
//! The default classifier matches the check's message and actual value against
//! two regex signature lists. Anything unrecognised is treated as a bug in the
//! code under test, so no failure is ever dropped.

use super::check::{CheckResult, FailureClass};
use regex::{Regex, RegexBuilder};
use std::sync::LazyLock;

/// Decides the root cause family of a failing check.
pub trait FailureClassifier: Send + Sync {
    fn classify(&self, check: &CheckResult) -> FailureClass;
}

/// Default signatures for problems in the test artifacts themselves.
pub const DEFAULT_ARTIFACT_SIGNATURES: &[&str] = &[
    r"selector .* not found",
    r"element not found",
    r"unable to find element",
    r"expected to find element",
    r"stale (fixture|element|snapshot)",
    r"fixture .* (missing|not found)",
    r"syntax ?error.*\.(spec|test|cy)\.",
    r"cannot find module .*\.(spec|test|cy)\.",
    r"obsolete snapshot",
];

/// Default signatures for environment faults.
pub const DEFAULT_INFRA_SIGNATURES: &[&str] = &[
    r"ECONNREFUSED",
    r"ECONNRESET",
    r"ENOTFOUND",
    r"EAI_AGAIN",
    r"timed? ?out (while )?connecting",
    r"connection (refused|reset)",
    r"\b50[234]\b",
    r"bad gateway",
    r"service unavailable",
    r"getaddrinfo",
    r"\bDNS\b",
];

static DEFAULT_CLASSIFIER: LazyLock<SignatureClassifier> = LazyLock::new(|| {
    let compile = |sigs: &[&str]| {
        sigs.iter()
            .filter_map(|s| RegexBuilder::new(s).case_insensitive(true).build().ok())
            .collect()
    };
    SignatureClassifier {
        artifact: compile(DEFAULT_ARTIFACT_SIGNATURES),
        infrastructure: compile(DEFAULT_INFRA_SIGNATURES),
    }
});

/// Regex-signature classifier.
#[derive(Debug, Clone)]
pub struct SignatureClassifier {
    artifact: Vec<Regex>,
    infrastructure: Vec<Regex>,
}

impl Default for SignatureClassifier {
    fn default() -> Self {
        DEFAULT_CLASSIFIER.clone()
    }
}

impl SignatureClassifier {
    /// Build from custom pattern lists (case-insensitive).
    pub fn from_patterns(
        artifact: &[String],
        infrastructure: &[String],
    ) -> Result<Self, regex::Error> {
        let compile = |sigs: &[String]| -> Result<Vec<Regex>, regex::Error> {
            sigs.iter()
                .map(|s| RegexBuilder::new(s).case_insensitive(true).build())
                .collect()
        };
        Ok(Self {
            artifact: compile(artifact)?,
            infrastructure: compile(infrastructure)?,
        })
    }

    /// Defaults plus extra patterns appended to each list.
    pub fn with_extra(
        artifact: &[String],
        infrastructure: &[String],
    ) -> Result<Self, regex::Error> {
        let extra = Self::from_patterns(artifact, infrastructure)?;
        let mut classifier = Self::default();
        classifier.artifact.extend(extra.artifact);
        classifier.infrastructure.extend(extra.infrastructure);
        Ok(classifier)
    }

    fn matches(patterns: &[Regex], text: &str) -> bool {
        patterns.iter().any(|re| re.is_match(text))
    }
}

impl FailureClassifier for SignatureClassifier {
    fn classify(&self, check: &CheckResult) -> FailureClass {
        if let Some(hint) = check.classification {
            return hint;
        }

        let mut text = check.detail.message.clone();
        if let Some(actual) = &check.detail.actual {
            text.push('\n');
            text.push_str(actual);
        }

        // Infrastructure first: a refused connection inside a spec file is still infra.
        if Self::matches(&self.infrastructure, &text) {
            FailureClass::Infrastructure
        } else if Self::matches(&self.artifact, &text) {
            FailureClass::TestArtifactIssue
        } else {
            FailureClass::SubjectBug
        }
    }
}
