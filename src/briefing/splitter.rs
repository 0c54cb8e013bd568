//! Plan document splitting.
//!
//! A plan document marks each phase's section with a pair of HTML comments on
//! their own lines:
//!
//! ```text
//! <!-- PHASE:03 START -->
//! ## Objective
//! ...
//! <!-- PHASE:03 END -->
//! ```
//!
//! Splitting is pure: the same text and options always give the same
//! briefings, byte for byte. Any marker error fails the whole split.

use crate::errors::PlanValidationError;
use crate::phase::{DEFAULT_BRIEFING_BUDGET_BYTES, Phase};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

static MARKER_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*<!--\s*PHASE:([A-Za-z0-9._-]+)\s+(START|END)\s*-->\s*$").unwrap()
});

// Anything that looks like it wants to be a marker
static MARKER_PREFIX_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<!--\s*PHASE\s*:").unwrap());

static FENCE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^ {0,3}(`{3,}|~{3,})(.*)$").unwrap());

static HEADING_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^##\s+(.+?)\s*#*\s*$").unwrap());

/// Documents a briefing must never send its reader back to.
pub const DEFAULT_REFERENCE_DOCUMENTS: &[&str] = &[
    "plan.md",
    "requirements.md",
    "the plan",
    "the requirements document",
];

/// One marked section of the plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSection {
    pub phase_id: String,
    /// 1-based line of the START marker
    pub start_line: usize,
    /// 1-based line of the END marker
    pub end_line: usize,
    pub body: String,
}

/// A parsed plan: its marked sections in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlanDocument {
    pub sections: Vec<PhaseSection>,
}

/// Track fenced code blocks. Returns true when `line` opens, closes or sits
/// inside a fence; such lines are never markers.
fn fenced(fence: &mut Option<String>, line: &str) -> bool {
    let caps = FENCE_REGEX.captures(line);
    match (fence.as_deref(), caps) {
        (None, Some(caps)) => {
            *fence = Some(caps[1].to_string());
            true
        }
        (None, None) => false,
        (Some(opened), Some(caps)) => {
            // A closing fence repeats the opening character at least as often
            if caps[1].starts_with(opened) && caps[2].trim().is_empty() {
                *fence = None;
            }
            true
        }
        (Some(_), None) => true,
    }
}

impl PlanDocument {
    /// Scan `text` for marker pairs. Markers quoted inside fenced code blocks
    /// are body text.
    pub fn parse(text: &str) -> Result<Self, PlanValidationError> {
        let mut sections: Vec<PhaseSection> = Vec::new();
        let mut first_seen: HashMap<String, usize> = HashMap::new();
        // (phase id, start line, body so far)
        let mut open: Option<(String, usize, String)> = None;
        let mut fence: Option<String> = None;

        for (i, raw_line) in text.split_inclusive('\n').enumerate() {
            let line_no = i + 1;
            let line = raw_line.trim_end_matches(['\n', '\r']);

            if fenced(&mut fence, line) {
                if let Some((_, _, body)) = open.as_mut() {
                    body.push_str(raw_line);
                }
                continue;
            }

            let Some(caps) = MARKER_REGEX.captures(line) else {
                if MARKER_PREFIX_REGEX.is_match(line) {
                    return Err(PlanValidationError::MalformedMarker {
                        line: line_no,
                        message: format!("unrecognised marker syntax: {}", line.trim()),
                    });
                }
                if let Some((_, _, body)) = open.as_mut() {
                    body.push_str(raw_line);
                }
                continue;
            };

            let id = caps[1].to_string();
            match (&caps[2], open.take()) {
                ("START", None) => {
                    if let Some(&first_line) = first_seen.get(&id) {
                        return Err(PlanValidationError::DuplicatePhase {
                            phase: id,
                            first_line,
                            second_line: line_no,
                        });
                    }
                    first_seen.insert(id.clone(), line_no);
                    open = Some((id, line_no, String::new()));
                }
                ("START", Some((open_id, open_line, _))) => {
                    return Err(PlanValidationError::MalformedMarker {
                        line: line_no,
                        message: format!(
                            "START for phase {} nested inside phase {} (opened at line {})",
                            id, open_id, open_line
                        ),
                    });
                }
                (_, None) => {
                    return Err(PlanValidationError::MalformedMarker {
                        line: line_no,
                        message: format!("END for phase {} without a preceding START", id),
                    });
                }
                (_, Some((open_id, open_line, body))) => {
                    if open_id != id {
                        return Err(PlanValidationError::MalformedMarker {
                            line: line_no,
                            message: format!(
                                "END for phase {} does not match START for phase {} (line {})",
                                id, open_id, open_line
                            ),
                        });
                    }
                    sections.push(PhaseSection {
                        phase_id: id,
                        start_line: open_line,
                        end_line: line_no,
                        body: strip_one_newline(body),
                    });
                }
            }
        }

        if let Some((id, line, _)) = open {
            return Err(PlanValidationError::MalformedMarker {
                line,
                message: format!("START for phase {} has no matching END", id),
            });
        }

        Ok(Self { sections })
    }
}

fn strip_one_newline(mut body: String) -> String {
    if body.ends_with('\n') {
        body.pop();
        if body.ends_with('\r') {
            body.pop();
        }
    }
    body
}

/// Per-phase budgets and forward-reference settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitOptions {
    pub default_budget_bytes: usize,
    pub budgets: HashMap<String, usize>,
    pub reference_documents: Vec<String>,
}

impl Default for SplitOptions {
    fn default() -> Self {
        Self {
            default_budget_bytes: DEFAULT_BRIEFING_BUDGET_BYTES,
            budgets: HashMap::new(),
            reference_documents: DEFAULT_REFERENCE_DOCUMENTS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl SplitOptions {
    /// Take each phase's own budget.
    pub fn for_phases(phases: &[Phase]) -> Self {
        Self {
            budgets: phases
                .iter()
                .map(|p| (p.id.clone(), p.briefing_budget_bytes))
                .collect(),
            ..Self::default()
        }
    }

    pub fn with_reference_documents(mut self, documents: Vec<String>) -> Self {
        self.reference_documents = documents;
        self
    }

    pub fn budget_for(&self, phase_id: &str) -> usize {
        self.budgets
            .get(phase_id)
            .copied()
            .unwrap_or(self.default_budget_bytes)
    }

    fn reference_regex(&self) -> Option<Regex> {
        let names: Vec<String> = self
            .reference_documents
            .iter()
            .filter(|d| !d.trim().is_empty())
            .map(|d| regex::escape(d.trim()))
            .collect();
        if names.is_empty() {
            return None;
        }
        let pattern = format!(
            r"(?i)\b(?:see|refer(?:\s+back)?\s+to|consult|read|check|look\s+(?:at|in)|as\s+(?:described|defined|specified)\s+in|per)\b[^.\n]{{0,40}}?(?:{})(?:\W|$)",
            names.join("|")
        );
        Regex::new(&pattern).ok()
    }
}

/// Non-fatal findings of a split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BriefingWarning {
    OverBudget {
        phase_id: String,
        size_bytes: usize,
        budget_bytes: usize,
    },
}

impl std::fmt::Display for BriefingWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BriefingWarning::OverBudget {
                phase_id,
                size_bytes,
                budget_bytes,
            } => write!(
                f,
                "briefing for phase {} is {} bytes (budget {})",
                phase_id, size_bytes, budget_bytes
            ),
        }
    }
}

/// The slice of the plan one phase needs, plus structured views of it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseBriefing {
    pub phase_id: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<String>,
    #[serde(default)]
    pub relevant_items: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prerequisites_summary: Option<String>,
    #[serde(default)]
    pub files_to_touch: Vec<String>,
    pub size_bytes: usize,
    pub content_hash: String,
}

impl PhaseBriefing {
    /// Build a briefing from a section body.
    pub fn from_content(phase_id: &str, content: &str) -> Self {
        let headed = split_headings(content);
        let text_of = |names: &[&str]| -> Option<String> {
            headed
                .iter()
                .find(|(h, _)| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
                .map(|(_, body)| body.trim().to_string())
                .filter(|b| !b.is_empty())
        };
        let bullets_of = |names: &[&str]| -> Vec<String> {
            headed
                .iter()
                .filter(|(h, _)| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
                .flat_map(|(_, body)| bullets(body))
                .collect()
        };

        Self {
            phase_id: phase_id.to_string(),
            content: content.to_string(),
            objective: text_of(&["Objective"]),
            relevant_items: bullets_of(&["Relevant Items", "Acceptance Criteria", "Requirements"]),
            prerequisites_summary: text_of(&["Prerequisites"]),
            files_to_touch: bullets_of(&["Files", "Files to Touch"])
                .into_iter()
                .map(|f| f.trim_matches('`').to_string())
                .collect(),
            size_bytes: content.len(),
            content_hash: content_hash(content),
        }
    }
}

/// Hex sha256 of briefing content.
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Split a markdown body into (heading, body) pairs on level-2 headings.
fn split_headings(content: &str) -> Vec<(String, String)> {
    let mut sections: Vec<(String, String)> = Vec::new();
    for line in content.lines() {
        if let Some(caps) = HEADING_REGEX.captures(line) {
            sections.push((caps[1].to_string(), String::new()));
        } else if let Some((_, body)) = sections.last_mut() {
            body.push_str(line);
            body.push('\n');
        }
    }
    sections
}

fn bullets(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            ["- ", "* ", "+ "]
                .iter()
                .find_map(|m| trimmed.strip_prefix(*m))
                .map(|item| item.trim().to_string())
        })
        .filter(|item| !item.is_empty())
        .collect()
}

/// All briefings from one plan version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitResult {
    pub briefings: BTreeMap<String, PhaseBriefing>,
    pub warnings: Vec<BriefingWarning>,
}

impl SplitResult {
    pub fn get(&self, phase_id: &str) -> Option<&PhaseBriefing> {
        self.briefings.get(phase_id)
    }
}

/// Split a plan into per-phase briefings.
pub fn split(plan_text: &str, options: &SplitOptions) -> Result<SplitResult, PlanValidationError> {
    let document = PlanDocument::parse(plan_text)?;
    let reference = options.reference_regex();

    let mut result = SplitResult::default();
    for section in document.sections {
        if let Some(re) = &reference
            && let Some(m) = re.find(&section.body)
        {
            return Err(PlanValidationError::ForwardReference {
                phase: section.phase_id,
                excerpt: m.as_str().trim().to_string(),
            });
        }

        let briefing = PhaseBriefing::from_content(&section.phase_id, &section.body);
        let budget = options.budget_for(&section.phase_id);
        if briefing.size_bytes > budget {
            tracing::warn!(
                phase = %section.phase_id,
                size_bytes = briefing.size_bytes,
                budget_bytes = budget,
                "Briefing exceeds budget"
            );
            result.warnings.push(BriefingWarning::OverBudget {
                phase_id: section.phase_id.clone(),
                size_bytes: briefing.size_bytes,
                budget_bytes: budget,
            });
        }
        result.briefings.insert(section.phase_id, briefing);
    }

    tracing::debug!(
        briefings = result.briefings.len(),
        warnings = result.warnings.len(),
        "Plan split"
    );
    Ok(result)
}

/// Check that briefings line up with phase kinds.
///
/// Subagent, conditional and optional phases need exactly one briefing; gates
/// and orchestrator-handled phases must not have one; every briefing must
/// belong to a known phase.
pub fn validate_marker_contract(
    phases: &[Phase],
    split: &SplitResult,
) -> Result<(), PlanValidationError> {
    let mut sorted: Vec<&Phase> = phases.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    for phase in sorted {
        let has = split.briefings.contains_key(&phase.id);
        if phase.kind.needs_briefing() && !has {
            return Err(PlanValidationError::MarkerContract {
                phase: phase.id.clone(),
                message: format!("{} phase has no marker pair in the plan", phase.kind),
            });
        }
        if !phase.kind.needs_briefing() && has {
            return Err(PlanValidationError::MarkerContract {
                phase: phase.id.clone(),
                message: format!("{} phase must not have a briefing", phase.kind),
            });
        }
    }

    if let Some(unknown) = split
        .briefings
        .keys()
        .find(|id| !phases.iter().any(|p| &p.id == *id))
    {
        return Err(PlanValidationError::MarkerContract {
            phase: unknown.clone(),
            message: "briefing for a phase that does not exist".to_string(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseKind;
    use proptest::prelude::*;

    const PLAN: &str = "# Plan\n\nIntro text.\n\n<!-- PHASE:01 START -->\n## Objective\nBuild the login API.\n\n## Relevant Items\n- POST /login returns a token\n- Bad password returns 401\n\n## Prerequisites\nNone.\n\n## Files to Touch\n- `src/api/login.rs`\n- src/api/mod.rs\n<!-- PHASE:01 END -->\n\nBetween sections.\n\n<!-- PHASE:02 START -->\nWrite the UI.\n<!-- PHASE:02 END -->\n";

    #[test]
    fn test_split_extracts_bodies_verbatim() {
        let result = split(PLAN, &SplitOptions::default()).unwrap();

        assert_eq!(result.briefings.len(), 2);
        assert_eq!(result.get("02").unwrap().content, "Write the UI.");
        let first = result.get("01").unwrap();
        assert!(first.content.starts_with("## Objective\n"));
        assert!(first.content.ends_with("- src/api/mod.rs"));
        assert!(!first.content.contains("Intro text"));
        assert!(!first.content.contains("Between sections"));
    }

    #[test]
    fn test_structured_views() {
        let result = split(PLAN, &SplitOptions::default()).unwrap();
        let b = result.get("01").unwrap();

        assert_eq!(b.objective.as_deref(), Some("Build the login API."));
        assert_eq!(
            b.relevant_items,
            vec!["POST /login returns a token", "Bad password returns 401"]
        );
        assert_eq!(b.prerequisites_summary.as_deref(), Some("None."));
        assert_eq!(b.files_to_touch, vec!["src/api/login.rs", "src/api/mod.rs"]);
        assert_eq!(b.size_bytes, b.content.len());
        assert_eq!(b.content_hash.len(), 64);
    }

    #[test]
    fn test_unmatched_start_is_an_error() {
        let plan = "<!-- PHASE:01 START -->\nfine\n<!-- PHASE:01 END -->\n<!-- PHASE:02 START -->\nno end\n";
        let err = split(plan, &SplitOptions::default()).unwrap_err();
        assert_eq!(
            err,
            PlanValidationError::MalformedMarker {
                line: 4,
                message: "START for phase 02 has no matching END".into()
            }
        );
    }

    #[test]
    fn test_end_before_start() {
        let err = PlanDocument::parse("<!-- PHASE:01 END -->\n").unwrap_err();
        assert!(matches!(err, PlanValidationError::MalformedMarker { line: 1, .. }));
    }

    #[test]
    fn test_nested_start() {
        let plan = "<!-- PHASE:01 START -->\n<!-- PHASE:02 START -->\n";
        let err = PlanDocument::parse(plan).unwrap_err();
        assert!(err.to_string().contains("nested"));
    }

    #[test]
    fn test_end_id_mismatch() {
        let plan = "<!-- PHASE:01 START -->\nx\n<!-- PHASE:02 END -->\n";
        let err = PlanDocument::parse(plan).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_garbled_marker() {
        let plan = "<!-- PHASE:01 BEGIN -->\n";
        let err = PlanDocument::parse(plan).unwrap_err();
        assert!(matches!(err, PlanValidationError::MalformedMarker { line: 1, .. }));
    }

    #[test]
    fn test_duplicate_phase() {
        let plan = "<!-- PHASE:01 START -->\na\n<!-- PHASE:01 END -->\n<!-- PHASE:01 START -->\nb\n<!-- PHASE:01 END -->\n";
        let err = PlanDocument::parse(plan).unwrap_err();
        assert_eq!(
            err,
            PlanValidationError::DuplicatePhase {
                phase: "01".into(),
                first_line: 1,
                second_line: 4
            }
        );
    }

    #[test]
    fn test_markers_tolerate_whitespace_and_crlf() {
        let plan = "  <!--  PHASE:01   START -->  \r\nbody\r\n<!-- PHASE:01 END -->\r\n";
        let doc = PlanDocument::parse(plan).unwrap();
        assert_eq!(doc.sections[0].body, "body");
    }

    #[test]
    fn test_markers_inside_code_fences_are_body_text() {
        let plan = "# Plan\n\n```markdown\n<!-- PHASE:99 START -->\n```\n\n<!-- PHASE:01 START -->\nWrap each section like this:\n~~~~\n<!-- PHASE:02 START -->\n~~~\n<!-- PHASE:02 END -->\n~~~~\nDone.\n<!-- PHASE:01 END -->\n";
        let result = split(plan, &SplitOptions::default()).unwrap();

        assert_eq!(result.briefings.len(), 1);
        let body = &result.get("01").unwrap().content;
        assert!(body.contains("<!-- PHASE:02 START -->\n~~~\n<!-- PHASE:02 END -->"));
        assert!(body.ends_with("Done."));
    }

    #[test]
    fn test_unclosed_fence_hides_later_markers() {
        let plan = "<!-- PHASE:01 START -->\n```\ncode\n<!-- PHASE:01 END -->\n";
        let err = split(plan, &SplitOptions::default()).unwrap_err();
        assert!(matches!(err, PlanValidationError::MalformedMarker { line: 1, .. }));
    }

    #[test]
    fn test_empty_section() {
        let plan = "<!-- PHASE:01 START -->\n<!-- PHASE:01 END -->\n";
        let result = split(plan, &SplitOptions::default()).unwrap();
        assert_eq!(result.get("01").unwrap().content, "");
    }

    #[test]
    fn test_over_budget_warns_without_truncating() {
        let body = "x".repeat(100);
        let plan = format!("<!-- PHASE:01 START -->\n{}\n<!-- PHASE:01 END -->\n", body);
        let mut options = SplitOptions::default();
        options.budgets.insert("01".into(), 40);

        let result = split(&plan, &options).unwrap();
        assert_eq!(result.get("01").unwrap().content.len(), 100);
        assert_eq!(
            result.warnings,
            vec![BriefingWarning::OverBudget {
                phase_id: "01".into(),
                size_bytes: 100,
                budget_bytes: 40
            }]
        );
    }

    #[test]
    fn test_forward_reference_is_rejected() {
        let plan = "<!-- PHASE:03 START -->\nImplement the API. See plan.md for details.\n<!-- PHASE:03 END -->\n";
        let err = split(plan, &SplitOptions::default()).unwrap_err();
        match err {
            PlanValidationError::ForwardReference { phase, excerpt } => {
                assert_eq!(phase, "03");
                assert!(excerpt.contains("plan.md"));
            }
            other => panic!("Expected ForwardReference, got {other:?}"),
        }
    }

    #[test]
    fn test_forward_reference_document_list_is_configurable() {
        let plan = "<!-- PHASE:01 START -->\nConsult the design doc first.\n<!-- PHASE:01 END -->\n";
        assert!(split(plan, &SplitOptions::default()).is_ok());

        let options = SplitOptions::default().with_reference_documents(vec!["design doc".into()]);
        assert!(matches!(
            split(plan, &options),
            Err(PlanValidationError::ForwardReference { .. })
        ));

        let options = SplitOptions::default().with_reference_documents(vec![]);
        let plan = "<!-- PHASE:01 START -->\nSee plan.md\n<!-- PHASE:01 END -->\n";
        assert!(split(plan, &options).is_ok());
    }

    #[test]
    fn test_mentioning_a_document_is_not_a_reference() {
        let plan = "<!-- PHASE:01 START -->\nUpdate plan.md status table when done.\n<!-- PHASE:01 END -->\n";
        assert!(split(plan, &SplitOptions::default()).is_ok());
    }

    #[test]
    fn test_marker_contract() {
        let phases = vec![
            Phase::new("01", "API", PhaseKind::Subagent, vec![]),
            Phase::new("02", "UI", PhaseKind::Optional, vec![]),
            Phase::gate("03", "Tests", 3, vec![]),
        ];
        let result = split(PLAN, &SplitOptions::default()).unwrap();
        assert!(validate_marker_contract(&phases, &result).is_ok());

        // Gate with a briefing
        let phases_bad = vec![
            Phase::new("01", "API", PhaseKind::Subagent, vec![]),
            Phase::gate("02", "Tests", 3, vec![]),
        ];
        let err = validate_marker_contract(&phases_bad, &result).unwrap_err();
        assert!(matches!(err, PlanValidationError::MarkerContract { ref phase, .. } if phase == "02"));

        // Subagent without a briefing
        let phases_missing = vec![
            Phase::new("01", "API", PhaseKind::Subagent, vec![]),
            Phase::new("02", "UI", PhaseKind::Subagent, vec![]),
            Phase::new("04", "Docs", PhaseKind::Subagent, vec![]),
        ];
        let err = validate_marker_contract(&phases_missing, &result).unwrap_err();
        assert!(matches!(err, PlanValidationError::MarkerContract { ref phase, .. } if phase == "04"));

        // Briefing for an unknown phase
        let phases_unknown = vec![Phase::new("01", "API", PhaseKind::Subagent, vec![])];
        let err = validate_marker_contract(&phases_unknown, &result).unwrap_err();
        assert!(matches!(err, PlanValidationError::MarkerContract { ref phase, .. } if phase == "02"));
    }

    proptest! {
        #[test]
        fn split_is_deterministic(
            bodies in proptest::collection::vec("[a-zA-Z0-9 ,\n#*-]{0,200}", 1..6)
        ) {
            let mut plan = String::from("# Plan\n");
            for (i, body) in bodies.iter().enumerate() {
                plan.push_str(&format!("<!-- PHASE:{:02} START -->\n{}\n<!-- PHASE:{:02} END -->\n", i, body, i));
            }
            let options = SplitOptions::default().with_reference_documents(vec![]);
            let first = split(&plan, &options).unwrap();
            let second = split(&plan, &options).unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.briefings.len(), bodies.len());
            for (i, body) in bodies.iter().enumerate() {
                let b = first.get(&format!("{:02}", i)).unwrap();
                prop_assert_eq!(&b.content, body);
            }
        }
    }
}
