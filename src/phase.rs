//! Phase definition and JSON loading for the phasegate orchestrator.
//!
//! This module provides:
//! - `PhaseKind` describing how a phase is dispatched
//! - `Phase` representing a single unit of work in the workflow
//! - `PhasesFile` representing the `phases.json` format

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default retry bound for gate phases.
pub const DEFAULT_GATE_RETRIES: u32 = 3;

/// Default soft cap for a phase briefing (roughly 800 tokens).
pub const DEFAULT_BRIEFING_BUDGET_BYTES: usize = 3200;

/// How a phase is dispatched.
///
/// | Kind           | Briefing marker | Dispatched through |
/// |----------------|-----------------|--------------------|
/// | `Subagent`     | required        | executor           |
/// | `Conditional`  | required        | executor           |
/// | `Optional`     | required        | executor           |
/// | `Gate`         | forbidden       | gate controller    |
/// | `Orchestrator` | forbidden       | executor, no briefing |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    #[default]
    Subagent,
    Gate,
    Conditional,
    Optional,
    #[serde(alias = "orchestrator_handled")]
    Orchestrator,
}

impl PhaseKind {
    /// Whether the plan document must carry a marker pair for this kind.
    pub fn needs_briefing(self) -> bool {
        matches!(
            self,
            PhaseKind::Subagent | PhaseKind::Conditional | PhaseKind::Optional
        )
    }

    pub fn is_gate(self) -> bool {
        matches!(self, PhaseKind::Gate)
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseKind::Subagent => write!(f, "subagent"),
            PhaseKind::Gate => write!(f, "gate"),
            PhaseKind::Conditional => write!(f, "conditional"),
            PhaseKind::Optional => write!(f, "optional"),
            PhaseKind::Orchestrator => write!(f, "orchestrator"),
        }
    }
}

impl std::str::FromStr for PhaseKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "subagent" => Ok(PhaseKind::Subagent),
            "gate" => Ok(PhaseKind::Gate),
            "conditional" => Ok(PhaseKind::Conditional),
            "optional" => Ok(PhaseKind::Optional),
            "orchestrator" | "orchestrator_handled" => Ok(PhaseKind::Orchestrator),
            _ => anyhow::bail!(
                "Invalid phase kind '{}'. Valid values: subagent, gate, conditional, optional, orchestrator",
                s
            ),
        }
    }
}

/// Represents a single phase of the workflow.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Phase {
    /// Stable ordinal (e.g., "01", "02"); phases are dispatched in id order
    pub id: String,
    /// Human-readable name of the phase
    pub name: String,
    #[serde(default)]
    pub kind: PhaseKind,
    /// Phase ids that must have passed before this phase may start
    #[serde(default)]
    pub prerequisites: Vec<String>,
    /// Retry bound; 0 for non-gates, positive for gates
    #[serde(default)]
    pub max_retries: u32,
    /// Soft cap on the size of this phase's briefing
    #[serde(default = "default_briefing_budget")]
    pub briefing_budget_bytes: usize,
    /// Shell command run by the command executor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
}

fn default_briefing_budget() -> usize {
    DEFAULT_BRIEFING_BUDGET_BYTES
}

impl Phase {
    /// Create a phase of the given kind. Gates get the default retry bound.
    pub fn new(id: &str, name: &str, kind: PhaseKind, prerequisites: Vec<String>) -> Self {
        let max_retries = if kind.is_gate() {
            DEFAULT_GATE_RETRIES
        } else {
            0
        };
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            prerequisites,
            max_retries,
            briefing_budget_bytes: DEFAULT_BRIEFING_BUDGET_BYTES,
            command: None,
        }
    }

    /// Create a gate phase with an explicit retry bound.
    pub fn gate(id: &str, name: &str, max_retries: u32, prerequisites: Vec<String>) -> Self {
        Self {
            max_retries,
            ..Self::new(id, name, PhaseKind::Gate, prerequisites)
        }
    }

    pub fn with_command(mut self, command: &str) -> Self {
        self.command = Some(command.to_string());
        self
    }

    pub fn with_budget(mut self, bytes: usize) -> Self {
        self.briefing_budget_bytes = bytes;
        self
    }

    /// Number of automatic attempts this phase gets. Non-gates run exactly once.
    #[inline]
    pub fn attempt_limit(&self) -> u32 {
        self.max_retries.max(1)
    }
}

/// Represents the full phases.json file format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhasesFile {
    /// Hash of the plan document the phases were authored against
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_hash: Option<String>,
    /// Timestamp when the phases were authored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<String>,
    /// List of phases
    #[serde(default)]
    pub phases: Vec<Phase>,
}

impl PhasesFile {
    /// Load phases from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read phases file: {}", path.display()))?;

        let phases_file: PhasesFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse phases JSON: {}", path.display()))?;

        Ok(phases_file)
    }

    /// Save phases to a JSON file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize phases to JSON")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write phases file: {}", path.display()))?;

        Ok(())
    }

    /// Get a specific phase by id.
    pub fn get_phase(&self, id: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }
}
