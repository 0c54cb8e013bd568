//! Unified configuration for phasegate.
//!
//! Settings are read from `.phasegate/phasegate.toml` and layered
//! file → environment → CLI. Every section is optional.
//!
//! # Configuration File Format
//!
//! ```toml
//! [defaults]
//! max_retries = 3
//! briefing_budget_bytes = 3200
//! max_parallel = 1
//!
//! [retry]
//! fix_timeout_secs = 600
//! initial_backoff_ms = 500
//! multiplier = 2.0
//! max_backoff_secs = 30
//!
//! [commands]
//! fixer = "scripts/fix.sh"
//! repair = "scripts/repair-test.sh"
//!
//! [classifier]
//! artifact_signatures = ["locator .* timed out"]
//! infra_signatures = ["database is starting up"]
//!
//! [similarity]
//! pass_percent = 90.0
//! warning_percent = 70.0
//!
//! [references]
//! documents = ["plan.md", "requirements.md"]
//!
//! [phases.overrides."*-e2e"]
//! max_retries = 5
//! briefing_budget_bytes = 4800
//! ```

use crate::briefing::{DEFAULT_REFERENCE_DOCUMENTS, SplitOptions};
use crate::gates::{RetryPolicy, SignatureClassifier, SimilarityThresholds};
use crate::phase::{DEFAULT_BRIEFING_BUDGET_BYTES, DEFAULT_GATE_RETRIES, Phase};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_FILE: &str = "phasegate.toml";
pub const ENV_MAX_PARALLEL: &str = "PHASEGATE_MAX_PARALLEL";
pub const ENV_FIXER_CMD: &str = "PHASEGATE_FIXER_CMD";

/// Default settings for all phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Attempts a gate gets before it is blocked
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_briefing_budget")]
    pub briefing_budget_bytes: usize,
    /// Phases dispatched concurrently; 1 runs sequentially
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

fn default_max_retries() -> u32 {
    DEFAULT_GATE_RETRIES
}

fn default_briefing_budget() -> usize {
    DEFAULT_BRIEFING_BUDGET_BYTES
}

fn default_max_parallel() -> usize {
    1
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            briefing_budget_bytes: default_briefing_budget(),
            max_parallel: default_max_parallel(),
        }
    }
}

/// Gate retry timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_fix_timeout_secs")]
    pub fix_timeout_secs: u64,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

fn default_fix_timeout_secs() -> u64 {
    600
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_secs() -> u64 {
    30
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            fix_timeout_secs: default_fix_timeout_secs(),
            initial_backoff_ms: default_initial_backoff_ms(),
            multiplier: default_multiplier(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            fix_timeout: Duration::from_secs(self.fix_timeout_secs),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            multiplier: self.multiplier,
            max_backoff: Duration::from_secs(self.max_backoff_secs),
        }
    }
}

/// External commands the CLI adapters call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandsSection {
    /// Receives each fix request as JSON on stdin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixer: Option<String>,
    /// Repairs a broken test artifact; receives the failing check on stdin
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repair: Option<String>,
}

/// Extra failure signatures, added to the built-in lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifierSection {
    #[serde(default)]
    pub artifact_signatures: Vec<String>,
    #[serde(default)]
    pub infra_signatures: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferencesSection {
    /// Documents a briefing must not point back to
    #[serde(default = "default_reference_documents")]
    pub documents: Vec<String>,
}

fn default_reference_documents() -> Vec<String> {
    DEFAULT_REFERENCE_DOCUMENTS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for ReferencesSection {
    fn default() -> Self {
        Self {
            documents: default_reference_documents(),
        }
    }
}

/// Phase-specific override settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhaseOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub briefing_budget_bytes: Option<usize>,
}

/// Phase override configuration section.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhasesConfig {
    /// Glob on phase name or id (e.g. "*-e2e" -> PhaseOverride)
    #[serde(default)]
    pub overrides: BTreeMap<String, PhaseOverride>,
}

/// The complete phasegate.toml structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhasegateToml {
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub commands: CommandsSection,
    #[serde(default)]
    pub classifier: ClassifierSection,
    #[serde(default)]
    pub similarity: SimilarityThresholds,
    #[serde(default)]
    pub references: ReferencesSection,
    #[serde(default)]
    pub phases: PhasesConfig,
}

impl PhasegateToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse phasegate.toml")
    }

    /// Load `phasegate.toml` from `dir`, or defaults if it does not exist.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize phasegate.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut warnings = Vec::new();
        if let Some(raw) = lookup(ENV_MAX_PARALLEL) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.defaults.max_parallel = n,
                _ => warnings.push(format!("Ignoring {}={:?}: not a positive integer", ENV_MAX_PARALLEL, raw)),
            }
        }
        if let Some(cmd) = lookup(ENV_FIXER_CMD).filter(|c| !c.trim().is_empty()) {
            self.commands.fixer = Some(cmd);
        }
        warnings
    }

    /// Effective settings for one phase, applying matching overrides in key order.
    pub fn phase_settings(&self, phase: &Phase) -> PhaseSettings {
        let mut settings = PhaseSettings {
            max_retries: self.defaults.max_retries,
            briefing_budget_bytes: self.defaults.briefing_budget_bytes,
        };

        for (pattern, override_cfg) in &self.phases.overrides {
            if pattern_matches(pattern, &phase.name) || pattern_matches(pattern, &phase.id) {
                if let Some(n) = override_cfg.max_retries {
                    settings.max_retries = n;
                }
                if let Some(bytes) = override_cfg.briefing_budget_bytes {
                    settings.briefing_budget_bytes = bytes;
                }
            }
        }

        settings
    }

    /// Fill in what phases.json left unset. Explicit per-phase values win over
    /// `[defaults]`; overrides win over both. A gate with `max_retries` of 0 or
    /// the built-in default counts as unset.
    pub fn apply_to_phases(&self, phases: &mut [Phase]) {
        for phase in phases.iter_mut() {
            let settings = self.phase_settings(phase);
            let overridden = self.has_override(phase);

            if phase.kind.is_gate()
                && (overridden.max_retries
                    || phase.max_retries == 0
                    || phase.max_retries == DEFAULT_GATE_RETRIES)
            {
                phase.max_retries = settings.max_retries;
            }
            if overridden.briefing_budget_bytes
                || phase.briefing_budget_bytes == DEFAULT_BRIEFING_BUDGET_BYTES
            {
                phase.briefing_budget_bytes = settings.briefing_budget_bytes;
            }
        }
    }

    fn has_override(&self, phase: &Phase) -> OverrideHits {
        let mut hits = OverrideHits::default();
        for (pattern, o) in &self.phases.overrides {
            if pattern_matches(pattern, &phase.name) || pattern_matches(pattern, &phase.id) {
                hits.max_retries |= o.max_retries.is_some();
                hits.briefing_budget_bytes |= o.briefing_budget_bytes.is_some();
            }
        }
        hits
    }

    pub fn split_options(&self, phases: &[Phase]) -> SplitOptions {
        SplitOptions {
            default_budget_bytes: self.defaults.briefing_budget_bytes,
            ..SplitOptions::for_phases(phases)
        }
        .with_reference_documents(self.references.documents.clone())
    }

    pub fn classifier(&self) -> Result<SignatureClassifier> {
        SignatureClassifier::with_extra(
            &self.classifier.artifact_signatures,
            &self.classifier.infra_signatures,
        )
        .context("Invalid failure signature in [classifier]")
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.defaults.max_retries == 0 {
            warnings.push("defaults.max_retries is 0: gates need at least one attempt".to_string());
        }
        if self.defaults.max_parallel == 0 {
            warnings.push("defaults.max_parallel is 0: treated as 1".to_string());
        }
        if self.defaults.briefing_budget_bytes == 0 {
            warnings.push("defaults.briefing_budget_bytes is 0: every briefing will be over budget".to_string());
        }
        if self.retry.multiplier < 1.0 {
            warnings.push(format!(
                "retry.multiplier {} is below 1.0: backoff will not grow",
                self.retry.multiplier
            ));
        }
        if !self.similarity.is_consistent() {
            warnings.push(format!(
                "similarity thresholds are inconsistent: warning {} must be <= pass {} and both within 0..=100",
                self.similarity.warning_percent, self.similarity.pass_percent
            ));
        }
        if let Err(e) = self.classifier() {
            warnings.push(format!("{:#}", e));
        }
        for (pattern, o) in &self.phases.overrides {
            if glob::Pattern::new(pattern).is_err() {
                warnings.push(format!("Invalid override pattern '{}'", pattern));
            }
            if o.max_retries == Some(0) {
                warnings.push(format!(
                    "Override '{}' sets max_retries = 0: gates need at least one attempt",
                    pattern
                ));
            }
        }

        warnings
    }
}

#[derive(Debug, Default)]
struct OverrideHits {
    max_retries: bool,
    briefing_budget_bytes: bool,
}

/// Resolved settings for a specific phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseSettings {
    pub max_retries: u32,
    pub briefing_budget_bytes: usize,
}

/// Case-insensitive glob match of a phase name or id.
pub fn pattern_matches(pattern: &str, name: &str) -> bool {
    glob::Pattern::new(&pattern.to_lowercase())
        .map(|p| p.matches(&name.to_lowercase()))
        .unwrap_or(false)
}

/// Configuration merged from phasegate.toml, the environment and CLI flags.
#[derive(Debug, Clone)]
pub struct PhasegateConfig {
    pub project_dir: PathBuf,
    /// The `.phasegate` directory
    pub state_dir: PathBuf,
    pub toml: PhasegateToml,
    pub verbose: bool,
    /// Warnings from environment overrides
    pub env_warnings: Vec<String>,
}

impl PhasegateConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let state_dir = project_dir.join(crate::config::STATE_DIR);
        let mut toml = PhasegateToml::load_or_default(&state_dir)?;
        let env_warnings = toml.apply_env(|key| std::env::var(key).ok());

        Ok(Self {
            project_dir,
            state_dir,
            toml,
            verbose: false,
            env_warnings,
        })
    }

    /// Layer CLI flags on top of file and environment.
    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        max_parallel: Option<usize>,
        fixer: Option<String>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        if let Some(n) = max_parallel {
            config.toml.defaults.max_parallel = n;
        }
        if fixer.is_some() {
            config.toml.commands.fixer = fixer;
        }
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.state_dir.join(CONFIG_FILE)
    }

    pub fn max_parallel(&self) -> usize {
        self.toml.defaults.max_parallel.max(1)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.toml.retry.policy()
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.env_warnings.clone();
        warnings.extend(self.toml.validate());
        warnings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::PhaseKind;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = PhasegateToml::default();
        assert_eq!(config.defaults.max_retries, 3);
        assert_eq!(config.defaults.briefing_budget_bytes, 3200);
        assert_eq!(config.defaults.max_parallel, 1);
        assert_eq!(config.similarity.pass_percent, 90.0);
        assert_eq!(config.retry.policy(), RetryPolicy::default());
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_parse_full_file() {
        let config = PhasegateToml::parse(
            r#"
[defaults]
max_retries = 4
max_parallel = 3

[retry]
fix_timeout_secs = 60

[commands]
fixer = "scripts/fix.sh"

[similarity]
pass_percent = 95.0
warning_percent = 80.0

[phases.overrides."*-e2e"]
max_retries = 6
"#,
        )
        .unwrap();

        assert_eq!(config.defaults.max_retries, 4);
        assert_eq!(config.defaults.briefing_budget_bytes, 3200);
        assert_eq!(config.defaults.max_parallel, 3);
        assert_eq!(config.retry.policy().fix_timeout, Duration::from_secs(60));
        assert_eq!(config.retry.initial_backoff_ms, 500);
        assert_eq!(config.commands.fixer.as_deref(), Some("scripts/fix.sh"));
        assert_eq!(config.similarity.warning_percent, 80.0);
        assert_eq!(config.phases.overrides["*-e2e"].max_retries, Some(6));
    }

    #[test]
    fn test_parse_invalid_toml() {
        let result = PhasegateToml::parse("[defaults\nmax_retries = ");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempdir().unwrap();
        let config = PhasegateToml::load_or_default(dir.path()).unwrap();
        assert_eq!(config, PhasegateToml::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        let mut config = PhasegateToml::default();
        config.commands.repair = Some("fix-test".into());
        config.phases.overrides.insert(
            "api-*".into(),
            PhaseOverride {
                max_retries: Some(5),
                briefing_budget_bytes: None,
            },
        );
        config.save(&path).unwrap();
        assert_eq!(PhasegateToml::load(&path).unwrap(), config);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_MAX_PARALLEL, "4"),
            (ENV_FIXER_CMD, "fixer --json"),
        ]);
        let mut config = PhasegateToml::default();
        let warnings = config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert!(warnings.is_empty());
        assert_eq!(config.defaults.max_parallel, 4);
        assert_eq!(config.commands.fixer.as_deref(), Some("fixer --json"));
    }

    #[test]
    fn test_env_invalid_parallel_warns() {
        let mut config = PhasegateToml::default();
        let warnings = config.apply_env(|k| (k == ENV_MAX_PARALLEL).then(|| "zero".to_string()));
        assert_eq!(warnings.len(), 1);
        assert_eq!(config.defaults.max_parallel, 1);
    }

    #[test]
    fn test_pattern_matches() {
        assert!(pattern_matches("*-e2e", "checkout-e2e"));
        assert!(pattern_matches("API-*", "api-tests"));
        assert!(pattern_matches("0?", "03"));
        assert!(!pattern_matches("*-e2e", "checkout"));
        assert!(!pattern_matches("[", "anything"));
    }

    #[test]
    fn test_apply_to_phases() {
        let mut config = PhasegateToml::default();
        config.defaults.max_retries = 4;
        config.phases.overrides.insert(
            "*-e2e".into(),
            PhaseOverride {
                max_retries: Some(6),
                briefing_budget_bytes: Some(5000),
            },
        );

        let mut phases = vec![
            Phase::gate("03", "api-tests", 3, vec![]),
            Phase::gate("04", "checkout-e2e", 2, vec![]),
            Phase::gate("05", "smoke", 2, vec![]),
            Phase::new("01", "scaffold", PhaseKind::Subagent, vec![]),
        ];
        config.apply_to_phases(&mut phases);

        // Default-valued gate takes [defaults]
        assert_eq!(phases[0].max_retries, 4);
        // Override wins over an explicit value
        assert_eq!(phases[1].max_retries, 6);
        assert_eq!(phases[1].briefing_budget_bytes, 5000);
        // Explicit value wins over [defaults]
        assert_eq!(phases[2].max_retries, 2);
        // Non-gates never get retries
        assert_eq!(phases[3].max_retries, 0);
    }

    #[test]
    fn test_validate_warnings() {
        let mut config = PhasegateToml::default();
        config.similarity = SimilarityThresholds {
            pass_percent: 60.0,
            warning_percent: 80.0,
        };
        config.retry.multiplier = 0.5;
        config.classifier.infra_signatures = vec!["(unclosed".into()];
        config
            .phases
            .overrides
            .insert("x".into(), PhaseOverride {
                max_retries: Some(0),
                briefing_budget_bytes: None,
            });

        let warnings = config.validate();
        assert_eq!(warnings.len(), 4);
        assert!(warnings.iter().any(|w| w.contains("similarity")));
        assert!(warnings.iter().any(|w| w.contains("multiplier")));
        assert!(warnings.iter().any(|w| w.contains("signature")));
        assert!(warnings.iter().any(|w| w.contains("max_retries = 0")));
    }

    #[test]
    fn test_split_options_use_config() {
        let mut config = PhasegateToml::default();
        config.defaults.briefing_budget_bytes = 1000;
        config.references.documents = vec!["spec.md".into()];
        let phases = vec![Phase::new("01", "a", PhaseKind::Subagent, vec![]).with_budget(500)];
        let options = config.split_options(&phases);
        assert_eq!(options.budget_for("01"), 500);
        assert_eq!(options.budget_for("99"), 1000);
        assert_eq!(options.reference_documents, vec!["spec.md".to_string()]);
    }

    #[test]
    fn test_phasegate_config_reads_state_dir() {
        let dir = tempdir().unwrap();
        let state = dir.path().join(crate::config::STATE_DIR);
        std::fs::create_dir_all(&state).unwrap();
        std::fs::write(state.join(CONFIG_FILE), "[defaults]\nmax_parallel = 2\n").unwrap();

        let config =
            PhasegateConfig::with_cli_args(dir.path().to_path_buf(), true, None, None).unwrap();
        assert!(config.verbose);
        assert_eq!(config.toml.defaults.max_parallel, 2);

        let config =
            PhasegateConfig::with_cli_args(dir.path().to_path_buf(), false, Some(5), None).unwrap();
        assert_eq!(config.max_parallel(), 5);
    }
}
