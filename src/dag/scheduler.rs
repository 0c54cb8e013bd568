//! DAG scheduler for computing eligibility from recorded outcomes.
//!
//! The scheduler holds no mutable run state. Every query takes a
//! `SessionState` snapshot, so a resumed run recomputes eligibility from the
//! outcome log alone.

use crate::dag::builder::{DagBuilder, PhaseGraph, PhaseIndex};
use crate::errors::{PlanValidationError, WorkflowStalledError};
use crate::phase::Phase;
use crate::session::{OutcomeStatus, SessionState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// Derived status of a phase for display and reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PhaseStatus {
    /// No outcome yet and nothing known about prerequisites
    #[default]
    Pending,
    /// Prerequisites not passed yet
    Waiting { waiting_on: Vec<String> },
    /// Prerequisites passed, no outcome yet
    Ready,
    /// Gate failed at least once and has attempts left
    Retrying { attempts: u32 },
    Passed { overridden: bool },
    Failed { attempts: u32 },
    Blocked { attempts: u32 },
    /// A prerequisite is blocked or failed for good
    Skipped { because_of: String },
}

impl PhaseStatus {
    /// Check if the phase needs no more dispatching.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            Self::Passed { .. } | Self::Failed { .. } | Self::Blocked { .. } | Self::Skipped { .. }
        )
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Passed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Waiting { .. } => "waiting",
            Self::Ready => "ready",
            Self::Retrying { .. } => "retrying",
            Self::Passed { .. } => "passed",
            Self::Failed { .. } => "failed",
            Self::Blocked { .. } => "blocked",
            Self::Skipped { .. } => "skipped",
        }
    }
}

/// The main DAG scheduler.
#[derive(Debug)]
pub struct DagScheduler {
    graph: PhaseGraph,
}

impl DagScheduler {
    /// Create a DAG scheduler from a list of phases.
    pub fn from_phases(phases: &[Phase]) -> Result<Self, PlanValidationError> {
        let graph = DagBuilder::new(phases.to_vec()).build()?;
        Ok(Self { graph })
    }

    pub fn graph(&self) -> &PhaseGraph {
        &self.graph
    }

    /// Get the number of phases in the DAG.
    pub fn phase_count(&self) -> usize {
        self.graph.len()
    }

    pub fn phase(&self, id: &str) -> Option<&Phase> {
        self.graph.get_phase_by_id(id)
    }

    /// Phases sorted by id.
    pub fn phases_by_id(&self) -> Vec<&Phase> {
        let mut phases: Vec<&Phase> = self.graph.phases().iter().collect();
        phases.sort_by(|a, b| a.id.cmp(&b.id));
        phases
    }

    /// Compute execution waves - groups of phases that can run in parallel.
    ///
    /// Returns a list of waves, where each wave is a list of phase ids (sorted)
    /// that can be executed in parallel once all previous waves complete.
    pub fn compute_waves(&self) -> Vec<Vec<String>> {
        let mut waves = Vec::new();
        let mut completed: HashSet<PhaseIndex> = HashSet::new();

        loop {
            let ready: Vec<PhaseIndex> = (0..self.graph.len())
                .filter(|i| !completed.contains(i))
                .filter(|&i| self.graph.dependencies_satisfied(i, &completed))
                .collect();

            if ready.is_empty() {
                break;
            }

            completed.extend(ready.iter().copied());

            let mut ids: Vec<String> = ready
                .iter()
                .filter_map(|&i| self.graph.get_phase(i).map(|p| p.id.clone()))
                .collect();
            ids.sort();
            waves.push(ids);
        }

        waves
    }

    /// Whether the latest outcome for `phase` ends it.
    pub fn is_terminal(&self, phase: &Phase, state: &SessionState) -> bool {
        state
            .latest(&phase.id)
            .is_some_and(|o| o.is_terminal(phase.attempt_limit()))
    }

    /// A phase is dead when it ended without passing.
    fn is_dead(&self, phase: &Phase, state: &SessionState) -> bool {
        state.latest(&phase.id).is_some_and(|o| match o.status {
            OutcomeStatus::Blocked => true,
            OutcomeStatus::Failed => o.is_terminal(phase.attempt_limit()),
            OutcomeStatus::Passed => false,
        })
    }

    /// Phases permanently excluded because a prerequisite, directly or
    /// transitively, is blocked or failed for good.
    pub fn excluded(&self, state: &SessionState) -> BTreeSet<String> {
        let mut unreachable: HashSet<PhaseIndex> = HashSet::new();
        let mut excluded = BTreeSet::new();

        for &i in self.graph.topological_order() {
            let Some(phase) = self.graph.get_phase(i) else {
                continue;
            };
            let cut_off = self
                .graph
                .dependencies(i)
                .iter()
                .any(|d| unreachable.contains(d));

            if cut_off && !state.is_passed(&phase.id) {
                excluded.insert(phase.id.clone());
                unreachable.insert(i);
            } else if self.is_dead(phase, state) {
                unreachable.insert(i);
            }
        }

        excluded
    }

    /// Phases whose prerequisites have all passed and that have no terminal
    /// outcome, in id order.
    pub fn next_eligible(&self, state: &SessionState) -> Vec<&Phase> {
        let excluded = self.excluded(state);
        let mut eligible: Vec<&Phase> = self
            .graph
            .phases()
            .iter()
            .filter(|p| !excluded.contains(&p.id))
            .filter(|p| !self.is_terminal(p, state))
            .filter(|p| p.prerequisites.iter().all(|pre| state.is_passed(pre)))
            .collect();
        eligible.sort_by(|a, b| a.id.cmp(&b.id));
        eligible
    }

    /// Every phase is terminal or excluded.
    pub fn all_settled(&self, state: &SessionState) -> bool {
        let excluded = self.excluded(state);
        self.graph
            .phases()
            .iter()
            .all(|p| excluded.contains(&p.id) || self.is_terminal(p, state))
    }

    /// Walk prerequisites from `id` to the first phase that is holding it up.
    ///
    /// The chain starts with `id` and follows, at each step, the lowest-id
    /// prerequisite that has not passed.
    pub fn blocking_chain(&self, id: &str, state: &SessionState) -> Vec<String> {
        let mut chain = vec![id.to_string()];
        let mut seen: HashSet<String> = HashSet::from([id.to_string()]);
        let mut current = id.to_string();

        while let Some(phase) = self.phase(&current) {
            let mut pending: Vec<&String> = phase
                .prerequisites
                .iter()
                .filter(|p| !state.is_passed(p))
                .collect();
            pending.sort();
            let Some(next) = pending.first() else { break };
            if !seen.insert((*next).clone()) {
                break;
            }
            chain.push((*next).clone());
            current = (*next).clone();
        }

        chain
    }

    /// Build the stall error when nothing is eligible yet work remains.
    ///
    /// Returns `None` for every state of a graph that built. Following the
    /// unpassed prerequisites of an unsettled phase always ends at an eligible
    /// one: a dead prerequisite would have excluded it, and the graph has no
    /// cycles or unknown ids. The orchestrator still checks before finishing.
    pub fn stall(&self, state: &SessionState) -> Option<WorkflowStalledError> {
        if !self.next_eligible(state).is_empty() || self.all_settled(state) {
            return None;
        }
        let excluded = self.excluded(state);
        let stuck = self
            .phases_by_id()
            .into_iter()
            .find(|p| !excluded.contains(&p.id) && !self.is_terminal(p, state))?;
        Some(WorkflowStalledError {
            phase: stuck.id.clone(),
            chain: self.blocking_chain(&stuck.id, state),
        })
    }

    /// Derived status of one phase.
    pub fn status_of(&self, id: &str, state: &SessionState) -> PhaseStatus {
        let Some(phase) = self.phase(id) else {
            return PhaseStatus::Pending;
        };

        if let Some(latest) = state.latest(id) {
            let attempts = latest.attempt_number;
            return match latest.status {
                OutcomeStatus::Passed => PhaseStatus::Passed {
                    overridden: latest.overridden,
                },
                OutcomeStatus::Blocked => PhaseStatus::Blocked { attempts },
                OutcomeStatus::Failed if latest.is_terminal(phase.attempt_limit()) => {
                    PhaseStatus::Failed { attempts }
                }
                OutcomeStatus::Failed => PhaseStatus::Retrying { attempts },
            };
        }

        if self.excluded(state).contains(id) {
            let chain = self.blocking_chain(id, state);
            let because_of = chain.last().cloned().unwrap_or_default();
            return PhaseStatus::Skipped { because_of };
        }

        let waiting_on: Vec<String> = phase
            .prerequisites
            .iter()
            .filter(|p| !state.is_passed(p))
            .cloned()
            .collect();
        if waiting_on.is_empty() {
            PhaseStatus::Ready
        } else {
            PhaseStatus::Waiting { waiting_on }
        }
    }

    /// Status of every phase, in id order.
    pub fn statuses(&self, state: &SessionState) -> Vec<(String, PhaseStatus)> {
        self.phases_by_id()
            .into_iter()
            .map(|p| (p.id.clone(), self.status_of(&p.id, state)))
            .collect()
    }

    /// Fraction of phases that are settled, as a percentage.
    pub fn completion_percentage(&self, state: &SessionState) -> f64 {
        if self.graph.is_empty() {
            return 100.0;
        }
        let settled = self
            .statuses(state)
            .iter()
            .filter(|(_, s)| s.is_settled())
            .count();
        (settled as f64 / self.graph.len() as f64) * 100.0
    }
}
