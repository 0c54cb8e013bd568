//! Phase graph: validation and eligibility.
//!
//! ## Architecture
//!
//! 1. **Builder** - Constructs a DAG from phases with their prerequisites and
//!    rejects duplicate ids, unknown prerequisites, bad retry bounds and cycles
//! 2. **Scheduler** - Answers "what may run next" from a session snapshot
//!
//! ## Example
//!
//! ```
//! use phasegate::dag::DagScheduler;
//! use phasegate::phase::{Phase, PhaseKind};
//! use phasegate::session::{PhaseOutcome, SessionState};
//!
//! let phases = vec![
//!     Phase::new("01", "Setup", PhaseKind::Subagent, vec![]),
//!     Phase::new("02", "Core", PhaseKind::Subagent, vec!["01".to_string()]),
//!     Phase::gate("03", "Tests", 3, vec!["02".to_string()]),
//! ];
//!
//! let scheduler = DagScheduler::from_phases(&phases).unwrap();
//! let state = SessionState {
//!     outcomes: vec![PhaseOutcome::passed("01", 1)],
//!     artifacts: vec![],
//! };
//! let next: Vec<&str> = scheduler.next_eligible(&state).iter().map(|p| p.id.as_str()).collect();
//! assert_eq!(next, vec!["02"]);
//! ```

mod builder;
mod scheduler;

pub use builder::{DagBuilder, PhaseGraph, PhaseIndex};
pub use scheduler::{DagScheduler, PhaseStatus};

use crate::errors::PlanValidationError;
use crate::phase::Phase;

/// Check a phase list without keeping the graph.
pub fn validate(phases: &[Phase]) -> Result<(), PlanValidationError> {
    DagBuilder::new(phases.to_vec()).build().map(|_| ())
}
