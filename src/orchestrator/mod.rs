//! Workflow orchestration.
//!
//! The [`Orchestrator`] validates the phase graph, splits the plan into
//! briefings once, then repeatedly dispatches whatever the scheduler says is
//! eligible until every phase is settled. Gates go through the
//! [`GateController`](crate::gates::GateController); everything else gets a
//! single attempt.

mod abort;
mod report;
mod runner;

pub use abort::AbortHandle;
pub use report::{PhaseSummary, RunReport, RunStatus};
pub use runner::Orchestrator;
