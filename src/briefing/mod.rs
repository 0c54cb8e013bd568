//! Context splitting: one shared plan in, one small briefing per phase out.

mod splitter;
mod store;

pub use splitter::{
    BriefingWarning, DEFAULT_REFERENCE_DOCUMENTS, PhaseBriefing, PhaseSection, PlanDocument,
    SplitOptions, SplitResult, content_hash, split, validate_marker_contract,
};
pub use store::{BriefingIndex, BriefingIndexEntry, BriefingStore, WriteSummary};
