//! Gate phases: checks, failure classification and the retry loop.

mod check;
mod classify;
mod controller;
mod retry;
mod threshold;

pub use check::{CheckDetail, CheckResult, FailureClass};
pub use classify::{
    DEFAULT_ARTIFACT_SIGNATURES, DEFAULT_INFRA_SIGNATURES, FailureClassifier, SignatureClassifier,
};
pub use controller::{GateController, GateReport};
pub(crate) use controller::blocked_error;
pub use retry::RetryPolicy;
pub use threshold::{SimilarityBand, SimilarityThresholds};
