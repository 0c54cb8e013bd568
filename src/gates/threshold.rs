//! Similarity bands for score-based checks such as visual comparisons.

use super::check::CheckResult;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityBand {
    Pass,
    Warning,
    Fail,
}

/// Cut-off percentages. A score at or above `pass_percent` passes; at or above
/// `warning_percent` passes with a warning; anything lower fails.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimilarityThresholds {
    pub pass_percent: f64,
    pub warning_percent: f64,
}

impl Default for SimilarityThresholds {
    fn default() -> Self {
        Self {
            pass_percent: 90.0,
            warning_percent: 70.0,
        }
    }
}

impl SimilarityThresholds {
    pub fn band(&self, score_percent: f64) -> SimilarityBand {
        if score_percent >= self.pass_percent {
            SimilarityBand::Pass
        } else if score_percent >= self.warning_percent {
            SimilarityBand::Warning
        } else {
            SimilarityBand::Fail
        }
    }

    pub fn is_consistent(&self) -> bool {
        (0.0..=100.0).contains(&self.warning_percent)
            && (0.0..=100.0).contains(&self.pass_percent)
            && self.warning_percent <= self.pass_percent
    }
}

impl CheckResult {
    /// Turn a similarity score into a check. Warnings pass with a note.
    pub fn from_similarity(
        check_id: &str,
        score_percent: f64,
        thresholds: &SimilarityThresholds,
    ) -> Self {
        match thresholds.band(score_percent) {
            SimilarityBand::Pass => CheckResult::passing(check_id),
            SimilarityBand::Warning => CheckResult::passing(check_id).with_note(&format!(
                "similarity {:.1}% is below {:.1}%",
                score_percent, thresholds.pass_percent
            )),
            SimilarityBand::Fail => CheckResult::failing(
                check_id,
                &format!("similarity {:.1}% is below {:.1}%", score_percent, thresholds.warning_percent),
            )
            .expecting(
                &format!(">= {:.1}%", thresholds.warning_percent),
                &format!("{:.1}%", score_percent),
            ),
        }
    }
}
