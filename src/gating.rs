//! Confidence-gated action policy
//!
//! Maps a calibrated risk band and an action type to an allow/deny
//! decision with user-facing warning text, and enforces the hard safety
//! override for results produced by untrusted inference pipelines.
//! A deny is never silent: every denied decision carries a warning
//! suitable for direct display.

use serde::Serialize;
use tracing::warn;

use crate::calibration::{CalibrationOutput, ConfidenceBand, Pipeline};

/// Untrusted pipelines may never drive confidence above this value
const UNTRUSTED_CONFIDENCE_CAP: f64 = 0.4;

/// Class of recommendation being gated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Chemical treatment recommendation
    ChemicalRec,
    /// Definitive disease diagnosis wording
    StrongDiagnosis,
    /// Weather/spread forecast content
    Forecast,
    /// Anything else
    General,
}

/// Outcome of a gating decision
#[derive(Debug, Clone, Serialize)]
pub struct GateDecision {
    /// Whether the action may be shown to the user
    pub allow: bool,
    /// User-facing caution or denial reason
    pub warning: Option<String>,
}

impl GateDecision {
    fn allow() -> Self {
        Self {
            allow: true,
            warning: None,
        }
    }

    fn allow_with(warning: &str) -> Self {
        Self {
            allow: true,
            warning: Some(warning.to_string()),
        }
    }

    fn deny(warning: &str) -> Self {
        Self {
            allow: false,
            warning: Some(warning.to_string()),
        }
    }
}

/// Policy mapping (band, action) pairs to gating decisions
///
/// Stateless; the decision table is fixed. Unlisted action types default
/// to allow.
#[derive(Debug, Clone, Copy, Default)]
pub struct GatingPolicy;

impl GatingPolicy {
    /// Create the policy
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Decide whether an action class is permitted at a confidence band
    #[must_use]
    pub fn decide(&self, band: ConfidenceBand, action: ActionType) -> GateDecision {
        match (action, band) {
            (ActionType::ChemicalRec, ConfidenceBand::Low) => GateDecision::deny(
                "Confidence too low for chemical recommendations. Showing organic alternatives only.",
            ),
            (ActionType::ChemicalRec, ConfidenceBand::Medium) => GateDecision::allow_with(
                "Moderate confidence: Consult local agricultural expert before applying chemicals.",
            ),
            (ActionType::StrongDiagnosis, ConfidenceBand::Low) => GateDecision::deny(
                "Low confidence diagnosis. Please retake photo with better lighting and focus, or consult an expert.",
            ),
            _ => GateDecision::allow(),
        }
    }

    /// Force calibration output down for untrusted pipelines
    ///
    /// Unconditional: a heuristic or demo/error/fallback pipeline caps the
    /// calibrated confidence at 0.4 and forces the band to low, whatever
    /// calibration produced. Must run after calibration and before any
    /// treatment content is returned to a caller.
    pub fn apply_untrusted_override(&self, output: &mut CalibrationOutput, pipeline: Pipeline) {
        if pipeline.is_trusted() {
            return;
        }
        output.band = ConfidenceBand::Low;
        output.confidence = output.confidence.min(UNTRUSTED_CONFIDENCE_CAP);
        warn!(
            pipeline = %pipeline,
            confidence = output.confidence,
            "Untrusted pipeline, confidence forced low"
        );
    }

    /// Gate chemical treatment content for a calibrated result
    ///
    /// Applies the band decision for [`ActionType::ChemicalRec`], then the
    /// pipeline override: untrusted pipelines are denied regardless of
    /// band, with a warning naming the pipeline.
    #[must_use]
    pub fn gate_treatment(&self, output: &CalibrationOutput, pipeline: Pipeline) -> GateDecision {
        let mut decision = self.decide(output.band, ActionType::ChemicalRec);

        if !pipeline.is_trusted() {
            decision.allow = false;
            decision.warning = Some(format!(
                "Chemical recommendations blocked: diagnosis used {pipeline} pipeline. \
                 Please ensure good image quality and AI service availability for \
                 treatment recommendations."
            ));
        }

        decision
    }
}
