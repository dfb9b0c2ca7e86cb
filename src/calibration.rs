//! Confidence calibration
//!
//! Fuses the confidence signals attached to an inference result (image
//! quality, severity estimates, crop identification, model confidence,
//! pipeline trust) into a single calibrated confidence and a discrete risk
//! band. Uses a pre-fitted logistic model when one was loaded at startup,
//! otherwise temperature scaling of the raw confidence.

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::CalibrationConfig;

/// Number of fused confidence features
pub const FEATURE_COUNT: usize = 6;

/// Inference pipeline that produced a result
///
/// Encodes how much of the inference ran through trusted model stages.
/// Unknown or malformed values deserialize as [`Pipeline::Heuristic`],
/// the least trusted encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Pipeline {
    /// All model stages ran
    FullModel,
    /// Only part of the model pipeline ran
    PartialModel,
    /// Heuristic-only analysis
    #[default]
    Heuristic,
    /// Canned demo output (service keys missing or demo mode)
    DemoFallback,
    /// Produced while recovering from an upstream error
    ErrorFallback,
    /// Image failed quality checks before inference
    QualityCheckFailed,
}

impl<'de> Deserialize<'de> for Pipeline {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Tolerant by contract: anything unrecognized is heuristic
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(value.as_str().map_or(Self::Heuristic, Self::from_label))
    }
}

impl Pipeline {
    /// Map a pipeline label to its variant; unknown labels are heuristic
    #[must_use]
    pub fn from_label(label: &str) -> Self {
        match label {
            "full_model" => Self::FullModel,
            "partial_model" => Self::PartialModel,
            "demo_fallback" => Self::DemoFallback,
            "error_fallback" => Self::ErrorFallback,
            "quality_check_failed" => Self::QualityCheckFailed,
            _ => Self::Heuristic,
        }
    }

    /// Trust encoding used as a calibration feature
    #[must_use]
    pub fn trust(self) -> f64 {
        match self {
            Self::FullModel => 1.0,
            Self::PartialModel => 0.5,
            Self::Heuristic
            | Self::DemoFallback
            | Self::ErrorFallback
            | Self::QualityCheckFailed => 0.0,
        }
    }

    /// Whether results from this pipeline may drive treatment content
    #[must_use]
    pub fn is_trusted(self) -> bool {
        matches!(self, Self::FullModel | Self::PartialModel)
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::FullModel => "full_model",
            Self::PartialModel => "partial_model",
            Self::Heuristic => "heuristic",
            Self::DemoFallback => "demo_fallback",
            Self::ErrorFallback => "error_fallback",
            Self::QualityCheckFailed => "quality_check_failed",
        };
        f.write_str(label)
    }
}

/// Confidence signals extracted from an inference result
///
/// Every field is optional; missing signals default to conservative values
/// during feature extraction, so calibration always succeeds.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct InferenceSignals {
    /// Image quality score [0,1]
    pub image_quality_score: Option<f64>,
    /// Severity index on the raw 0-100 scale
    pub severity_index: Option<f64>,
    /// Confidence in the severity estimate [0,1]
    pub severity_confidence: Option<f64>,
    /// Crop identification confidence [0,1]
    pub crop_confidence: Option<f64>,
    /// Overall model/LLM confidence [0,1]
    pub confidence: Option<f64>,
    /// Pipeline that produced the result
    pub pipeline: Pipeline,
}

/// Discrete risk band derived from calibrated confidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceBand {
    /// Calibrated confidence below 0.50
    Low,
    /// Calibrated confidence in [0.50, 0.75)
    Medium,
    /// Calibrated confidence at or above 0.75
    High,
}

impl ConfidenceBand {
    /// Band for a calibrated confidence score
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.75 {
            Self::High
        } else if score >= 0.50 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

impl fmt::Display for ConfidenceBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        f.write_str(label)
    }
}

/// Calibration method applied to a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    /// Pre-fitted logistic model over the feature vector
    Logistic,
    /// Temperature scaling of the raw confidence
    Temperature,
}

/// Calibrated confidence with its risk band and audit data
#[derive(Debug, Clone, Serialize)]
pub struct CalibrationOutput {
    /// Calibrated confidence [0,1]
    pub confidence: f64,
    /// Risk band for gating decisions
    pub band: ConfidenceBand,
    /// Method that produced the calibrated value
    pub method: CalibrationMethod,
    /// Raw confidence before calibration
    pub raw_confidence: f64,
    /// Extracted feature vector, for audit/export
    pub features: [f64; FEATURE_COUNT],
}

/// Pre-fitted calibration parameters loaded from disk
#[derive(Debug, Deserialize)]
struct CalibrationArtifact {
    temperature: Option<f64>,
    logistic_weights: Option<Vec<f64>>,
    logistic_bias: Option<f64>,
}

/// Calibrates confidence scores using a logistic model or temperature scaling
///
/// Parameters are loaded once at construction and read-only afterwards;
/// `calibrate` performs no I/O.
pub struct ConfidenceCalibrator {
    /// Temperature for fallback scaling (higher = more conservative)
    temperature: f64,
    /// Logistic feature weights, when a fitted artifact was loaded
    logistic_weights: Option<[f64; FEATURE_COUNT]>,
    /// Logistic bias term
    logistic_bias: f64,
}

impl ConfidenceCalibrator {
    /// Create a calibrator, loading the fitted artifact if configured
    ///
    /// A missing or malformed artifact is logged and ignored; the
    /// calibrator then falls back to temperature scaling.
    #[must_use]
    pub fn new(config: &CalibrationConfig) -> Self {
        let mut calibrator = Self {
            temperature: config.temperature,
            logistic_weights: None,
            logistic_bias: 0.0,
        };
        if let Some(path) = &config.artifact_path {
            calibrator.load_artifact(path);
        }
        calibrator
    }

    fn load_artifact(&mut self, path: &Path) {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read calibration artifact");
                return;
            }
        };
        let artifact: CalibrationArtifact = match serde_json::from_str(&contents) {
            Ok(artifact) => artifact,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to parse calibration artifact");
                return;
            }
        };

        if let Some(temperature) = artifact.temperature {
            self.temperature = temperature;
        }
        if let Some(bias) = artifact.logistic_bias {
            self.logistic_bias = bias;
        }
        if let Some(weights) = artifact.logistic_weights {
            match <[f64; FEATURE_COUNT]>::try_from(weights.as_slice()) {
                Ok(weights) => self.logistic_weights = Some(weights),
                Err(_) => {
                    warn!(
                        path = %path.display(),
                        got = weights.len(),
                        expected = FEATURE_COUNT,
                        "Ignoring logistic weights with wrong dimension"
                    );
                }
            }
        }

        info!(path = %path.display(), "Loaded calibration parameters");
    }

    /// Extract the feature vector from inference signals
    ///
    /// Missing fields default conservatively: image quality 0.8, severity
    /// and its confidence 0.0, crop confidence falls back to the overall
    /// confidence, overall confidence 0.5.
    #[allow(clippy::unused_self)]
    #[must_use]
    pub fn extract_features(&self, signals: &InferenceSignals) -> [f64; FEATURE_COUNT] {
        let image_quality = signals.image_quality_score.unwrap_or(0.8);
        let severity = (signals.severity_index.unwrap_or(0.0) / 100.0).min(1.0);
        let severity_confidence = signals.severity_confidence.unwrap_or(0.0);
        let crop_confidence = signals
            .crop_confidence
            .or(signals.confidence)
            .unwrap_or(0.5);
        let overall_confidence = signals.confidence.unwrap_or(0.5);
        let pipeline_trust = signals.pipeline.trust();

        [
            image_quality,
            severity,
            severity_confidence,
            crop_confidence,
            overall_confidence,
            pipeline_trust,
        ]
    }

    /// Calibrate inference signals into a confidence and risk band
    #[must_use]
    pub fn calibrate(&self, signals: &InferenceSignals) -> CalibrationOutput {
        let features = self.extract_features(signals);
        let raw_confidence = signals.confidence.unwrap_or(0.5);

        let (confidence, method) = match self.apply_logistic(&features) {
            Some(confidence) => (confidence, CalibrationMethod::Logistic),
            None => (
                self.apply_temperature_scaling(raw_confidence),
                CalibrationMethod::Temperature,
            ),
        };

        let band = ConfidenceBand::from_score(confidence);
        debug!(
            confidence,
            raw_confidence,
            band = %band,
            method = ?method,
            pipeline = %signals.pipeline,
            "Calibrated inference confidence"
        );

        CalibrationOutput {
            confidence,
            band,
            method,
            raw_confidence,
            features,
        }
    }

    /// Rescale raw confidence through temperature-adjusted log-odds
    fn apply_temperature_scaling(&self, raw_confidence: f64) -> f64 {
        const EPS: f64 = 1e-7;
        let clipped = raw_confidence.clamp(EPS, 1.0 - EPS);
        let logit = (clipped / (1.0 - clipped)).ln();
        sigmoid(logit / self.temperature)
    }

    /// Apply the fitted logistic model, if one was loaded
    fn apply_logistic(&self, features: &[f64; FEATURE_COUNT]) -> Option<f64> {
        let weights = self.logistic_weights.as_ref()?;
        let logit: f64 = features
            .iter()
            .zip(weights)
            .map(|(feature, weight)| feature * weight)
            .sum::<f64>()
            + self.logistic_bias;
        Some(sigmoid(logit))
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
