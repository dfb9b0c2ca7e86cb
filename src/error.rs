//! Error types for the cropguard control plane

use std::io;

use thiserror::Error;

/// Result type alias for cropguard
pub type Result<T> = std::result::Result<T, Error>;

/// Control plane errors
///
/// Only the configuration and artifact-loading boundary produces errors.
/// Admission, breaker, cache, metrics, calibration and gating decisions
/// never fail; they always return a usable value.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
