//! Error taxonomy for the analysis pipeline.
//!
//! Everything from input decoding to risk aggregation reports through
//! [`AnalysisError`]. Application layers (CLI, report writing, config loading)
//! wrap these in `anyhow` with extra context.

use std::time::Duration;
use thiserror::Error;

/// Errors raised by [`crate::pipeline::analyze`] and its stages
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// Malformed, undecodable or rejected input image. Always raised before the classifier runs.
    #[error("Invalid input image: {0}")]
    Input(String),

    /// The classifier returned a probability outside [0, 1] (or NaN)
    #[error("Classifier returned probability {0} outside [0, 1]")]
    InvalidProbability(f32),

    /// Numerical failure while building the saliency map
    #[error("Degenerate saliency map: {0}")]
    DegenerateMap(String),

    /// The classifier backend itself failed
    #[error("Classifier failure: {0}")]
    Classifier(#[source] anyhow::Error),

    /// Whole-image analysis exceeded the caller's deadline
    #[error("Analysis timed out after {0:?}")]
    Timeout(Duration),
}

impl AnalysisError {
    /// Short machine-readable kind, used in reports and logs
    pub fn kind(&self) -> &'static str {
        match self {
            AnalysisError::Input(_) => "input",
            AnalysisError::InvalidProbability(_) => "invalid_probability",
            AnalysisError::DegenerateMap(_) => "degenerate_map",
            AnalysisError::Classifier(_) => "classifier",
            AnalysisError::Timeout(_) => "timeout",
        }
    }
}
