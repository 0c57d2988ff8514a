//! Explainable mammogram classification.
//!
//! An external classifier produces a malignancy probability together with
//! last-layer activations and gradients. Everything downstream is
//! deterministic: a Grad-CAM saliency map, thresholded candidate regions,
//! descriptive per-region attributes and a risk tier with a short narrative.
//! A separate [`duplicate`] module flags exact and near-duplicate uploads.

pub mod batch;
pub mod classifier;
pub mod clinical;
pub mod color_utils;
pub mod commands;
pub mod config;
pub mod duplicate;
pub mod error;
pub mod image_input;
pub mod onnx_session;
pub mod output_manager;
pub mod pipeline;
pub mod regions;
pub mod risk;
pub mod saliency;
pub mod threshold;
pub mod tissue;
pub mod validation;
pub mod visualization;

pub use classifier::{Classifier, ClassifierHandle, ClassifierOutput, InputSpec, TensorLayout};
pub use config::AnalysisConfig;
pub use error::AnalysisError;
pub use pipeline::{analyze, analyze_bytes, AnalysisOutcome};
pub use risk::{AnalysisResult, RiskTier};
