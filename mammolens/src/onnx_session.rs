//! ONNX Runtime classifier backend.
//!
//! Expects a model exported with three outputs: the malignant probability,
//! the last convolutional activations, and the gradient of the malignant
//! score with respect to those activations.

use crate::classifier::{Classifier, ClassifierOutput, InputSpec, TensorLayout};
use crate::color_utils::symbols;
use crate::config::ModelConfig;
use anyhow::{anyhow, Result};
use log::Level;
use ndarray::{Array3, Array4, ArrayViewD, Axis, Ix3};
use ort::{
    execution_providers::{CPUExecutionProvider, CoreMLExecutionProvider, ExecutionProvider},
    logging::LogLevel,
    session::Session,
    value::Value,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Mutex;

fn log_level_from_ort(level: LogLevel) -> Level {
    match level {
        LogLevel::Verbose => Level::Trace,
        LogLevel::Info => Level::Trace,
        LogLevel::Warning => Level::Debug,
        LogLevel::Error => Level::Info,
        LogLevel::Fatal => Level::Error,
    }
}

fn ort_level_from_log(level: Level) -> LogLevel {
    match level {
        // ONNX info output is closer to our debug/trace
        Level::Trace => LogLevel::Verbose,
        Level::Debug => LogLevel::Warning,
        Level::Info => LogLevel::Error,
        Level::Warn => LogLevel::Error,
        Level::Error => LogLevel::Fatal,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub model_path: String,
    pub model_size_bytes: usize,
    pub execution_providers: Vec<String>,
    /// SHA-256 of the model file
    pub model_checksum: String,
}

/// Device selection result
#[derive(Debug, Clone)]
pub struct DeviceSelection {
    pub device: String,
    pub reason: String,
}

/// Determine optimal device based on user preference
pub fn determine_optimal_device(requested_device: &str) -> DeviceSelection {
    match requested_device {
        "auto" => {
            // For auto, prefer CoreML if available, otherwise CPU
            let coreml = CoreMLExecutionProvider::default();
            match coreml.is_available() {
                Ok(true) => DeviceSelection {
                    device: "coreml".to_string(),
                    reason: "Auto-selected CoreML (available)".to_string(),
                },
                _ => DeviceSelection {
                    device: "cpu".to_string(),
                    reason: "Auto-selected CPU (CoreML not available)".to_string(),
                },
            }
        }
        other => DeviceSelection {
            device: other.to_string(),
            reason: format!("User explicitly chose {other}"),
        },
    }
}

fn execution_providers_for(
    device: &str,
) -> Vec<ort::execution_providers::ExecutionProviderDispatch> {
    match device {
        "coreml" => match CoreMLExecutionProvider::default().is_available() {
            Ok(true) => vec![
                CoreMLExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ],
            _ => {
                log::warn!(
                    "{}CoreML not available, falling back to CPU",
                    symbols::warning()
                );
                vec![CPUExecutionProvider::default().build()]
            }
        },
        "cpu" => vec![CPUExecutionProvider::default().build()],
        other => {
            log::warn!("{}Unknown device '{}', using CPU", symbols::warning(), other);
            vec![CPUExecutionProvider::default().build()]
        }
    }
}

/// Load the model file into an ONNX Runtime session
pub fn create_onnx_session(config: &ModelConfig) -> Result<(Session, ModelInfo)> {
    let bytes = std::fs::read(&config.model_path).map_err(|e| {
        anyhow!(
            "Failed to read model {}: {}",
            config.model_path.display(),
            e
        )
    })?;

    let selection = determine_optimal_device(&config.device);
    log::debug!("{}{}", symbols::system_setup(), selection.reason);

    let execution_providers = execution_providers_for(&selection.device);
    let ep_names: Vec<String> = execution_providers
        .iter()
        .map(|ep| format!("{ep:?}"))
        .collect();

    // Choose the ORT log level based on what is enabled for us
    let ort_log_level = [
        Level::Trace,
        Level::Debug,
        Level::Info,
        Level::Warn,
        Level::Error,
    ]
    .into_iter()
    .find(|&lvl| log::log_enabled!(lvl))
    .map(ort_level_from_log)
    .unwrap_or(LogLevel::Fatal);

    let session = Session::builder()
        .map_err(|e| anyhow!("Failed to create session builder: {}", e))?
        .with_logger(Box::new(|level, _, _, _, msg| {
            let log_level = log_level_from_ort(level);
            log::log!(log_level, "[onnx] {msg}")
        }))
        .map_err(|e| anyhow!("Failed to set logger: {}", e))?
        .with_log_level(ort_log_level)
        .map_err(|e| anyhow!("Failed to set log level: {}", e))?
        .with_execution_providers(execution_providers)
        .map_err(|e| anyhow!("Failed to set execution providers: {}", e))?
        .commit_from_memory(&bytes)
        .map_err(|e| anyhow!("Failed to load model from memory: {}", e))?;

    let model_info = ModelInfo {
        model_path: config.model_path.display().to_string(),
        model_size_bytes: bytes.len(),
        execution_providers: ep_names,
        model_checksum: format!("{:x}", Sha256::digest(&bytes)),
    };

    log::debug!(
        "{}Execution providers registered: {}",
        symbols::system_setup(),
        model_info.execution_providers.join(" -> ")
    );

    Ok((session, model_info))
}

/// Reshape a (1, C, H, W) / (1, H, W, C) output, or its batchless form, to (C, H, W)
pub fn to_chw(view: ArrayViewD<'_, f32>, layout: TensorLayout) -> Result<Array3<f32>> {
    let shape = view.shape().to_vec();
    let view = match shape.len() {
        4 if shape[0] == 1 => view.index_axis_move(Axis(0), 0),
        3 => view,
        _ => anyhow::bail!("Expected a 3D or single-batch 4D feature tensor, got shape {shape:?}"),
    };
    let view = view
        .into_dimensionality::<Ix3>()
        .map_err(|e| anyhow!("Unexpected feature tensor shape {shape:?}: {e}"))?;
    let chw = match layout {
        TensorLayout::Nchw => view,
        TensorLayout::Nhwc => view.permuted_axes([2, 0, 1]),
    };
    Ok(chw.as_standard_layout().into_owned())
}

/// Malignant probability from a (1,), (1, 1) or two-class (1, 2) output
pub fn probability_from(view: ArrayViewD<'_, f32>) -> Result<f32> {
    let values: Vec<f32> = view.iter().copied().collect();
    match values.as_slice() {
        [p] => Ok(*p),
        [_, malignant] => Ok(*malignant),
        _ => Err(anyhow!(
            "Expected 1 or 2 probability values, got shape {:?}",
            view.shape()
        )),
    }
}

/// Classifier backed by an ONNX Runtime session
pub struct OnnxClassifier {
    session: Mutex<Session>,
    input_name: String,
    config: ModelConfig,
    info: ModelInfo,
}

impl OnnxClassifier {
    pub fn load(config: &ModelConfig) -> Result<Self> {
        let (session, info) = create_onnx_session(config)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .ok_or_else(|| anyhow!("Model has no inputs"))?;
        let output_names: Vec<&str> = session.outputs.iter().map(|o| o.name.as_str()).collect();
        for required in [
            &config.probability_output,
            &config.activations_output,
            &config.gradients_output,
        ] {
            if !output_names.contains(&required.as_str()) {
                anyhow::bail!(
                    "Model output '{}' not found; available outputs: {}",
                    required,
                    output_names.join(", ")
                );
            }
        }

        log::info!(
            "{}Loaded classifier {} ({} bytes)",
            symbols::model_loaded(),
            info.model_path,
            info.model_size_bytes
        );

        Ok(Self {
            session: Mutex::new(session),
            input_name,
            config: config.clone(),
            info,
        })
    }

    pub fn info(&self) -> &ModelInfo {
        &self.info
    }
}

impl Classifier for OnnxClassifier {
    fn name(&self) -> &str {
        &self.info.model_path
    }

    fn input_spec(&self) -> InputSpec {
        self.config.input
    }

    fn classify(&self, input: &Array4<f32>) -> Result<ClassifierOutput> {
        let input_value = Value::from_array(input.clone())
            .map_err(|e| anyhow!("Failed to create input value: {}", e))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| anyhow!("ONNX session lock poisoned"))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => &input_value])
            .map_err(|e| anyhow!("Failed to run inference: {}", e))?;

        let extract = |name: &str| {
            outputs[name]
                .try_extract_array::<f32>()
                .map_err(|e| anyhow!("Failed to extract output '{}': {}", name, e))
        };

        let probability = probability_from(extract(&self.config.probability_output)?)?;
        let activations = to_chw(
            extract(&self.config.activations_output)?,
            self.config.activation_layout,
        )?;
        let gradients = to_chw(
            extract(&self.config.gradients_output)?,
            self.config.activation_layout,
        )?;

        Ok(ClassifierOutput {
            probability,
            activations,
            gradients,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array, Array2, IxDyn};

    #[test]
    fn test_to_chw_from_nchw() {
        let data = Array::from_shape_fn(IxDyn(&[1, 2, 3, 4]), |idx| {
            (idx[1] * 100 + idx[2] * 10 + idx[3]) as f32
        });
        let chw = to_chw(data.view(), TensorLayout::Nchw).unwrap();
        assert_eq!(chw.shape(), &[2, 3, 4]);
        assert_eq!(chw[[1, 2, 3]], 123.0);
    }

    #[test]
    fn test_to_chw_from_nhwc() {
        let data = Array::from_shape_fn(IxDyn(&[1, 3, 4, 2]), |idx| {
            (idx[3] * 100 + idx[1] * 10 + idx[2]) as f32
        });
        let chw = to_chw(data.view(), TensorLayout::Nhwc).unwrap();
        assert_eq!(chw.shape(), &[2, 3, 4]);
        assert_eq!(chw[[1, 2, 3]], 123.0);
        assert!(chw.is_standard_layout());
    }

    #[test]
    fn test_to_chw_rejects_batches() {
        let data = Array::<f32, _>::zeros(IxDyn(&[2, 1, 3, 3]));
        assert!(to_chw(data.view(), TensorLayout::Nchw).is_err());
    }

    #[test]
    fn test_probability_shapes() {
        let single = Array2::from_elem((1, 1), 0.7f32).into_dyn();
        assert_eq!(probability_from(single.view()).unwrap(), 0.7);

        let two_class = Array2::from_shape_vec((1, 2), vec![0.2f32, 0.8]).unwrap().into_dyn();
        assert_eq!(probability_from(two_class.view()).unwrap(), 0.8);

        let many = Array2::<f32>::zeros((1, 5)).into_dyn();
        assert!(probability_from(many.view()).is_err());
    }

    #[test]
    fn test_explicit_device_selection() {
        let selection = determine_optimal_device("cpu");
        assert_eq!(selection.device, "cpu");
        assert!(selection.reason.contains("cpu"));
    }

    #[test]
    fn test_missing_model_file() {
        let config = ModelConfig::new("/nonexistent/model.onnx");
        let err = OnnxClassifier::load(&config).err().unwrap();
        assert!(err.to_string().contains("Failed to read model"));
    }
}
