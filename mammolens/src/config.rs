//! Configuration layer providing clean separation between CLI arguments and internal configuration.
//!
//! - `GlobalArgs` / `BaseConfig`: options shared by every command
//! - `AnalysisConfig`: pipeline parameters, loadable from a TOML params file
//! - `ModelConfig`: how to load and call the ONNX classifier
//! - Command structs (`AnalyzeCommand`, `DedupCommand`) converted with `from_args`
//!
//! CLI concerns (argument parsing, help text) stay in the command structs; the
//! internal configs are plain serde types.

use anyhow::{Context, Result};
use clap::Parser;
use clap_verbosity_flag::Verbosity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::classifier::{InputSpec, TensorLayout, DEFAULT_INPUT_SIZE};
use crate::clinical::{ClinicalParams, Laterality, DEFAULT_CENTRAL_BAND};
use crate::regions::RegionParams;
use crate::threshold::ThresholdPolicy;
use crate::validation::ValidationParams;
use crate::visualization::{ColorMap, OverlayStyle, DEFAULT_OVERLAY_ALPHA};

/// Parse probability value (must be between 0.0 and 1.0)
pub fn parse_probability(s: &str) -> Result<f32, String> {
    let val = s
        .parse::<f32>()
        .map_err(|_| format!("Invalid number: '{s}'"))?;
    if !(0.0..=1.0).contains(&val) {
        return Err(format!("Must be between 0.0 and 1.0, got {val}"));
    }
    Ok(val)
}

/// Parse a strictly positive integer
pub fn parse_positive(s: &str) -> Result<usize, String> {
    let val = s
        .parse::<usize>()
        .map_err(|_| format!("Invalid number: '{s}'"))?;
    if val == 0 {
        return Err("Must be at least 1".to_string());
    }
    Ok(val)
}

/// Global CLI arguments that apply to all mammolens commands
#[derive(Parser, Debug, Clone)]
pub struct GlobalArgs {
    /// Global output directory (overrides default placement next to input)
    #[arg(long, global = true)]
    pub output_dir: Option<String>,

    /// Verbosity level (-q/--quiet, -v/-vv/-vvv/-vvvv for info/debug/trace)
    #[command(flatten)]
    pub verbosity: Verbosity,

    /// Use permissive mode for input collection (warn instead of error for unsupported files)
    #[arg(long, global = true)]
    pub permissive: bool,

    /// Device to use for inference (auto, cpu, coreml)
    #[arg(long, default_value = "auto", global = true)]
    pub device: String,

    /// Disable colored output (also respects NO_COLOR and MAMMOLENS_NO_COLOR env vars)
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Allow overwriting existing outputs
    #[arg(long, global = true)]
    pub force: bool,
}

/// Configuration common to all commands
#[derive(Debug, Clone, Serialize)]
pub struct BaseConfig {
    /// Input sources (images, directories or glob patterns)
    pub sources: Vec<String>,
    /// Device for inference
    pub device: String,
    /// Optional output directory override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<String>,
    /// Use strict mode (fail if files are not found or are unsupported). Opposite of `--permissive`.
    pub strict: bool,
    /// Allow overwriting existing outputs
    pub force: bool,
}

impl From<GlobalArgs> for BaseConfig {
    fn from(global: GlobalArgs) -> Self {
        Self {
            sources: Vec::new(), // Sources come from command, not global args
            device: global.device,
            output_dir: global.output_dir,
            strict: !global.permissive, // Note: CLI uses permissive, internal uses strict
            force: global.force,
        }
    }
}

/// Pipeline parameters. Every field has a default, so a params file may set any subset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// How the foreground cutoff is derived from each saliency map
    pub threshold: ThresholdPolicy,
    /// Components smaller than this are discarded as noise
    pub min_region_area_px: u32,
    /// Keep at most this many regions; `None` keeps all
    pub max_regions: Option<usize>,
    /// Width of the central band around the midlines, as a fraction of each dimension
    pub central_band: f32,
    pub laterality: Laterality,
    /// Restrict regions to the tissue mask
    pub tissue_gating: bool,
    /// Reject implausible images before calling the classifier
    pub validate_input: bool,
    pub validation: ValidationParams,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        let regions = RegionParams::default();
        Self {
            threshold: ThresholdPolicy::default(),
            min_region_area_px: regions.min_area_px,
            max_regions: regions.max_regions,
            central_band: DEFAULT_CENTRAL_BAND,
            laterality: Laterality::Unknown,
            tissue_gating: false,
            validate_input: true,
            validation: ValidationParams::default(),
        }
    }
}

impl AnalysisConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: AnalysisConfig = toml::from_str(text).context("Invalid analysis parameters")?;
        config.check()?;
        Ok(config)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read params file {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("In params file {}", path.display()))
    }

    /// Reject values no analysis could use
    pub fn check(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.central_band) {
            anyhow::bail!(
                "central_band must be between 0.0 and 1.0, got {}",
                self.central_band
            );
        }
        match self.threshold {
            ThresholdPolicy::Fixed { value } if !(0.0..=1.0).contains(&value) => {
                anyhow::bail!("fixed threshold must be between 0.0 and 1.0, got {value}")
            }
            ThresholdPolicy::TopPercentile { percent } if !(0.0..=100.0).contains(&percent) => {
                anyhow::bail!("top percentile must be between 0 and 100, got {percent}")
            }
            ThresholdPolicy::MeanStd { k } if !k.is_finite() => {
                anyhow::bail!("mean-std factor must be finite, got {k}")
            }
            _ => Ok(()),
        }
    }

    pub fn region_params(&self) -> RegionParams {
        RegionParams {
            min_area_px: self.min_region_area_px,
            max_regions: self.max_regions,
        }
    }

    pub fn clinical_params(&self) -> ClinicalParams {
        ClinicalParams {
            laterality: self.laterality,
            central_band: self.central_band,
        }
    }
}

/// How to load and call the ONNX classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    /// Device for inference (auto, cpu, coreml)
    pub device: String,
    pub input: InputSpec,
    /// Output holding the malignant probability
    pub probability_output: String,
    /// Output holding the last convolutional activations
    pub activations_output: String,
    /// Output holding the gradient of the malignant score w.r.t. the activations
    pub gradients_output: String,
    /// Layout of the activation and gradient outputs
    pub activation_layout: TensorLayout,
}

impl ModelConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            device: "auto".to_string(),
            input: InputSpec::default(),
            probability_output: "probability".to_string(),
            activations_output: "activations".to_string(),
            gradients_output: "gradients".to_string(),
            activation_layout: TensorLayout::Nchw,
        }
    }
}

/// Which images to write next to each JSON report
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderOptions {
    pub heatmap: bool,
    pub overlay: bool,
    pub annotated: bool,
    pub style: OverlayStyle,
    /// Only tint breast tissue in overlays, leaving the background untouched
    pub tissue_only: bool,
    /// Font for region labels on annotated images
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_path: Option<PathBuf>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            heatmap: false,
            overlay: false,
            annotated: false,
            style: OverlayStyle::default(),
            tissue_only: true,
            font_path: None,
        }
    }
}

/// CLI command for analysis (only command-specific arguments)
#[derive(Parser, Debug, Clone)]
pub struct AnalyzeCommand {
    /// Path(s) to input images or directories. Supports glob patterns like *.png
    #[arg(value_name = "IMAGES_OR_DIRS", required = true)]
    pub sources: Vec<String>,

    /// ONNX classifier exporting probability, activations and gradients
    #[arg(long, value_name = "MODEL")]
    pub model_path: PathBuf,

    /// TOML file with analysis parameters; flags below override it
    #[arg(long, value_name = "FILE")]
    pub params: Option<PathBuf>,

    /// Threshold policy: a number, fixed:X, mean-std:K or top:P
    #[arg(long)]
    pub threshold: Option<ThresholdPolicy>,

    /// Minimum region area in pixels
    #[arg(long)]
    pub min_area: Option<u32>,

    /// Maximum number of regions to report
    #[arg(long)]
    pub max_regions: Option<usize>,

    /// Breast laterality (left, right, unknown)
    #[arg(long)]
    pub laterality: Option<Laterality>,

    /// Restrict regions to detected breast tissue
    #[arg(long)]
    pub tissue_gating: bool,

    /// Skip the mammogram plausibility checks
    #[arg(long)]
    pub no_validate: bool,

    /// Classifier input size in pixels
    #[arg(long, default_value_t = DEFAULT_INPUT_SIZE)]
    pub input_size: u32,

    /// Classifier input layout (nchw, nhwc)
    #[arg(long, default_value = "nchw")]
    pub input_layout: TensorLayout,

    /// Layout of the activation/gradient outputs (nchw, nhwc)
    #[arg(long, default_value = "nchw")]
    pub activation_layout: TensorLayout,

    /// Name of the probability output
    #[arg(long, default_value = "probability")]
    pub probability_output: String,

    /// Name of the activations output
    #[arg(long, default_value = "activations")]
    pub activations_output: String,

    /// Name of the gradients output
    #[arg(long, default_value = "gradients")]
    pub gradients_output: String,

    /// Save the color-mapped saliency map
    #[arg(long)]
    pub heatmap: bool,

    /// Save the saliency map blended over the image
    #[arg(long)]
    pub overlay: bool,

    /// Save the image with region boxes drawn
    #[arg(long)]
    pub annotated: bool,

    /// Colormap for heatmap and overlay (jet, viridis, inferno, grayscale)
    #[arg(long, default_value = "jet")]
    pub colormap: ColorMap,

    /// Tint the whole overlay, including the background outside breast tissue
    #[arg(long)]
    pub overlay_background: bool,

    /// Heatmap opacity in overlays (0.0-1.0)
    #[arg(long, default_value_t = DEFAULT_OVERLAY_ALPHA, value_parser = parse_probability)]
    pub alpha: f32,

    /// TTF/OTF font used to label regions on annotated images
    #[arg(long, value_name = "FONT")]
    pub font: Option<PathBuf>,

    /// Number of images analyzed concurrently
    #[arg(long, default_value = "1", value_parser = parse_positive)]
    pub jobs: usize,

    /// Per-image time limit in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,
}

/// Internal configuration for the analyze command
#[derive(Debug, Clone, Serialize)]
pub struct AnalyzeConfig {
    #[serde(skip)]
    pub base: BaseConfig,
    pub model: ModelConfig,
    pub analysis: AnalysisConfig,
    pub render: RenderOptions,
    pub jobs: usize,
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl AnalyzeConfig {
    /// Create configuration from global args and command-specific args
    pub fn from_args(global: GlobalArgs, cmd: AnalyzeCommand) -> Result<Self> {
        let mut base: BaseConfig = global.into();
        base.sources = cmd.sources; // Add sources from command

        let mut analysis = match &cmd.params {
            Some(path) => AnalysisConfig::from_toml_file(path)?,
            None => AnalysisConfig::default(),
        };
        if let Some(threshold) = cmd.threshold {
            analysis.threshold = threshold;
        }
        if let Some(min_area) = cmd.min_area {
            analysis.min_region_area_px = min_area;
        }
        if let Some(max_regions) = cmd.max_regions {
            analysis.max_regions = Some(max_regions);
        }
        if let Some(laterality) = cmd.laterality {
            analysis.laterality = laterality;
        }
        if cmd.tissue_gating {
            analysis.tissue_gating = true;
        }
        if cmd.no_validate {
            analysis.validate_input = false;
        }
        analysis.check()?;

        let model = ModelConfig {
            model_path: cmd.model_path,
            device: base.device.clone(),
            input: InputSpec {
                size: cmd.input_size,
                layout: cmd.input_layout,
            },
            probability_output: cmd.probability_output,
            activations_output: cmd.activations_output,
            gradients_output: cmd.gradients_output,
            activation_layout: cmd.activation_layout,
        };

        let render = RenderOptions {
            heatmap: cmd.heatmap,
            overlay: cmd.overlay,
            annotated: cmd.annotated,
            style: OverlayStyle {
                colormap: cmd.colormap,
                alpha: cmd.alpha,
            },
            tissue_only: !cmd.overlay_background,
            font_path: cmd.font,
        };

        Ok(Self {
            base,
            model,
            analysis,
            render,
            jobs: cmd.jobs,
            timeout: cmd.timeout_secs.map(Duration::from_secs),
        })
    }
}

/// CLI command for duplicate detection
#[derive(Parser, Debug, Clone)]
pub struct DedupCommand {
    /// Image files to compare; every pair is checked
    #[arg(value_name = "IMAGES", required = true, num_args = 2..)]
    pub files: Vec<String>,
}

/// Internal configuration for the dedup command
#[derive(Debug, Clone, Serialize)]
pub struct DedupConfig {
    #[serde(skip)]
    pub base: BaseConfig,
}

impl DedupConfig {
    pub fn from_args(global: GlobalArgs, cmd: DedupCommand) -> Result<Self, String> {
        let mut base: BaseConfig = global.into();
        base.sources = cmd.files;
        Ok(Self { base })
    }
}
