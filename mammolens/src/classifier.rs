//! The classifier seam: a pluggable backend that returns the malignancy
//! probability together with the last convolutional activations and their
//! gradients, plus the shared preprocessing that turns an image into its input.

use anyhow::Result;
use image::imageops::FilterType;
use image::DynamicImage;
use ndarray::{Array3, Array4};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Default square input edge, in pixels
pub const DEFAULT_INPUT_SIZE: u32 = 224;

/// Memory order of the classifier's input tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// (batch, channel, height, width)
    #[default]
    Nchw,
    /// (batch, height, width, channel)
    Nhwc,
}

impl FromStr for TensorLayout {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nchw" => Ok(TensorLayout::Nchw),
            "nhwc" => Ok(TensorLayout::Nhwc),
            other => Err(format!("Unknown tensor layout '{other}'. Use nchw or nhwc")),
        }
    }
}

impl fmt::Display for TensorLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TensorLayout::Nchw => write!(f, "nchw"),
            TensorLayout::Nhwc => write!(f, "nhwc"),
        }
    }
}

/// What the classifier expects as input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputSpec {
    /// Square edge length the image is resized to
    pub size: u32,
    pub layout: TensorLayout,
}

impl Default for InputSpec {
    fn default() -> Self {
        Self {
            size: DEFAULT_INPUT_SIZE,
            layout: TensorLayout::Nchw,
        }
    }
}

/// One forward/backward pass of the classifier
#[derive(Debug, Clone)]
pub struct ClassifierOutput {
    /// Probability of the malignant class, expected in [0, 1]
    pub probability: f32,
    /// Last convolutional activations, shape (C, H', W')
    pub activations: Array3<f32>,
    /// Gradient of the malignant score w.r.t. `activations`, same shape
    pub gradients: Array3<f32>,
}

/// A loaded classifier backend.
///
/// Implementations must be safe to call from several threads at once.
pub trait Classifier: Send + Sync {
    /// Short backend description for logs
    fn name(&self) -> &str;

    fn input_spec(&self) -> InputSpec;

    /// Run the model on a preprocessed batch of one image
    fn classify(&self, input: &Array4<f32>) -> Result<ClassifierOutput>;
}

/// Shared handle to a loaded classifier. Load once, clone freely.
#[derive(Clone)]
pub struct ClassifierHandle {
    inner: Arc<dyn Classifier>,
}

impl ClassifierHandle {
    pub fn new<C: Classifier + 'static>(classifier: C) -> Self {
        Self {
            inner: Arc::new(classifier),
        }
    }

    pub fn from_arc(inner: Arc<dyn Classifier>) -> Self {
        Self { inner }
    }

    pub fn name(&self) -> &str {
        self.inner.name()
    }

    pub fn input_spec(&self) -> InputSpec {
        self.inner.input_spec()
    }

    pub fn classify(&self, input: &Array4<f32>) -> Result<ClassifierOutput> {
        self.inner.classify(input)
    }
}

impl fmt::Debug for ClassifierHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassifierHandle")
            .field("name", &self.inner.name())
            .field("input_spec", &self.inner.input_spec())
            .finish()
    }
}

/// Resize to the classifier input size and scale to [0, 1].
///
/// Grayscale and alpha images are collapsed to RGB first.
pub fn preprocess_image(img: &DynamicImage, spec: InputSpec) -> Array4<f32> {
    let rgb_img = img.to_rgb8();
    let size = spec.size;
    let resized = image::imageops::resize(&rgb_img, size, size, FilterType::Lanczos3);
    let n = size as usize;

    match spec.layout {
        TensorLayout::Nchw => Array4::from_shape_fn((1, 3, n, n), |(_, c, y, x)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        }),
        TensorLayout::Nhwc => Array4::from_shape_fn((1, n, n, 3), |(_, y, x, c)| {
            resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        }),
    }
}
