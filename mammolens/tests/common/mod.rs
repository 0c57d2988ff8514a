//! Synthetic classifier and images shared by the integration tests.
#![allow(dead_code)]

use image::{DynamicImage, GrayImage, Luma};
use mammolens::{Classifier, ClassifierHandle, ClassifierOutput, InputSpec};
use ndarray::{Array2, Array3, Array4, Axis};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const SIZE: u32 = 100;

/// Returns a fixed probability and a single activation channel with unit
/// gradients, so the saliency map is the normalized activation grid.
pub struct FixedClassifier {
    pub probability: f32,
    pub activation: Array2<f32>,
    pub calls: Arc<AtomicUsize>,
}

impl Classifier for FixedClassifier {
    fn name(&self) -> &str {
        "fixed"
    }

    fn input_spec(&self) -> InputSpec {
        InputSpec {
            size: 32,
            ..InputSpec::default()
        }
    }

    fn classify(&self, input: &Array4<f32>) -> anyhow::Result<ClassifierOutput> {
        assert_eq!(input.shape(), &[1, 3, 32, 32]);
        self.calls.fetch_add(1, Ordering::SeqCst);
        let activations: Array3<f32> = self.activation.clone().insert_axis(Axis(0));
        let gradients = Array3::ones(activations.raw_dim());
        Ok(ClassifierOutput {
            probability: self.probability,
            activations,
            gradients,
        })
    }
}

pub fn handle(probability: f32, activation: Array2<f32>) -> ClassifierHandle {
    counting_handle(probability, activation).0
}

pub fn counting_handle(
    probability: f32,
    activation: Array2<f32>,
) -> (ClassifierHandle, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let classifier = FixedClassifier {
        probability,
        activation,
        calls: calls.clone(),
    };
    (ClassifierHandle::new(classifier), calls)
}

/// Grayscale texture that passes the mammogram plausibility checks
pub fn textured_image() -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_fn(SIZE, SIZE, |x, y| {
        Luma([(50 + (x * 5 + y * 3) % 100) as u8])
    }))
}

/// `value` inside each `(x0, y0, x1, y1)` rectangle (half-open), zero elsewhere
pub fn blobs(rects: &[(usize, usize, usize, usize, f32)]) -> Array2<f32> {
    let mut grid = Array2::zeros((SIZE as usize, SIZE as usize));
    for &(x0, y0, x1, y1, value) in rects {
        for y in y0..y1 {
            for x in x0..x1 {
                grid[[y, x]] = value;
            }
        }
    }
    grid
}

/// One 25x20 hotspot covering 5% of a 100x100 image
pub fn single_hotspot() -> Array2<f32> {
    blobs(&[(10, 60, 35, 80, 1.0)])
}

/// A weaker hotspot upper-left and a stronger one lower-right
pub fn two_hotspots() -> Array2<f32> {
    blobs(&[(10, 10, 30, 30, 0.65), (60, 60, 80, 80, 1.0)])
}
