//! Single-image analysis: validation, classification and the deterministic
//! post-processing chain (saliency, regions, clinical attributes, risk).
//!
//! The only non-deterministic collaborator is the classifier; everything after
//! its output is a pure function of that output and the input image.

use image::DynamicImage;
use ndarray::Array4;
use std::path::Path;

use crate::classifier::{preprocess_image, ClassifierHandle, ClassifierOutput, InputSpec};
use crate::clinical;
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::regions::extract_regions;
use crate::risk::{self, AnalysisResult, ImageStatistics};
use crate::saliency::{self, SaliencyMap};
use crate::tissue::TissueMask;
use crate::validation;

/// The analysis record together with the saliency map it was derived from
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub result: AnalysisResult,
    pub saliency: SaliencyMap,
}

/// Check the image and build the classifier input. Runs before any classifier call.
pub fn prepare(
    img: &DynamicImage,
    spec: InputSpec,
    config: &AnalysisConfig,
) -> Result<Array4<f32>, AnalysisError> {
    if img.width() == 0 || img.height() == 0 {
        return Err(AnalysisError::Input("image has no pixels".to_string()));
    }
    if config.validate_input {
        validation::validate(img, &config.validation)?;
    }
    if spec.size == 0 {
        return Err(AnalysisError::Input(
            "classifier input size must be positive".to_string(),
        ));
    }
    Ok(preprocess_image(img, spec))
}

/// Turn one classifier output into the final analysis for `img`
pub fn postprocess(
    img: &DynamicImage,
    output: &ClassifierOutput,
    config: &AnalysisConfig,
) -> Result<AnalysisOutcome, AnalysisError> {
    let probability = risk::validate_probability(output.probability)?;
    let (width, height) = (img.width(), img.height());

    let map = saliency::generate(&output.activations, &output.gradients, width, height)?;
    let cutoff = config.threshold.resolve(&map);
    log::debug!(
        "Threshold {} resolved to {:.4}",
        config.threshold.describe(),
        cutoff
    );

    let tissue = config.tissue_gating.then(|| TissueMask::from_image(img));
    let mut regions = extract_regions(&map, cutoff, &config.region_params(), tissue.as_ref());

    let gray = img.to_luma32f();
    clinical::annotate(&mut regions, &map, Some(&gray), &config.clinical_params());

    let result = risk::aggregate(
        probability,
        &map,
        cutoff,
        regions,
        ImageStatistics::from_image(img),
    )?;

    Ok(AnalysisOutcome {
        result,
        saliency: map,
    })
}

/// Analyze a decoded image
pub fn analyze(
    handle: &ClassifierHandle,
    img: &DynamicImage,
    config: &AnalysisConfig,
) -> Result<AnalysisOutcome, AnalysisError> {
    let input = prepare(img, handle.input_spec(), config)?;
    let output = handle.classify(&input).map_err(AnalysisError::Classifier)?;
    log::debug!(
        "{} returned probability {:.4} with {:?} activations",
        handle.name(),
        output.probability,
        output.activations.shape()
    );
    postprocess(img, &output, config)
}

/// Decode `bytes` and analyze the image
pub fn analyze_bytes(
    handle: &ClassifierHandle,
    bytes: &[u8],
    config: &AnalysisConfig,
) -> Result<AnalysisOutcome, AnalysisError> {
    let img = decode_image(bytes)?;
    analyze(handle, &img, config)
}

pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, AnalysisError> {
    image::load_from_memory(bytes)
        .map_err(|e| AnalysisError::Input(format!("cannot decode image: {e}")))
}

/// Read and decode an image file
pub fn load_image(path: &Path) -> Result<DynamicImage, AnalysisError> {
    let bytes = std::fs::read(path)
        .map_err(|e| AnalysisError::Input(format!("cannot read {}: {e}", path.display())))?;
    decode_image(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Classifier;
    use image::{GrayImage, Luma};
    use ndarray::Array3;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingClassifier {
        calls: Arc<AtomicUsize>,
        probability: f32,
    }

    impl Classifier for CountingClassifier {
        fn name(&self) -> &str {
            "counting"
        }

        fn input_spec(&self) -> InputSpec {
            InputSpec {
                size: 16,
                ..InputSpec::default()
            }
        }

        fn classify(&self, _input: &Array4<f32>) -> anyhow::Result<ClassifierOutput> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ClassifierOutput {
                probability: self.probability,
                activations: Array3::zeros((2, 4, 4)),
                gradients: Array3::zeros((2, 4, 4)),
            })
        }
    }

    fn textured() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(32, 32, |x, y| {
            Luma([(50 + (x * 5 + y * 3) % 100) as u8])
        }))
    }

    fn counting(probability: f32) -> (ClassifierHandle, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = ClassifierHandle::new(CountingClassifier {
            calls: calls.clone(),
            probability,
        });
        (handle, calls)
    }

    #[test]
    fn test_undecodable_bytes_never_reach_classifier() {
        let (handle, calls) = counting(0.5);
        let err = analyze_bytes(&handle, b"not an image", &AnalysisConfig::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::Input(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rejected_image_never_reaches_classifier() {
        let (handle, calls) = counting(0.5);
        let flat = DynamicImage::ImageLuma8(GrayImage::from_pixel(32, 32, Luma([128])));
        let err = analyze(&handle, &flat, &AnalysisConfig::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::Input(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // Same image passes once validation is off
        let config = AnalysisConfig {
            validate_input: false,
            ..AnalysisConfig::default()
        };
        assert!(analyze(&handle, &flat, &config).is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_invalid_probability_is_fatal() {
        let (handle, _) = counting(1.3);
        let err = analyze(&handle, &textured(), &AnalysisConfig::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidProbability(p) if p == 1.3));
    }

    #[test]
    fn test_zero_map_gives_no_regions() {
        let (handle, calls) = counting(0.05);
        let outcome = analyze(&handle, &textured(), &AnalysisConfig::default()).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.saliency.width(), 32);
        assert_eq!(outcome.saliency.height(), 32);
        assert!(outcome.result.regions.is_empty());
        assert!(outcome
            .result
            .summary
            .starts_with("0 suspicious region(s) detected"));
    }

    #[test]
    fn test_classifier_failure_is_wrapped() {
        struct Failing;
        impl Classifier for Failing {
            fn name(&self) -> &str {
                "failing"
            }
            fn input_spec(&self) -> InputSpec {
                InputSpec::default()
            }
            fn classify(&self, _input: &Array4<f32>) -> anyhow::Result<ClassifierOutput> {
                anyhow::bail!("out of memory")
            }
        }

        let handle = ClassifierHandle::new(Failing);
        let err = analyze(&handle, &textured(), &AnalysisConfig::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::Classifier(_)));
        assert!(err.to_string().contains("out of memory"));
    }
}
