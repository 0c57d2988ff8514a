//! Risk tiering and the final analysis record.

use image::DynamicImage;
use serde::Serialize;
use std::fmt;

use crate::error::AnalysisError;
use crate::regions::Region;
use crate::saliency::SaliencyMap;

/// Lower edge of the "Low" tier
pub const TIER_LOW_MIN: f32 = 0.10;
/// Lower edge of the "Moderate" tier
pub const TIER_MODERATE_MIN: f32 = 0.25;
/// Lower edge of the "High" tier
pub const TIER_HIGH_MIN: f32 = 0.50;
/// Lower edge of the "Very High" tier (which includes 1.0)
pub const TIER_VERY_HIGH_MIN: f32 = 0.75;

/// Probability strictly above this is labelled malignant
pub const MALIGNANT_ABOVE: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum RiskTier {
    #[serde(rename = "Very Low")]
    VeryLow,
    Low,
    Moderate,
    High,
    #[serde(rename = "Very High")]
    VeryHigh,
}

impl RiskTier {
    /// Tier for a validated classifier probability.
    ///
    /// Each tier includes its lower edge and excludes its upper edge, except
    /// the last, which includes 1.0.
    pub fn from_probability(probability: f32) -> Result<Self, AnalysisError> {
        let p = validate_probability(probability)?;
        Ok(if p < TIER_LOW_MIN {
            RiskTier::VeryLow
        } else if p < TIER_MODERATE_MIN {
            RiskTier::Low
        } else if p < TIER_HIGH_MIN {
            RiskTier::Moderate
        } else if p < TIER_VERY_HIGH_MIN {
            RiskTier::High
        } else {
            RiskTier::VeryHigh
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskTier::VeryLow => "Very Low",
            RiskTier::Low => "Low",
            RiskTier::Moderate => "Moderate",
            RiskTier::High => "High",
            RiskTier::VeryHigh => "Very High",
        }
    }
}

impl fmt::Display for RiskTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reject NaN and anything outside [0, 1]. Never clamps.
pub fn validate_probability(probability: f32) -> Result<f32, AnalysisError> {
    if probability.is_nan() || !(0.0..=1.0).contains(&probability) {
        return Err(AnalysisError::InvalidProbability(probability));
    }
    Ok(probability)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Benign,
    Malignant,
}

impl Classification {
    pub fn from_probability(probability: f32) -> Self {
        if probability > MALIGNANT_ABOVE {
            Classification::Malignant
        } else {
            Classification::Benign
        }
    }
}

/// Intensity statistics over all RGB channel values (0-255)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImageStatistics {
    pub mean_intensity: f64,
    pub std_intensity: f64,
    pub min_intensity: u8,
    pub max_intensity: u8,
    pub median_intensity: f64,
    /// mean / 255 * 100
    pub brightness: f64,
    /// std / 255 * 100
    pub contrast: f64,
}

impl ImageStatistics {
    pub fn from_image(img: &DynamicImage) -> Self {
        let rgb = img.to_rgb8();
        let mut histogram = [0u64; 256];
        for &v in rgb.as_raw() {
            histogram[v as usize] += 1;
        }
        Self::from_histogram(&histogram)
    }

    fn from_histogram(histogram: &[u64; 256]) -> Self {
        let n: u64 = histogram.iter().sum();
        if n == 0 {
            return Self {
                mean_intensity: 0.0,
                std_intensity: 0.0,
                min_intensity: 0,
                max_intensity: 0,
                median_intensity: 0.0,
                brightness: 0.0,
                contrast: 0.0,
            };
        }

        let sum: f64 = histogram
            .iter()
            .enumerate()
            .map(|(v, &c)| v as f64 * c as f64)
            .sum();
        let mean = sum / n as f64;
        let var = histogram
            .iter()
            .enumerate()
            .map(|(v, &c)| {
                let d = v as f64 - mean;
                d * d * c as f64
            })
            .sum::<f64>()
            / n as f64;
        let std = var.sqrt();

        let min = histogram.iter().position(|&c| c > 0).unwrap_or(0) as u8;
        let max = histogram.iter().rposition(|&c| c > 0).unwrap_or(0) as u8;

        // Value at a 0-based rank in sorted order
        let value_at = |rank: u64| -> f64 {
            let mut seen = 0u64;
            for (v, &c) in histogram.iter().enumerate() {
                seen += c;
                if seen > rank {
                    return v as f64;
                }
            }
            max as f64
        };
        let median = if n % 2 == 1 {
            value_at(n / 2)
        } else {
            (value_at(n / 2 - 1) + value_at(n / 2)) / 2.0
        };

        Self {
            mean_intensity: mean,
            std_intensity: std,
            min_intensity: min,
            max_intensity: max,
            median_intensity: median,
            brightness: mean / 255.0 * 100.0,
            contrast: std / 255.0 * 100.0,
        }
    }
}

/// Everything reported for one analyzed image
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisResult {
    pub classifier_probability: f32,
    pub classification: Classification,
    pub malignant_percentage: f32,
    pub benign_percentage: f32,
    pub risk_tier: RiskTier,
    pub image_width: u32,
    pub image_height: u32,
    /// Resolved binarization cutoff shared by region extraction and high_attention_percentage
    pub threshold: f32,
    pub regions: Vec<Region>,
    pub overall_activation: f64,
    pub max_activation: f32,
    pub high_attention_percentage: f64,
    pub image_statistics: ImageStatistics,
    pub summary: String,
}

/// Build the final record from the classifier probability, the map and its regions
pub fn aggregate(
    probability: f32,
    map: &SaliencyMap,
    cutoff: f32,
    regions: Vec<Region>,
    image_statistics: ImageStatistics,
) -> Result<AnalysisResult, AnalysisError> {
    let risk_tier = RiskTier::from_probability(probability)?;
    let high_attention_percentage =
        map.count_above(cutoff) as f64 / map.pixel_count() as f64 * 100.0;
    let summary = summarize(probability, risk_tier, &regions);

    Ok(AnalysisResult {
        classifier_probability: probability,
        classification: Classification::from_probability(probability),
        malignant_percentage: probability * 100.0,
        benign_percentage: (1.0 - probability) * 100.0,
        risk_tier,
        image_width: map.width(),
        image_height: map.height(),
        threshold: cutoff,
        regions,
        overall_activation: map.mean(),
        max_activation: map.max(),
        high_attention_percentage,
        image_statistics,
        summary,
    })
}

/// Templated narrative: region count and tier, then one detail sentence
pub fn summarize(probability: f32, tier: RiskTier, regions: &[Region]) -> String {
    let headline = format!(
        "{} suspicious region(s) detected; overall risk tier: {}.",
        regions.len(),
        tier
    );

    let detail = match regions {
        [] if probability > MALIGNANT_ABOVE => {
            "Diffuse abnormal patterns detected without a distinct focal region.".to_string()
        }
        [] => "No distinct suspicious regions identified.".to_string(),
        [only] => format!(
            "Primary finding in the {} with {:.1}% confidence.",
            only.attributes.location, only.confidence
        ),
        [first, ..] => {
            let mut quadrants: Vec<&str> = Vec::new();
            for r in regions {
                let q = r.attributes.quadrant.as_str();
                if !quadrants.contains(&q) {
                    quadrants.push(q);
                }
            }
            format!(
                "Primary finding in the {} with {:.1}% confidence; regions span {}.",
                first.attributes.location,
                first.confidence,
                quadrants.join(", ")
            )
        }
    };

    format!("{headline} {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};
    use ndarray::Array2;

    #[test]
    fn test_tier_boundaries() {
        assert_eq!(RiskTier::from_probability(0.0).unwrap(), RiskTier::VeryLow);
        assert_eq!(RiskTier::from_probability(0.0999).unwrap(), RiskTier::VeryLow);
        assert_eq!(RiskTier::from_probability(0.10).unwrap(), RiskTier::Low);
        assert_eq!(RiskTier::from_probability(0.25).unwrap(), RiskTier::Moderate);
        assert_eq!(RiskTier::from_probability(0.4999).unwrap(), RiskTier::Moderate);
        assert_eq!(RiskTier::from_probability(0.50).unwrap(), RiskTier::High);
        assert_eq!(RiskTier::from_probability(0.75).unwrap(), RiskTier::VeryHigh);
        assert_eq!(RiskTier::from_probability(0.82).unwrap(), RiskTier::VeryHigh);
        assert_eq!(RiskTier::from_probability(1.0).unwrap(), RiskTier::VeryHigh);
    }

    #[test]
    fn test_invalid_probability_is_not_clamped() {
        for p in [-0.01f32, 1.0001, f32::NAN, f32::INFINITY] {
            let err = RiskTier::from_probability(p).unwrap_err();
            assert!(matches!(err, AnalysisError::InvalidProbability(_)));
        }
    }

    #[test]
    fn test_classification_label() {
        assert_eq!(Classification::from_probability(0.5), Classification::Benign);
        assert_eq!(Classification::from_probability(0.51), Classification::Malignant);
        assert_eq!(serde_json::to_string(&RiskTier::VeryHigh).unwrap(), "\"Very High\"");
    }

    #[test]
    fn test_image_statistics() {
        let img = GrayImage::from_fn(2, 2, |x, y| Luma([if x + y == 0 { 0 } else { 100 }]));
        let stats = ImageStatistics::from_image(&DynamicImage::ImageLuma8(img));

        assert_eq!(stats.min_intensity, 0);
        assert_eq!(stats.max_intensity, 100);
        assert!((stats.mean_intensity - 75.0).abs() < 1e-9);
        assert_eq!(stats.median_intensity, 100.0);
        assert!((stats.brightness - 75.0 / 255.0 * 100.0).abs() < 1e-9);
        assert!((stats.std_intensity - 43.30127).abs() < 1e-4);
    }

    #[test]
    fn test_even_median_averages_middle_values() {
        let mut histogram = [0u64; 256];
        histogram[10] = 1;
        histogram[20] = 1;
        let stats = ImageStatistics::from_histogram(&histogram);
        assert_eq!(stats.median_intensity, 15.0);
    }

    #[test]
    fn test_aggregate_empty_map() {
        let map = SaliencyMap::zeros(20, 10);
        let stats = ImageStatistics::from_image(&DynamicImage::new_rgb8(20, 10));
        let result = aggregate(0.05, &map, 0.5, Vec::new(), stats).unwrap();

        assert_eq!(result.risk_tier, RiskTier::VeryLow);
        assert_eq!(result.classification, Classification::Benign);
        assert_eq!(result.high_attention_percentage, 0.0);
        assert_eq!(result.overall_activation, 0.0);
        assert!(result
            .summary
            .starts_with("0 suspicious region(s) detected; overall risk tier: Very Low."));
        assert!(result.summary.ends_with("No distinct suspicious regions identified."));
    }

    #[test]
    fn test_diffuse_pattern_note() {
        let summary = summarize(0.9, RiskTier::VeryHigh, &[]);
        assert!(summary.contains("Diffuse abnormal patterns"));
    }

    #[test]
    fn test_high_attention_uses_given_cutoff() {
        let map =
            SaliencyMap::from_array(Array2::from_shape_fn((10, 10), |(i, _)| i as f32 / 10.0))
                .unwrap();
        let stats = ImageStatistics::from_image(&DynamicImage::new_rgb8(10, 10));

        let a = aggregate(0.3, &map, 0.45, Vec::new(), stats).unwrap();
        assert!((a.high_attention_percentage - 50.0).abs() < 1e-9);
        assert_eq!(a.threshold, 0.45);

        let b = aggregate(0.3, &map, 0.85, Vec::new(), stats).unwrap();
        assert!((b.high_attention_percentage - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregate_rejects_bad_probability() {
        let map = SaliencyMap::zeros(4, 4);
        let stats = ImageStatistics::from_image(&DynamicImage::new_rgb8(4, 4));
        assert!(matches!(
            aggregate(1.2, &map, 0.5, Vec::new(), stats),
            Err(AnalysisError::InvalidProbability(_))
        ));
    }
}
