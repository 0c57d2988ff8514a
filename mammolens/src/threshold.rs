//! Named binarization policies for saliency maps.
//!
//! The resolved cutoff is shared by region extraction and by the
//! high-attention percentage in the aggregated result.

use crate::saliency::SaliencyMap;
use serde::{Deserialize, Serialize};

/// Default fixed cutoff, matching the classic 0.5 Grad-CAM threshold
pub const DEFAULT_FIXED_CUTOFF: f32 = 0.5;

/// How the foreground cutoff is derived from a saliency map.
///
/// A pixel is foreground iff its value is strictly greater than the cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum ThresholdPolicy {
    /// Constant cutoff in [0, 1]
    Fixed { value: f32 },
    /// mean + k * standard deviation of the map
    MeanStd { k: f32 },
    /// Keep roughly the top `percent` % of pixels
    TopPercentile { percent: f32 },
}

impl Default for ThresholdPolicy {
    fn default() -> Self {
        ThresholdPolicy::Fixed {
            value: DEFAULT_FIXED_CUTOFF,
        }
    }
}

impl ThresholdPolicy {
    /// Resolve to a concrete cutoff for this map
    pub fn resolve(&self, map: &SaliencyMap) -> f32 {
        match *self {
            ThresholdPolicy::Fixed { value } => value,
            ThresholdPolicy::MeanStd { k } => {
                (map.mean() + k as f64 * map.std_dev()) as f32
            }
            ThresholdPolicy::TopPercentile { percent } => {
                let mut sorted: Vec<f32> = map.values().iter().copied().collect();
                sorted.sort_by(f32::total_cmp);
                let keep = percent.clamp(0.0, 100.0) as f64 / 100.0;
                let n = sorted.len();
                let kept = (keep * n as f64).round() as usize;
                if kept >= n {
                    // Everything kept: cut just below the minimum
                    sorted[0] - f32::EPSILON
                } else {
                    sorted[n - kept - 1]
                }
            }
        }
    }

    /// Short description used in logs and summaries
    pub fn describe(&self) -> String {
        match self {
            ThresholdPolicy::Fixed { value } => format!("fixed {value}"),
            ThresholdPolicy::MeanStd { k } => format!("mean + {k}σ"),
            ThresholdPolicy::TopPercentile { percent } => format!("top {percent}%"),
        }
    }
}

impl std::str::FromStr for ThresholdPolicy {
    type Err = String;

    /// Parse "0.5", "fixed:0.5", "mean-std:1.5" or "top:5"
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        let (kind, arg) = match s.split_once(':') {
            Some((kind, arg)) => (kind.trim().to_string(), arg.trim().to_string()),
            None => ("fixed".to_string(), s.clone()),
        };
        let number = arg
            .parse::<f32>()
            .map_err(|_| format!("Invalid number in threshold policy: '{arg}'"))?;

        match kind.as_str() {
            "fixed" => {
                if !(0.0..=1.0).contains(&number) {
                    return Err(format!("Fixed cutoff must be between 0.0 and 1.0, got {number}"));
                }
                Ok(ThresholdPolicy::Fixed { value: number })
            }
            "mean-std" | "meanstd" => Ok(ThresholdPolicy::MeanStd { k: number }),
            "top" | "percentile" => {
                if !(0.0..=100.0).contains(&number) {
                    return Err(format!("Percentile must be between 0 and 100, got {number}"));
                }
                Ok(ThresholdPolicy::TopPercentile { percent: number })
            }
            other => Err(format!("Unknown threshold policy: {other}")),
        }
    }
}
