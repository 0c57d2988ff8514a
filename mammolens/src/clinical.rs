//! Descriptive attributes for extracted regions.
//!
//! Location (quadrant, thirds-grid position), shape and severity are exact
//! functions of the region. Margin, density and vascularity are illustrative
//! texture heuristics over the grayscale image; they describe what the pixels
//! look like and are not diagnostic findings.

use image::{ImageBuffer, Luma};
use imageproc::filter::filter3x3;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::regions::Region;
use crate::saliency::SaliencyMap;

/// Grayscale intensities in [0, 1]
pub type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Circularity at or above this is "round"
pub const ROUND_MIN_CIRCULARITY: f32 = 0.8;
/// Circularity at or above this (and below round) is "oval"
pub const OVAL_MIN_CIRCULARITY: f32 = 0.5;

/// Confidence at or above this is at least "medium"
pub const SEVERITY_MEDIUM_MIN: f32 = 50.0;
/// Confidence strictly above this is "high"
pub const SEVERITY_HIGH_ABOVE: f32 = 70.0;

/// Default width of the central band, as a fraction of each image dimension
pub const DEFAULT_CENTRAL_BAND: f32 = 0.10;

const THIRD_LOW: f32 = 0.33;
const THIRD_HIGH: f32 = 0.67;

const PATTERN_HOMOGENEOUS_BELOW: f64 = 0.1;
const PATTERN_SLIGHT_BELOW: f64 = 0.2;

// Mean Sobel magnitude along the boundary, for [0, 1] intensities
const MARGIN_SHARP_GRADIENT: f32 = 0.25;
const MARGIN_SOFT_GRADIENT: f32 = 0.08;

const DENSITY_CONTRAST: f64 = 0.05;
const SURROUND_RING_PX: u32 = 4;

const VASCULARITY_MINIMAL_CV: f64 = 0.10;
const VASCULARITY_MODERATE_CV: f64 = 0.25;

const K_SOBEL_X: [f32; 9] = [-1.0, 0.0, 1.0, -2.0, 0.0, 2.0, -1.0, 0.0, 1.0];
const K_SOBEL_Y: [f32; 9] = [-1.0, -2.0, -1.0, 0.0, 0.0, 0.0, 1.0, 2.0, 1.0];

macro_rules! labelled_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $label)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

labelled_enum!(Shape {
    Round => "round",
    Oval => "oval",
    Irregular => "irregular",
});

labelled_enum!(Severity {
    Low => "low",
    Medium => "medium",
    High => "high",
});

labelled_enum!(
    /// Breast quadrant of a region's centroid
    Quadrant {
        UpperOuter => "upper-outer",
        UpperInner => "upper-inner",
        LowerOuter => "lower-outer",
        LowerInner => "lower-inner",
        Central => "central",
    }
);

labelled_enum!(
    /// Which breast the image shows. Unknown is read like Left.
    Laterality {
        Left => "left",
        Right => "right",
        Unknown => "unknown",
    }
);

labelled_enum!(Margin {
    Circumscribed => "circumscribed",
    Obscured => "obscured",
    Indistinct => "indistinct",
    Spiculated => "spiculated",
    Unknown => "unknown",
});

labelled_enum!(Density {
    High => "high",
    Equal => "equal",
    Low => "low",
    Unknown => "unknown",
});

labelled_enum!(Vascularity {
    Minimal => "minimal",
    Moderate => "moderate",
    Prominent => "prominent",
    Unknown => "unknown",
});

labelled_enum!(
    /// Spread of saliency values inside the region
    ActivationPattern {
        Homogeneous => "homogeneous",
        SlightlyHeterogeneous => "slightly heterogeneous",
        Heterogeneous => "heterogeneous",
    }
);

impl Default for Laterality {
    fn default() -> Self {
        Laterality::Unknown
    }
}

impl FromStr for Laterality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "left" | "l" => Ok(Laterality::Left),
            "right" | "r" => Ok(Laterality::Right),
            "unknown" | "" => Ok(Laterality::Unknown),
            other => Err(format!(
                "Unknown laterality '{other}'. Use left, right or unknown"
            )),
        }
    }
}

/// Every descriptor is always present; texture fields fall back to `unknown`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClinicalAttributes {
    pub quadrant: Quadrant,
    /// Thirds-grid position, e.g. "upper-lateral"
    pub position: String,
    /// Human-readable location, e.g. "upper lateral region (upper-outer quadrant)"
    pub location: String,
    pub margin: Margin,
    pub density: Density,
    pub vascularity: Vascularity,
    pub pattern: ActivationPattern,
}

impl ClinicalAttributes {
    /// Placeholder used before a region has been annotated
    pub fn unknown() -> Self {
        Self {
            quadrant: Quadrant::Central,
            position: "unknown".to_string(),
            location: "unknown".to_string(),
            margin: Margin::Unknown,
            density: Density::Unknown,
            vascularity: Vascularity::Unknown,
            pattern: ActivationPattern::Homogeneous,
        }
    }
}

/// Image-level context for attribute synthesis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClinicalParams {
    pub laterality: Laterality,
    /// Fraction of each dimension around the midlines that counts as central
    pub central_band: f32,
}

impl Default for ClinicalParams {
    fn default() -> Self {
        Self {
            laterality: Laterality::Unknown,
            central_band: DEFAULT_CENTRAL_BAND,
        }
    }
}

/// `4πA / P²`, clamped to [0, 1]. `area` and `perimeter` must come from the
/// same outline (polygon area and arc length of the outer contour).
pub fn circularity(area: f64, perimeter: f64) -> f32 {
    if perimeter <= 0.0 {
        return 0.0;
    }
    let c = 4.0 * std::f64::consts::PI * area / (perimeter * perimeter);
    c.clamp(0.0, 1.0) as f32
}

pub fn classify_shape(circularity: f32) -> Shape {
    if circularity >= ROUND_MIN_CIRCULARITY {
        Shape::Round
    } else if circularity >= OVAL_MIN_CIRCULARITY {
        Shape::Oval
    } else {
        Shape::Irregular
    }
}

pub fn classify_severity(confidence: f32) -> Severity {
    if confidence > SEVERITY_HIGH_ABOVE {
        Severity::High
    } else if confidence >= SEVERITY_MEDIUM_MIN {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// True when image-left is the outer (lateral) side
fn left_is_outer(laterality: Laterality) -> bool {
    !matches!(laterality, Laterality::Right)
}

/// Quadrant of point (x, y) in a `width` x `height` image
pub fn quadrant_of(x: f32, y: f32, width: u32, height: u32, params: &ClinicalParams) -> Quadrant {
    let (w, h) = (width as f32, height as f32);
    let (mid_x, mid_y) = (w / 2.0, h / 2.0);
    let band = params.central_band.clamp(0.0, 1.0);

    if (x - mid_x).abs() <= band * w / 2.0 && (y - mid_y).abs() <= band * h / 2.0 {
        return Quadrant::Central;
    }

    let upper = y < mid_y;
    let outer = (x < mid_x) == left_is_outer(params.laterality);
    match (upper, outer) {
        (true, true) => Quadrant::UpperOuter,
        (true, false) => Quadrant::UpperInner,
        (false, true) => Quadrant::LowerOuter,
        (false, false) => Quadrant::LowerInner,
    }
}

/// Thirds-grid position, "{upper|mid|lower}-{lateral|central|medial}"
pub fn position_of(x: f32, y: f32, width: u32, height: u32, laterality: Laterality) -> String {
    let fx = x / width as f32;
    let fy = y / height as f32;
    // Distance from the outer edge
    let from_outer = if left_is_outer(laterality) { fx } else { 1.0 - fx };

    let horizontal = if from_outer < THIRD_LOW {
        "lateral"
    } else if from_outer > THIRD_HIGH {
        "medial"
    } else {
        "central"
    };
    let vertical = if fy < THIRD_LOW {
        "upper"
    } else if fy > THIRD_HIGH {
        "lower"
    } else {
        "mid"
    };
    format!("{vertical}-{horizontal}")
}

pub fn classify_pattern(std_dev: f64) -> ActivationPattern {
    if std_dev < PATTERN_HOMOGENEOUS_BELOW {
        ActivationPattern::Homogeneous
    } else if std_dev < PATTERN_SLIGHT_BELOW {
        ActivationPattern::SlightlyHeterogeneous
    } else {
        ActivationPattern::Heterogeneous
    }
}

fn classify_margin(boundary_gradient: f32, shape: Shape) -> Margin {
    if boundary_gradient >= MARGIN_SHARP_GRADIENT {
        match shape {
            Shape::Irregular => Margin::Spiculated,
            Shape::Round | Shape::Oval => Margin::Circumscribed,
        }
    } else if boundary_gradient >= MARGIN_SOFT_GRADIENT {
        Margin::Indistinct
    } else {
        Margin::Obscured
    }
}

fn classify_density(inside_mean: f64, surround_mean: f64) -> Density {
    let contrast = inside_mean - surround_mean;
    if contrast > DENSITY_CONTRAST {
        Density::High
    } else if contrast < -DENSITY_CONTRAST {
        Density::Low
    } else {
        Density::Equal
    }
}

fn classify_vascularity(inside_mean: f64, inside_std: f64) -> Vascularity {
    if inside_mean <= f64::EPSILON {
        return Vascularity::Minimal;
    }
    let cv = inside_std / inside_mean;
    if cv < VASCULARITY_MINIMAL_CV {
        Vascularity::Minimal
    } else if cv < VASCULARITY_MODERATE_CV {
        Vascularity::Moderate
    } else {
        Vascularity::Prominent
    }
}

fn mean_std(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let mut n = 0usize;
    let mut sum = 0.0;
    let mut sum_sq = 0.0;
    for v in values {
        n += 1;
        sum += v;
        sum_sq += v * v;
    }
    if n == 0 {
        return (0.0, 0.0);
    }
    let mean = sum / n as f64;
    let var = (sum_sq / n as f64 - mean * mean).max(0.0);
    (mean, var.sqrt())
}

/// Grayscale image plus its Sobel magnitude
struct Texture<'a> {
    gray: &'a GrayF32,
    gradient: Vec<f32>,
}

impl<'a> Texture<'a> {
    fn new(gray: &'a GrayF32) -> Self {
        let gx = filter3x3(gray, &K_SOBEL_X);
        let gy = filter3x3(gray, &K_SOBEL_Y);
        let gx: Vec<f32> = gx.into_raw();
        let gy: Vec<f32> = gy.into_raw();
        let gradient = gx
            .iter()
            .zip(gy.iter())
            .map(|(x, y)| (x * x + y * y).sqrt())
            .collect();
        Self { gray, gradient }
    }

    fn describe(&self, region: &Region) -> (Margin, Density, Vascularity) {
        let width = self.gray.width();
        let height = self.gray.height();
        let members: std::collections::HashSet<u32> = region.pixels.iter().copied().collect();
        let is_member = |x: i64, y: i64| {
            x >= 0
                && y >= 0
                && x < width as i64
                && y < height as i64
                && members.contains(&(y as u32 * width + x as u32))
        };

        // Boundary gradient
        let boundary: Vec<f32> = region
            .pixel_coords(width)
            .filter(|&(x, y)| {
                let (x, y) = (x as i64, y as i64);
                !(is_member(x - 1, y)
                    && is_member(x + 1, y)
                    && is_member(x, y - 1)
                    && is_member(x, y + 1))
            })
            .map(|(x, y)| self.gradient[(y * width + x) as usize])
            .collect();
        let boundary_gradient = if boundary.is_empty() {
            0.0
        } else {
            boundary.iter().sum::<f32>() / boundary.len() as f32
        };

        let (inside_mean, inside_std) = mean_std(
            region
                .pixel_coords(width)
                .map(|(x, y)| self.gray.get_pixel(x, y)[0] as f64),
        );

        // Ring around the bounding box, excluding component pixels
        let x0 = region.bbox.x1.saturating_sub(SURROUND_RING_PX);
        let y0 = region.bbox.y1.saturating_sub(SURROUND_RING_PX);
        let x1 = (region.bbox.x2 + SURROUND_RING_PX).min(width);
        let y1 = (region.bbox.y2 + SURROUND_RING_PX).min(height);
        let surround = (y0..y1)
            .flat_map(|y| (x0..x1).map(move |x| (x, y)))
            .filter(|&(x, y)| !members.contains(&(y * width + x)))
            .map(|(x, y)| self.gray.get_pixel(x, y)[0] as f64);
        let (surround_mean, _) = mean_std(surround);
        // A region covering its whole window has no surround to compare against
        let density = if (x1 - x0) as u64 * (y1 - y0) as u64 == region.area_px as u64 {
            Density::Equal
        } else {
            classify_density(inside_mean, surround_mean)
        };

        (
            classify_margin(boundary_gradient, region.shape),
            density,
            classify_vascularity(inside_mean, inside_std),
        )
    }
}

fn location_fields(
    region: &Region,
    width: u32,
    height: u32,
    params: &ClinicalParams,
) -> (Quadrant, String, String) {
    let (cx, cy) = (region.centroid.x, region.centroid.y);
    let quadrant = quadrant_of(cx, cy, width, height, params);
    let position = position_of(cx, cy, width, height, params.laterality);
    let location = format!(
        "{} region ({} quadrant)",
        position.replace('-', " "),
        quadrant
    );
    (quadrant, position, location)
}

fn activation_pattern(region: &Region, map: &SaliencyMap) -> ActivationPattern {
    let width = map.width();
    let (_, std_dev) = mean_std(
        region
            .pixel_coords(width)
            .map(|(x, y)| map.get(x, y) as f64),
    );
    classify_pattern(std_dev)
}

/// Fill in `attributes` for every region.
///
/// `gray` must match the saliency map's dimensions; otherwise texture
/// descriptors are reported as unknown.
pub fn annotate(
    regions: &mut [Region],
    map: &SaliencyMap,
    gray: Option<&GrayF32>,
    params: &ClinicalParams,
) {
    if regions.is_empty() {
        return;
    }
    let gray = gray.filter(|g| {
        let matches = g.dimensions() == (map.width(), map.height());
        if !matches {
            log::warn!(
                "Grayscale image {}x{} does not match saliency map {}x{}; texture descriptors unknown",
                g.width(),
                g.height(),
                map.width(),
                map.height()
            );
        }
        matches
    });
    let texture = gray.map(Texture::new);

    for region in regions.iter_mut() {
        let (quadrant, position, location) =
            location_fields(region, map.width(), map.height(), params);
        let (margin, density, vascularity) = match &texture {
            Some(t) => t.describe(region),
            None => (Margin::Unknown, Density::Unknown, Vascularity::Unknown),
        };
        region.attributes = ClinicalAttributes {
            quadrant,
            position,
            location,
            margin,
            density,
            vascularity,
            pattern: activation_pattern(region, map),
        };
    }
}
