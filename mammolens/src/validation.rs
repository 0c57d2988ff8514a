//! Plausibility checks that reject images which cannot be mammograms.
//!
//! All checks run before the classifier is called. Each failure is reported as
//! [`AnalysisError::Input`] with a human-readable reason.

use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;

/// Limits for [`validate`]. Defaults only reject clear non-mammograms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationParams {
    pub min_width: u32,
    pub min_height: u32,
    pub min_aspect_ratio: f64,
    pub max_aspect_ratio: f64,
    /// Mean absolute difference between colour channels
    pub max_color_difference: f64,
    /// Mean (max channel - min channel)
    pub max_saturation: f64,
    /// Share of skin-toned pixels, in percent
    pub max_skin_tone_percent: f64,
    pub min_mean_intensity: f64,
    pub max_mean_intensity: f64,
    pub min_std_intensity: f64,
    /// Share of mid-gray (20..235) pixels, in percent
    pub min_tissue_percent: f64,
    /// Share of pixels in the darkest or brightest 10 levels, as a fraction
    pub max_extreme_fraction: f64,
}

impl Default for ValidationParams {
    fn default() -> Self {
        Self {
            min_width: 10,
            min_height: 10,
            min_aspect_ratio: 0.05,
            max_aspect_ratio: 20.0,
            max_color_difference: 30.0,
            max_saturation: 25.0,
            max_skin_tone_percent: 15.0,
            min_mean_intensity: 3.0,
            max_mean_intensity: 252.0,
            min_std_intensity: 2.0,
            min_tissue_percent: 0.1,
            max_extreme_fraction: 0.95,
        }
    }
}

fn reject(reason: impl Into<String>) -> Result<(), AnalysisError> {
    Err(AnalysisError::Input(reason.into()))
}

/// Check that `img` plausibly is a grayscale X-ray image
pub fn validate(img: &DynamicImage, params: &ValidationParams) -> Result<(), AnalysisError> {
    let color = img.color();
    if color.has_alpha() {
        return reject(
            "image has an alpha channel; mammograms are X-ray images without transparency",
        );
    }

    let (width, height) = (img.width(), img.height());
    if width < params.min_width || height < params.min_height {
        return reject(format!(
            "resolution too low ({width}x{height}); at least {}x{} pixels required",
            params.min_width, params.min_height
        ));
    }

    let aspect_ratio = width as f64 / height as f64;
    if aspect_ratio < params.min_aspect_ratio || aspect_ratio > params.max_aspect_ratio {
        return reject(format!(
            "aspect ratio {aspect_ratio:.2} does not match mammogram dimensions"
        ));
    }

    let rgb = img.to_rgb8();
    let pixel_count = (width as u64 * height as u64) as f64;

    if color.has_color() {
        let mut channel_diff = 0.0f64;
        let mut saturation = 0.0f64;
        let mut skin = 0u64;
        for p in rgb.pixels() {
            let [r, g, b] = p.0;
            let (ri, gi, bi) = (r as i32, g as i32, b as i32);
            channel_diff += ((ri - gi).abs() + (ri - bi).abs() + (gi - bi).abs()) as f64 / 3.0;
            saturation += (r.max(g).max(b) - r.min(g).min(b)) as f64;
            if r > g && g > b && r > 100 && r < 255 {
                skin += 1;
            }
        }
        if channel_diff / pixel_count > params.max_color_difference {
            return reject("colour photograph detected; mammograms are grayscale");
        }
        if saturation / pixel_count > params.max_saturation {
            return reject("image is too colourful to be a mammogram");
        }
        if skin as f64 / pixel_count * 100.0 > params.max_skin_tone_percent {
            return reject("skin tones detected; this looks like a photograph of a person");
        }
    }

    // Per-pixel channel mean
    let gray: Vec<f64> = rgb
        .pixels()
        .map(|p| (p[0] as f64 + p[1] as f64 + p[2] as f64) / 3.0)
        .collect();
    let mean = gray.iter().sum::<f64>() / pixel_count;
    let std = (gray.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / pixel_count).sqrt();

    if mean < params.min_mean_intensity {
        return reject(format!("image is too dark (mean intensity {mean:.1})"));
    }
    if mean > params.max_mean_intensity {
        return reject(format!("image is too bright (mean intensity {mean:.1})"));
    }
    if std < params.min_std_intensity {
        return reject(format!("image has too little contrast (std {std:.2})"));
    }

    let tissue = gray.iter().filter(|&&v| v > 20.0 && v < 235.0).count() as f64;
    if tissue / pixel_count * 100.0 < params.min_tissue_percent {
        return reject("image does not contain sufficient tissue area");
    }

    let extreme = gray.iter().filter(|&&v| v < 10.0 || v >= 246.0).count() as f64;
    if extreme / pixel_count > params.max_extreme_fraction {
        return reject("intensity distribution is almost entirely black or white");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage, Rgba, RgbaImage};

    fn textured_gray(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| {
            Luma([(60 + (x * 7 + y * 13) % 120) as u8])
        }))
    }

    fn assert_rejected(img: &DynamicImage, needle: &str) {
        match validate(img, &ValidationParams::default()) {
            Err(AnalysisError::Input(reason)) => {
                assert!(reason.contains(needle), "unexpected reason: {reason}")
            }
            other => panic!("expected input error, got {other:?}"),
        }
    }

    #[test]
    fn test_textured_grayscale_passes() {
        assert!(validate(&textured_gray(64, 80), &ValidationParams::default()).is_ok());
    }

    #[test]
    fn test_gray_rgb_passes() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(40, 40, |x, y| {
            let v = (50 + (x * 3 + y * 5) % 100) as u8;
            Rgb([v, v, v])
        }));
        assert!(validate(&img, &ValidationParams::default()).is_ok());
    }

    #[test]
    fn test_rejects_alpha() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(20, 20, Rgba([90, 90, 90, 255])));
        assert_rejected(&img, "alpha");
    }

    #[test]
    fn test_rejects_tiny_and_elongated() {
        assert_rejected(&textured_gray(8, 30), "resolution");
        assert_rejected(&textured_gray(500, 12), "aspect ratio");
    }

    #[test]
    fn test_rejects_colour_photo() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_fn(30, 30, |x, _| {
            if x % 2 == 0 {
                Rgb([200, 20, 20])
            } else {
                Rgb([20, 20, 200])
            }
        }));
        assert_rejected(&img, "colour photograph");
    }

    #[test]
    fn test_rejects_uniform_and_dark() {
        let flat = DynamicImage::ImageLuma8(GrayImage::from_pixel(30, 30, Luma([128])));
        assert_rejected(&flat, "contrast");

        let black = DynamicImage::ImageLuma8(GrayImage::from_pixel(30, 30, Luma([1])));
        assert_rejected(&black, "too dark");
    }

    #[test]
    fn test_rejects_black_and_white_graphic() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_fn(40, 40, |x, _| {
            Luma([if x < 20 { 0 } else { 255 }])
        }));
        assert_rejected(&img, "sufficient tissue");
    }
}
