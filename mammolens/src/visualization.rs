//! Visualization exports: color-mapped heatmap, heatmap overlay and
//! region-annotated image.

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{DynamicImage, ImageBuffer, Rgba, RgbaImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::regions::Region;
use crate::saliency::SaliencyMap;
use crate::tissue::TissueMask;

/// Default heatmap opacity in overlays
pub const DEFAULT_OVERLAY_ALPHA: f32 = 0.5;

const BOX_COLOR: Rgba<u8> = Rgba([255, 0, 0, 255]);
const BOX_THICKNESS: i32 = 3;
const LABEL_TEXT_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const LABEL_PX: f32 = 18.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMap {
    #[default]
    Jet,
    Viridis,
    Inferno,
    Grayscale,
}

impl std::str::FromStr for ColorMap {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "jet" => Ok(ColorMap::Jet),
            "viridis" => Ok(ColorMap::Viridis),
            "inferno" => Ok(ColorMap::Inferno),
            "grayscale" | "gray" => Ok(ColorMap::Grayscale),
            other => Err(format!(
                "Unknown colormap '{other}'. Use jet, viridis, inferno or grayscale"
            )),
        }
    }
}

/// Appearance of heatmap overlays
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayStyle {
    pub colormap: ColorMap,
    /// Heatmap opacity in [0, 1]
    pub alpha: f32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            colormap: ColorMap::Jet,
            alpha: DEFAULT_OVERLAY_ALPHA,
        }
    }
}

/// Map a normalized value in [0, 1] to a color
pub fn apply_colormap(value: f32, colormap: ColorMap) -> Rgba<u8> {
    let v = value.clamp(0.0, 1.0);

    match colormap {
        ColorMap::Jet => jet_colormap(v),
        ColorMap::Viridis => viridis_colormap(v),
        ColorMap::Inferno => inferno_colormap(v),
        ColorMap::Grayscale => {
            let intensity = (v * 255.0) as u8;
            Rgba([intensity, intensity, intensity, 255])
        }
    }
}

fn to_rgba(r: f32, g: f32, b: f32) -> Rgba<u8> {
    Rgba([
        (r.clamp(0.0, 1.0) * 255.0) as u8,
        (g.clamp(0.0, 1.0) * 255.0) as u8,
        (b.clamp(0.0, 1.0) * 255.0) as u8,
        255,
    ])
}

// Piecewise-linear jet: dark blue -> cyan -> yellow -> dark red
fn jet_colormap(t: f32) -> Rgba<u8> {
    let channel = |offset: f32| 1.5 - (4.0 * t - offset).abs();
    to_rgba(channel(3.0), channel(2.0), channel(1.0))
}

// Viridis (approximation): purple -> blue -> green -> yellow
fn viridis_colormap(t: f32) -> Rgba<u8> {
    let r = (-4.5 * t + 11.0) * t - 4.5;
    let g = (5.0 * t - 9.5) * t + 4.5;
    let b = (-1.5 * t + 1.0) * t + 0.5;
    to_rgba(r, g, b)
}

// Inferno (approximation): black -> dark red -> orange -> yellow
fn inferno_colormap(t: f32) -> Rgba<u8> {
    let r = (3.5 * t - 1.0) * t + 0.05;
    let g = ((4.0 * t - 3.5) * t + 0.5) * t;
    let b = (10.0 * t - 7.0) * t + 0.1;
    to_rgba(r, g, b)
}

/// Color-mapped saliency map at map resolution
pub fn render_heatmap(map: &SaliencyMap, colormap: ColorMap) -> RgbaImage {
    ImageBuffer::from_fn(map.width(), map.height(), |x, y| {
        apply_colormap(map.get(x, y), colormap)
    })
}

/// Alpha-blend `overlay` onto `base`. Pixels outside `mask` keep the base color.
pub fn composite_with_alpha(
    base: &RgbaImage,
    overlay: &RgbaImage,
    overlay_alpha: f32,
    mask: Option<&TissueMask>,
) -> Result<RgbaImage> {
    let (width, height) = base.dimensions();

    if overlay.dimensions() != (width, height) {
        anyhow::bail!("Images must have same dimensions for compositing");
    }
    if let Some(mask) = mask {
        if (mask.width(), mask.height()) != (width, height) {
            anyhow::bail!("Tissue mask must have the same dimensions as the image");
        }
    }

    let alpha = overlay_alpha.clamp(0.0, 1.0);
    let mut result = base.clone();

    for (x, y, pixel) in result.enumerate_pixels_mut() {
        let base_pixel = base.get_pixel(x, y);
        if mask.map(|m| !m.contains(x, y)).unwrap_or(false) {
            *pixel = Rgba([base_pixel[0], base_pixel[1], base_pixel[2], 255]);
            continue;
        }
        let overlay_pixel = overlay.get_pixel(x, y);
        let blend = |c: usize| {
            ((1.0 - alpha) * base_pixel[c] as f32 + alpha * overlay_pixel[c] as f32) as u8
        };
        *pixel = Rgba([blend(0), blend(1), blend(2), 255]);
    }

    Ok(result)
}

/// Heatmap blended over the original image, optionally restricted to tissue
pub fn render_overlay(
    original: &DynamicImage,
    map: &SaliencyMap,
    style: &OverlayStyle,
    tissue: Option<&TissueMask>,
) -> Result<RgbaImage> {
    if (original.width(), original.height()) != (map.width(), map.height()) {
        anyhow::bail!(
            "Saliency map {}x{} does not match image {}x{}",
            map.width(),
            map.height(),
            original.width(),
            original.height()
        );
    }
    let heatmap = render_heatmap(map, style.colormap);
    composite_with_alpha(&original.to_rgba8(), &heatmap, style.alpha, tissue)
}

/// Font used for region labels
pub struct LabelFont {
    font: FontVec,
}

impl LabelFont {
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let font = FontVec::try_from_vec(bytes)
            .map_err(|e| anyhow::anyhow!("Invalid font data: {}", e))?;
        Ok(Self { font })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read font file {}", path.display()))?;
        Self::from_bytes(bytes)
    }
}

/// Text drawn next to each region box
pub fn region_label(region: &Region) -> String {
    format!("Region {}: {:.1}%", region.id, region.confidence)
}

/// Original image with a box around each region, labelled when a font is given
pub fn render_annotated(
    original: &DynamicImage,
    regions: &[Region],
    font: Option<&LabelFont>,
) -> RgbaImage {
    let mut rgba_img = original.to_rgba8();
    for region in regions {
        draw_region(&mut rgba_img, region, font);
    }
    rgba_img
}

fn draw_region(rgba_img: &mut RgbaImage, region: &Region, font: Option<&LabelFont>) {
    let bbox = region.bbox;

    // Grow outwards so the box never covers region pixels
    for thickness_offset in 0..BOX_THICKNESS {
        let rect = Rect::at(
            bbox.x1 as i32 - 1 - thickness_offset,
            bbox.y1 as i32 - 1 - thickness_offset,
        )
        .of_size(
            bbox.width() + 2 + (thickness_offset * 2) as u32,
            bbox.height() + 2 + (thickness_offset * 2) as u32,
        );
        draw_hollow_rect_mut(rgba_img, rect, BOX_COLOR);
    }

    let Some(font) = font else {
        return;
    };

    let label = region_label(region);
    let scale = PxScale::from(LABEL_PX);
    let (text_width, text_height) = text_size(scale, &font.font, &label);

    // Above the box when there is room, otherwise just inside it
    let text_x = bbox.x1;
    let text_y = if bbox.y1 >= text_height + 8 {
        bbox.y1 - text_height - 8
    } else {
        bbox.y1 + 2
    };

    for dy in 0..(text_height + 4) {
        for dx in 0..(text_width + 4) {
            let (px, py) = (text_x + dx, text_y + dy);
            if px < rgba_img.width() && py < rgba_img.height() {
                rgba_img.put_pixel(px, py, BOX_COLOR);
            }
        }
    }
    draw_text_mut(
        rgba_img,
        LABEL_TEXT_COLOR,
        text_x as i32 + 2,
        text_y as i32 + 2,
        scale,
        &font.font,
        &label,
    );
}

/// Save an RGBA rendering; alpha is dropped for formats other than PNG
pub fn save_rgba(img: RgbaImage, output_path: &Path) -> Result<()> {
    let preserve_alpha = output_path
        .extension()
        .map(|ext| ext.to_string_lossy().to_lowercase() == "png")
        .unwrap_or(false);

    let output_img = if preserve_alpha {
        DynamicImage::ImageRgba8(img)
    } else {
        DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(img).to_rgb8())
    };

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    output_img
        .save(output_path)
        .with_context(|| format!("Failed to save image to {}", output_path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regions::{extract_regions, RegionParams};
    use image::{Rgb, RgbImage};
    use ndarray::Array2;
    use tempfile::tempdir;

    fn spot_map() -> SaliencyMap {
        SaliencyMap::from_array(Array2::from_shape_fn((30, 40), |(y, x)| {
            if (10..20).contains(&x) && (10..20).contains(&y) {
                1.0
            } else {
                0.0
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_jet_endpoints() {
        assert_eq!(apply_colormap(0.0, ColorMap::Jet), Rgba([0, 0, 127, 255]));
        assert_eq!(apply_colormap(1.0, ColorMap::Jet), Rgba([127, 0, 0, 255]));
        assert_eq!(apply_colormap(0.5, ColorMap::Grayscale), Rgba([127, 127, 127, 255]));
    }

    #[test]
    fn test_heatmap_matches_map_size() {
        let heatmap = render_heatmap(&spot_map(), ColorMap::Jet);
        assert_eq!(heatmap.dimensions(), (40, 30));
        assert_eq!(*heatmap.get_pixel(15, 15), apply_colormap(1.0, ColorMap::Jet));
    }

    #[test]
    fn test_overlay_respects_tissue_mask() {
        let original = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([100, 100, 100])));
        let map = spot_map();
        let style = OverlayStyle::default();

        let blended = render_overlay(&original, &map, &style, None).unwrap();
        assert_ne!(*blended.get_pixel(15, 15), Rgba([100, 100, 100, 255]));

        let no_tissue = TissueMask::from_image(&DynamicImage::new_rgb8(40, 30));
        let masked = render_overlay(&original, &map, &style, Some(&no_tissue)).unwrap();
        assert_eq!(*masked.get_pixel(15, 15), Rgba([100, 100, 100, 255]));
    }

    #[test]
    fn test_overlay_rejects_mismatched_map() {
        let original = DynamicImage::new_rgb8(10, 10);
        assert!(render_overlay(&original, &spot_map(), &OverlayStyle::default(), None).is_err());
    }

    #[test]
    fn test_annotated_draws_box_outside_region() {
        let original = DynamicImage::ImageRgb8(RgbImage::from_pixel(40, 30, Rgb([0, 0, 0])));
        let map = spot_map();
        let regions = extract_regions(&map, 0.5, &RegionParams::default(), None);
        let annotated = render_annotated(&original, &regions, None);

        assert_eq!(*annotated.get_pixel(9, 9), BOX_COLOR);
        assert_eq!(*annotated.get_pixel(20, 20), BOX_COLOR);
        assert_eq!(*annotated.get_pixel(15, 15), Rgba([0, 0, 0, 255]));
        assert_eq!(region_label(&regions[0]), "Region 1: 100.0%");
    }

    #[test]
    fn test_save_drops_alpha_for_jpeg() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("out.jpg");
        save_rgba(RgbaImage::from_pixel(8, 8, Rgba([10, 20, 30, 128])), &path).unwrap();

        let loaded = image::open(&path).unwrap();
        assert!(!loaded.color().has_alpha());
    }

    #[test]
    fn test_invalid_font_bytes() {
        assert!(LabelFont::from_bytes(vec![0, 1, 2, 3]).is_err());
    }
}
