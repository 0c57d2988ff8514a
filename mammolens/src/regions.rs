//! Candidate region extraction from a saliency map.
//!
//! Binarizes the map at a shared cutoff, labels 8-connected components,
//! drops components below the minimum area, and orders the survivors
//! deterministically (descending mean activation, then top-left corner).

use image::{GrayImage, Luma};
use imageproc::contours::{find_contours, BorderType};
use imageproc::geometry::arc_length;
use imageproc::point::Point as ContourPoint;
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::{Deserialize, Serialize};

use crate::clinical::{self, ClinicalAttributes, Shape, Severity};
use crate::saliency::SaliencyMap;
use crate::tissue::TissueMask;

/// Axis-aligned box in pixel coordinates, half-open on the right and bottom edges
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: u32,
    pub y1: u32,
    pub x2: u32,
    pub y2: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

/// Limits applied while extracting regions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionParams {
    /// Components smaller than this many pixels are treated as noise
    pub min_area_px: u32,
    /// Keep at most this many regions (after ordering)
    pub max_regions: Option<usize>,
}

impl Default for RegionParams {
    fn default() -> Self {
        Self {
            min_area_px: 50,
            max_regions: Some(8),
        }
    }
}

/// A connected high-attention area of the saliency map
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    /// 1-based, assigned in output order
    pub id: u32,
    pub bbox: BoundingBox,
    pub centroid: Point,
    pub area_px: u32,
    /// Component pixels as a share of all image pixels, in [0, 100]
    pub area_percentage: f32,
    pub mean_activation: f32,
    pub max_activation: f32,
    /// mean_activation * 100
    pub confidence: f32,
    /// Length of the outer contour through boundary pixel centres
    pub perimeter_px: f32,
    pub circularity: f32,
    pub shape: Shape,
    pub severity: Severity,
    pub attributes: ClinicalAttributes,
    /// Flattened (y * width + x) indices of member pixels, row-major
    #[serde(skip)]
    pub pixels: Vec<u32>,
}

impl Region {
    /// Iterate member pixels as (x, y)
    pub fn pixel_coords(&self, image_width: u32) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.pixels
            .iter()
            .map(move |&idx| (idx % image_width, idx / image_width))
    }
}

#[derive(Debug, Clone)]
struct ComponentStats {
    pixels: Vec<u32>,
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
    sum_x: f64,
    sum_y: f64,
    sum_activation: f64,
    max_activation: f32,
}

impl ComponentStats {
    fn new() -> Self {
        Self {
            pixels: Vec::new(),
            min_x: u32::MAX,
            min_y: u32::MAX,
            max_x: 0,
            max_y: 0,
            sum_x: 0.0,
            sum_y: 0.0,
            sum_activation: 0.0,
            max_activation: 0.0,
        }
    }

    /// Arc length and enclosed area of the component's outer contour
    fn outline(&self, image_width: u32) -> (f64, f64) {
        // One pixel of padding keeps the contour off the crop edge
        let (w, h) = (self.max_x - self.min_x + 3, self.max_y - self.min_y + 3);
        let mut crop = GrayImage::new(w, h);
        for &idx in &self.pixels {
            let (x, y) = (idx % image_width, idx / image_width);
            crop.put_pixel(x - self.min_x + 1, y - self.min_y + 1, Luma([255]));
        }

        find_contours::<i32>(&crop)
            .into_iter()
            .filter(|c| matches!(c.border_type, BorderType::Outer))
            .map(|c| (arc_length(&c.points, true), polygon_area(&c.points)))
            .max_by(|a, b| a.1.total_cmp(&b.1).then(a.0.total_cmp(&b.0)))
            .unwrap_or((0.0, 0.0))
    }
}

/// Shoelace area of a closed polygon
fn polygon_area(points: &[ContourPoint<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice: i64 = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as i64 * b.y as i64 - b.x as i64 * a.y as i64)
        .sum();
    (twice as f64 / 2.0).abs()
}

/// Binary foreground mask: value > cutoff, optionally restricted to tissue
pub fn foreground_mask(map: &SaliencyMap, cutoff: f32, tissue: Option<&TissueMask>) -> GrayImage {
    GrayImage::from_fn(map.width(), map.height(), |x, y| {
        let on_tissue = tissue.map(|t| t.contains(x, y)).unwrap_or(true);
        if on_tissue && map.get(x, y) > cutoff {
            Luma([255])
        } else {
            Luma([0])
        }
    })
}

/// Extract ordered regions from `map` at the already-resolved `cutoff`
pub fn extract_regions(
    map: &SaliencyMap,
    cutoff: f32,
    params: &RegionParams,
    tissue: Option<&TissueMask>,
) -> Vec<Region> {
    let (width, height) = (map.width(), map.height());
    let mask = foreground_mask(map, cutoff, tissue);
    let labels = connected_components(&mask, Connectivity::Eight, Luma([0u8]));

    let max_label = labels.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;
    if max_label == 0 {
        log::debug!("No foreground pixels above cutoff {cutoff:.4}");
        return Vec::new();
    }

    let mut stats = vec![ComponentStats::new(); max_label + 1];
    for y in 0..height {
        for x in 0..width {
            let label = labels.get_pixel(x, y)[0];
            if label == 0 {
                continue;
            }
            let value = map.get(x, y);
            let s = &mut stats[label as usize];
            s.pixels.push(y * width + x);
            s.min_x = s.min_x.min(x);
            s.min_y = s.min_y.min(y);
            s.max_x = s.max_x.max(x);
            s.max_y = s.max_y.max(y);
            s.sum_x += x as f64 + 0.5;
            s.sum_y += y as f64 + 0.5;
            s.sum_activation += value as f64;
            s.max_activation = s.max_activation.max(value);
        }
    }

    let total_pixels = map.pixel_count() as f64;
    let found = max_label;
    let mut regions: Vec<Region> = stats
        .into_iter()
        .skip(1)
        .filter(|s| !s.pixels.is_empty() && s.pixels.len() as u32 >= params.min_area_px)
        .map(|s| {
            let area = s.pixels.len() as f64;
            let mean_activation = (s.sum_activation / area) as f32;
            let confidence = mean_activation * 100.0;
            let (perimeter, outline_area) = s.outline(width);
            let circularity = clinical::circularity(outline_area, perimeter);
            Region {
                id: 0,
                bbox: BoundingBox {
                    x1: s.min_x,
                    y1: s.min_y,
                    x2: s.max_x + 1,
                    y2: s.max_y + 1,
                },
                centroid: Point {
                    x: (s.sum_x / area) as f32,
                    y: (s.sum_y / area) as f32,
                },
                area_px: s.pixels.len() as u32,
                area_percentage: (area / total_pixels * 100.0).min(100.0) as f32,
                mean_activation,
                max_activation: s.max_activation,
                confidence,
                perimeter_px: perimeter as f32,
                circularity,
                shape: clinical::classify_shape(circularity),
                severity: clinical::classify_severity(confidence),
                attributes: ClinicalAttributes::unknown(),
                pixels: s.pixels,
            }
        })
        .collect();

    regions.sort_by(|a, b| {
        b.mean_activation
            .total_cmp(&a.mean_activation)
            .then(a.bbox.y1.cmp(&b.bbox.y1))
            .then(a.bbox.x1.cmp(&b.bbox.x1))
    });

    if let Some(limit) = params.max_regions {
        regions.truncate(limit);
    }
    for (i, region) in regions.iter_mut().enumerate() {
        region.id = i as u32 + 1;
    }

    log::debug!(
        "{} component(s) above cutoff {:.4}, {} kept as region(s)",
        found,
        cutoff,
        regions.len()
    );

    regions
}
