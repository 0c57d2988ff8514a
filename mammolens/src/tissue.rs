//! Breast-tissue mask: separates imaged tissue from the dark film background.

use image::{DynamicImage, GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::close;
use imageproc::region_labelling::{connected_components, Connectivity};

/// Mean-channel intensity above which a pixel counts as tissue
pub const TISSUE_INTENSITY_THRESHOLD: u8 = 15;

const TISSUE: Luma<u8> = Luma([255]);
const BACKGROUND: Luma<u8> = Luma([0]);

/// Binary tissue mask at image resolution
#[derive(Debug, Clone)]
pub struct TissueMask {
    mask: GrayImage,
}

impl TissueMask {
    /// Threshold the mean channel intensity, fill enclosed holes, then close small gaps
    pub fn from_image(img: &DynamicImage) -> Self {
        let rgb = img.to_rgb8();
        let raw = GrayImage::from_fn(rgb.width(), rgb.height(), |x, y| {
            let p = rgb.get_pixel(x, y);
            let mean = (p[0] as u32 + p[1] as u32 + p[2] as u32) as f32 / 3.0;
            if mean > TISSUE_INTENSITY_THRESHOLD as f32 {
                TISSUE
            } else {
                BACKGROUND
            }
        });

        let filled = fill_holes(&raw);
        let mask = close(&filled, Norm::LInf, 1);
        Self { mask }
    }

    /// Mask where every pixel is tissue
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            mask: GrayImage::from_pixel(width, height, TISSUE),
        }
    }

    pub fn width(&self) -> u32 {
        self.mask.width()
    }

    pub fn height(&self) -> u32 {
        self.mask.height()
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        self.mask.get_pixel(x, y)[0] > 0
    }

    /// Fraction of pixels marked as tissue
    pub fn coverage(&self) -> f64 {
        let total = (self.mask.width() as u64 * self.mask.height() as u64).max(1);
        let tissue = self.mask.pixels().filter(|p| p[0] > 0).count() as u64;
        tissue as f64 / total as f64
    }
}

/// Fill background regions that do not touch the image border
fn fill_holes(mask: &GrayImage) -> GrayImage {
    let (width, height) = mask.dimensions();
    if width == 0 || height == 0 {
        return mask.clone();
    }
    // Label the background pixels by treating tissue as the "background" value
    let labels = connected_components(mask, Connectivity::Four, TISSUE);

    let max_label = labels.pixels().map(|p| p[0]).max().unwrap_or(0) as usize;
    let mut touches_border = vec![false; max_label + 1];
    for x in 0..width {
        touches_border[labels.get_pixel(x, 0)[0] as usize] = true;
        touches_border[labels.get_pixel(x, height - 1)[0] as usize] = true;
    }
    for y in 0..height {
        touches_border[labels.get_pixel(0, y)[0] as usize] = true;
        touches_border[labels.get_pixel(width - 1, y)[0] as usize] = true;
    }

    GrayImage::from_fn(width, height, |x, y| {
        let label = labels.get_pixel(x, y)[0];
        if label == 0 || !touches_border[label as usize] {
            TISSUE
        } else {
            BACKGROUND
        }
    })
}
