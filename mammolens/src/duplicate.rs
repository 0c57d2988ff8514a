//! Exact and near-duplicate image detection.
//!
//! An exact match compares SHA-256 digests of the raw bytes and never decodes.
//! A near match compares 64-bit average hashes (8x8 grayscale, bit set when
//! the pixel is brighter than the mean). Failures never propagate: a pair that
//! cannot be compared is reported as "not a duplicate".

use image::imageops::FilterType;
use image::DynamicImage;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::Path;

/// Largest Hamming distance still treated as the same image
pub const NEAR_DUPLICATE_MAX_DISTANCE: u32 = 5;

const HASH_EDGE: u32 = 8;
const HASH_BITS: u32 = HASH_EDGE * HASH_EDGE;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DuplicateCheckResult {
    pub is_duplicate: bool,
    pub reason: String,
    /// Perceptual hash distance, when the near-match step ran
    pub hamming_distance: Option<u32>,
}

impl DuplicateCheckResult {
    fn exact(reason: String) -> Self {
        Self {
            is_duplicate: true,
            reason,
            hamming_distance: Some(0),
        }
    }

    fn failed(err: impl fmt::Display) -> Self {
        Self {
            is_duplicate: false,
            reason: format!("comparison failed: {err}"),
            hamming_distance: None,
        }
    }
}

/// SHA-256 of the raw bytes
pub fn content_hash(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

pub fn content_hash_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// 64-bit average hash, row-major, most significant bit first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PerceptualHash(pub u64);

impl PerceptualHash {
    pub fn distance(&self, other: &PerceptualHash) -> u32 {
        hamming_distance(self.0, other.0)
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}

/// Resize to 8x8 (Lanczos3), convert to grayscale and threshold at the mean
pub fn perceptual_hash(img: &DynamicImage) -> PerceptualHash {
    let small = img
        .resize_exact(HASH_EDGE, HASH_EDGE, FilterType::Lanczos3)
        .to_luma8();
    let pixels = small.as_raw();
    let mean = pixels.iter().map(|&p| p as f64).sum::<f64>() / pixels.len() as f64;

    let bits = pixels
        .iter()
        .fold(0u64, |acc, &p| (acc << 1) | u64::from(p as f64 > mean));
    PerceptualHash(bits)
}

fn similarity(distance: u32) -> String {
    format!("similarity: {}/{}", HASH_BITS - distance, HASH_BITS)
}

fn decode(bytes: &[u8]) -> Result<DynamicImage, image::ImageError> {
    image::load_from_memory(bytes)
}

/// Compare two encoded images
pub fn are_duplicate(a: &[u8], b: &[u8]) -> DuplicateCheckResult {
    if content_hash(a) == content_hash(b) {
        return DuplicateCheckResult::exact("exact duplicate".to_string());
    }

    let (img_a, img_b) = match (decode(a), decode(b)) {
        (Ok(img_a), Ok(img_b)) => (img_a, img_b),
        (Err(e), _) | (_, Err(e)) => {
            log::warn!("Duplicate check could not decode image: {e}");
            return DuplicateCheckResult::failed(e);
        }
    };

    let distance = perceptual_hash(&img_a).distance(&perceptual_hash(&img_b));
    let is_duplicate = distance <= NEAR_DUPLICATE_MAX_DISTANCE;
    let reason = if is_duplicate {
        format!("near duplicate ({}, hamming distance {distance})", similarity(distance))
    } else {
        format!("not a duplicate ({})", similarity(distance))
    };
    log::debug!("Perceptual hash distance {distance}: {reason}");

    DuplicateCheckResult {
        is_duplicate,
        reason,
        hamming_distance: Some(distance),
    }
}

/// Compare two image files
pub fn are_duplicate_files(a: &Path, b: &Path) -> DuplicateCheckResult {
    let read = |path: &Path| {
        std::fs::read(path).map_err(|e| format!("cannot read {}: {e}", path.display()))
    };
    match (read(a), read(b)) {
        (Ok(bytes_a), Ok(bytes_b)) => are_duplicate(&bytes_a, &bytes_b),
        (Err(e), _) | (_, Err(e)) => {
            log::warn!("Duplicate check failed: {e}");
            DuplicateCheckResult::failed(e)
        }
    }
}

#[derive(Debug, Clone)]
struct SeenImage {
    name: String,
    content: [u8; 32],
    perceptual: PerceptualHash,
}

/// Session store of previously accepted images
#[derive(Debug, Default)]
pub struct DuplicateRegistry {
    seen: Vec<SeenImage>,
}

impl DuplicateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Compare `bytes` against every registered image and register it if new.
    ///
    /// Duplicates are not registered. Images that cannot be decoded are
    /// reported as not duplicate and are not registered either.
    pub fn check_and_register(&mut self, name: &str, bytes: &[u8]) -> DuplicateCheckResult {
        let content = content_hash(bytes);
        if let Some(prev) = self.seen.iter().find(|s| s.content == content) {
            return DuplicateCheckResult::exact(format!("exact duplicate of '{}'", prev.name));
        }

        let img = match decode(bytes) {
            Ok(img) => img,
            Err(e) => {
                log::warn!("Duplicate check could not decode {name}: {e}");
                return DuplicateCheckResult::failed(e);
            }
        };
        let perceptual = perceptual_hash(&img);

        let closest = self
            .seen
            .iter()
            .map(|s| (s, s.perceptual.distance(&perceptual)))
            .min_by_key(|(_, d)| *d);
        if let Some((prev, distance)) = closest {
            if distance <= NEAR_DUPLICATE_MAX_DISTANCE {
                return DuplicateCheckResult {
                    is_duplicate: true,
                    reason: format!(
                        "near duplicate of '{}' ({})",
                        prev.name,
                        similarity(distance)
                    ),
                    hamming_distance: Some(distance),
                };
            }
        }

        let closest_distance = closest.map(|(_, d)| d);
        log::debug!("Registered {name} with perceptual hash {perceptual}");
        self.seen.push(SeenImage {
            name: name.to_string(),
            content,
            perceptual,
        });
        DuplicateCheckResult {
            is_duplicate: false,
            reason: "new image".to_string(),
            hamming_distance: closest_distance,
        }
    }

    /// Forget every registered image
    pub fn clear(&mut self) {
        self.seen.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, ImageFormat, Luma};
    use std::io::Cursor;

    fn encode_png(img: &GrayImage) -> Vec<u8> {
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageLuma8(img.clone())
            .write_to(&mut buf, ImageFormat::Png)
            .unwrap();
        buf.into_inner()
    }

    fn split_image(bright_left: bool) -> GrayImage {
        GrayImage::from_fn(64, 64, |x, _| {
            let left = x < 32;
            Luma([if left == bright_left { 200 } else { 40 }])
        })
    }

    #[test]
    fn test_hamming_distance() {
        assert_eq!(hamming_distance(0, 0), 0);
        assert_eq!(hamming_distance(0b1011, 0b0001), 2);
        assert_eq!(hamming_distance(u64::MAX, 0), 64);
    }

    #[test]
    fn test_perceptual_hash_layout() {
        // Bright left half: first four bits of every row set
        let hash = perceptual_hash(&DynamicImage::ImageLuma8(split_image(true)));
        assert_eq!(hash, PerceptualHash(0xF0F0_F0F0_F0F0_F0F0));
        assert_eq!(hash.to_string(), "f0f0f0f0f0f0f0f0");
    }

    #[test]
    fn test_exact_duplicate_skips_decoding() {
        // Not an image at all, but identical bytes
        let bytes = b"definitely not a png".to_vec();
        let result = are_duplicate(&bytes, &bytes.clone());
        assert!(result.is_duplicate);
        assert_eq!(result.reason, "exact duplicate");
    }

    #[test]
    fn test_near_duplicate_after_small_edit() {
        let original = split_image(true);
        let mut edited = original.clone();
        edited.put_pixel(0, 0, Luma([190]));

        let result = are_duplicate(&encode_png(&original), &encode_png(&edited));
        assert!(result.is_duplicate, "{}", result.reason);
        assert!(result.reason.contains("similarity"));
        assert!(result.hamming_distance.unwrap() <= NEAR_DUPLICATE_MAX_DISTANCE);
    }

    #[test]
    fn test_different_images_are_not_duplicates() {
        let result = are_duplicate(
            &encode_png(&split_image(true)),
            &encode_png(&split_image(false)),
        );
        assert!(!result.is_duplicate);
        assert_eq!(result.hamming_distance, Some(64));
    }

    #[test]
    fn test_undecodable_input_is_not_duplicate() {
        let result = are_duplicate(b"garbage", &encode_png(&split_image(true)));
        assert!(!result.is_duplicate);
        assert!(result.reason.starts_with("comparison failed"));
        assert_eq!(result.hamming_distance, None);
    }

    #[test]
    fn test_missing_file_is_not_duplicate() {
        let result = are_duplicate_files(
            Path::new("/nonexistent/a.png"),
            Path::new("/nonexistent/b.png"),
        );
        assert!(!result.is_duplicate);
        assert!(result.reason.starts_with("comparison failed"));
    }

    #[test]
    fn test_registry_flow() {
        let mut registry = DuplicateRegistry::new();
        let first = encode_png(&split_image(true));
        let other = encode_png(&split_image(false));

        assert!(!registry.check_and_register("a.png", &first).is_duplicate);
        assert!(!registry.check_and_register("b.png", &other).is_duplicate);
        assert_eq!(registry.len(), 2);

        let again = registry.check_and_register("c.png", &first);
        assert!(again.is_duplicate);
        assert!(again.reason.contains("a.png"));
        assert_eq!(registry.len(), 2);

        registry.clear();
        assert!(registry.is_empty());
        assert!(!registry.check_and_register("c.png", &first).is_duplicate);
    }

    #[test]
    fn test_content_hash_hex() {
        assert_eq!(
            content_hash_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
