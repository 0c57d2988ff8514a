use image::{DynamicImage, GrayImage, ImageFormat, Luma};
use mammolens::duplicate::{are_duplicate, are_duplicate_files, DuplicateRegistry};
use std::path::Path;
use tempfile::TempDir;

/// Four bright/dark bands, easy to recognise after re-encoding
fn banded() -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_fn(128, 96, |x, y| {
        let bright = (x / 32 + y / 48) % 2 == 0;
        Luma([if bright { 210 } else { 35 }])
    }))
}

fn save(img: &DynamicImage, dir: &Path, name: &str, format: ImageFormat) -> std::path::PathBuf {
    let path = dir.join(name);
    img.save_with_format(&path, format).unwrap();
    path
}

#[test]
fn test_identical_files_are_exact_duplicates() {
    let dir = TempDir::new().unwrap();
    let a = save(&banded(), dir.path(), "a.png", ImageFormat::Png);
    let b = dir.path().join("b.png");
    std::fs::copy(&a, &b).unwrap();

    let result = are_duplicate_files(&a, &b);
    assert!(result.is_duplicate);
    assert!(result.reason.contains("exact"));
}

#[test]
fn test_reencoded_image_is_near_duplicate() {
    let dir = TempDir::new().unwrap();
    let png = save(&banded(), dir.path(), "scan.png", ImageFormat::Png);
    let jpg = save(&banded(), dir.path(), "scan.jpg", ImageFormat::Jpeg);

    let result = are_duplicate_files(&png, &jpg);
    assert!(result.is_duplicate, "{}", result.reason);
    assert!(result.reason.contains("similarity"));
    assert!(result.hamming_distance.unwrap() <= 5);
}

#[test]
fn test_resized_image_is_near_duplicate() {
    let original = banded();
    let smaller = original.resize_exact(64, 48, image::imageops::FilterType::Triangle);

    let mut a = std::io::Cursor::new(Vec::new());
    let mut b = std::io::Cursor::new(Vec::new());
    original.write_to(&mut a, ImageFormat::Png).unwrap();
    smaller.write_to(&mut b, ImageFormat::Png).unwrap();

    let result = are_duplicate(a.get_ref(), b.get_ref());
    assert!(result.is_duplicate, "{}", result.reason);
}

#[test]
fn test_inverted_image_is_not_duplicate() {
    let dir = TempDir::new().unwrap();
    let mut inverted = banded();
    inverted.invert();
    let a = save(&banded(), dir.path(), "a.png", ImageFormat::Png);
    let b = save(&inverted, dir.path(), "b.png", ImageFormat::Png);

    let result = are_duplicate_files(&a, &b);
    assert!(!result.is_duplicate);
    assert!(result.reason.starts_with("not a duplicate"));
}

#[test]
fn test_unreadable_file_never_errors() {
    let dir = TempDir::new().unwrap();
    let a = save(&banded(), dir.path(), "a.png", ImageFormat::Png);
    let broken = dir.path().join("broken.png");
    std::fs::write(&broken, b"\x89PNG truncated").unwrap();

    let result = are_duplicate_files(&a, &broken);
    assert!(!result.is_duplicate);
    assert!(result.reason.starts_with("comparison failed"));
}

#[test]
fn test_registry_detects_reupload() {
    let mut png = std::io::Cursor::new(Vec::new());
    let mut jpg = std::io::Cursor::new(Vec::new());
    banded().write_to(&mut png, ImageFormat::Png).unwrap();
    banded().write_to(&mut jpg, ImageFormat::Jpeg).unwrap();

    let mut registry = DuplicateRegistry::new();
    assert!(!registry.check_and_register("first.png", png.get_ref()).is_duplicate);

    let again = registry.check_and_register("again.jpg", jpg.get_ref());
    assert!(again.is_duplicate);
    assert!(again.reason.contains("first.png"));
    assert_eq!(registry.len(), 1);
}
