//! Expanding CLI sources (files, directories, glob patterns) into image paths.

use anyhow::{anyhow, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::color_utils::symbols;

const SUPPORTED_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];

/// What to do with sources that are missing, unsupported or match nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputPolicy {
    /// Any bad source, or an empty result, is an error
    Strict,
    /// Bad sources are logged and skipped
    Permissive,
}

impl InputPolicy {
    pub fn from_strict_flag(strict: bool) -> Self {
        if strict {
            InputPolicy::Strict
        } else {
            InputPolicy::Permissive
        }
    }

    fn reject(self, message: String) -> Result<()> {
        match self {
            InputPolicy::Strict => Err(anyhow!(message)),
            InputPolicy::Permissive => {
                log::warn!("{}{}", symbols::warning(), message);
                Ok(())
            }
        }
    }
}

/// Case-insensitive extension check
pub fn is_supported_image_file(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
        .is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

fn looks_like_glob(source: &str) -> bool {
    source.contains(['*', '?', '['])
}

/// Supported images directly inside `dir`, sorted
pub fn find_images_in_directory(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && is_supported_image_file(&path) {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

fn expand_glob(pattern: &str, policy: InputPolicy, found: &mut Vec<PathBuf>) -> Result<()> {
    let paths = match glob::glob(pattern) {
        Ok(paths) => paths,
        Err(e) => return policy.reject(format!("Invalid glob pattern {pattern}: {e}")),
    };

    let before = found.len();
    for entry in paths {
        match entry {
            Ok(path) if path.is_file() && is_supported_image_file(&path) => found.push(path),
            Ok(_) => {}
            Err(e) => log::warn!(
                "{}Error reading path in glob {pattern}: {e}",
                symbols::warning()
            ),
        }
    }
    if found.len() == before {
        policy.reject(format!("No image files found matching pattern: {pattern}"))?;
    }
    Ok(())
}

/// Collect image paths from every source. The result is sorted and deduplicated.
pub fn collect_images(sources: &[String], policy: InputPolicy) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();

    for source in sources {
        let path = Path::new(source);
        if path.is_file() {
            if is_supported_image_file(path) {
                found.push(path.to_path_buf());
            } else {
                policy.reject(format!(
                    "File is not a supported image format: {}",
                    path.display()
                ))?;
            }
        } else if path.is_dir() {
            found.extend(find_images_in_directory(path)?);
        } else if looks_like_glob(source) {
            expand_glob(source, policy, &mut found)?;
        } else {
            policy.reject(format!("File does not exist: {source}"))?;
        }
    }

    found.sort();
    found.dedup();

    if found.is_empty() && policy == InputPolicy::Strict {
        return Err(anyhow!("No image files found in the specified sources"));
    }
    Ok(found)
}
