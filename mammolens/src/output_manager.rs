//! Output path management for per-image reports and rendered images.
//!
//! - Without `--output-dir`, outputs go next to the input with a suffix
//!   (`scan_analysis.json`, `scan_heatmap.png`)
//! - With `--output-dir`, the main report drops its suffix (`out/scan.json`)
//! - Existing files are only replaced with `--force`

use anyhow::{Context, Result};
use log::debug;
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::BaseConfig;

pub const REPORT_SUFFIX: &str = "analysis";

pub struct OutputManager<'a> {
    base: &'a BaseConfig,
    input_path: &'a Path,
}

impl<'a> OutputManager<'a> {
    pub fn new(base: &'a BaseConfig, input_path: &'a Path) -> Self {
        Self { base, input_path }
    }

    fn input_stem(&self) -> &str {
        self.input_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("output")
    }

    fn place(&self, filename: String) -> Result<PathBuf> {
        let path = match &self.base.output_dir {
            Some(dir) => {
                let dir = Path::new(dir);
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("Failed to create {}", dir.display()))?;
                dir.join(filename)
            }
            None => self
                .input_path
                .parent()
                .unwrap_or(Path::new("."))
                .join(filename),
        };

        if path.exists() && !self.base.force {
            anyhow::bail!(
                "Output {} already exists (use --force to overwrite)",
                path.display()
            );
        }
        Ok(path)
    }

    /// Path of the JSON analysis report
    pub fn report_path(&self) -> Result<PathBuf> {
        let stem = self.input_stem();
        let filename = if self.base.output_dir.is_some() {
            format!("{stem}.json")
        } else {
            format!("{stem}_{REPORT_SUFFIX}.json")
        };
        self.place(filename)
    }

    /// Path of an auxiliary output, which always carries its suffix
    pub fn auxiliary_path(&self, suffix: &str, extension: &str) -> Result<PathBuf> {
        self.place(format!("{}_{suffix}.{extension}", self.input_stem()))
    }

    /// Serialize `report` as pretty JSON to the report path
    pub fn write_report<T: Serialize>(&self, report: &T) -> Result<PathBuf> {
        let path = self.report_path()?;
        let json = serde_json::to_string_pretty(report)?;
        std::fs::write(&path, json + "\n")
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!("Saved report to: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn base(output_dir: Option<String>, force: bool) -> BaseConfig {
        BaseConfig {
            sources: vec!["scan.png".to_string()],
            device: "cpu".to_string(),
            output_dir,
            strict: true,
            force,
        }
    }

    #[test]
    fn test_report_next_to_input() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("scan.png");
        let config = base(None, false);

        let manager = OutputManager::new(&config, &input);
        assert_eq!(
            manager.report_path().unwrap(),
            temp_dir.path().join("scan_analysis.json")
        );
    }

    #[test]
    fn test_report_in_output_dir() {
        let temp_dir = TempDir::new().unwrap();
        let out = temp_dir.path().join("out");
        let input = temp_dir.path().join("scan.png");
        let config = base(Some(out.to_string_lossy().to_string()), false);

        let manager = OutputManager::new(&config, &input);
        assert_eq!(manager.report_path().unwrap(), out.join("scan.json"));
        assert!(out.is_dir());
        assert_eq!(
            manager.auxiliary_path("heatmap", "png").unwrap(),
            out.join("scan_heatmap.png")
        );
    }

    #[test]
    fn test_existing_output_requires_force() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("scan.png");
        std::fs::write(temp_dir.path().join("scan_overlay.png"), b"old").unwrap();

        let config = base(None, false);
        let err = OutputManager::new(&config, &input)
            .auxiliary_path("overlay", "png")
            .unwrap_err();
        assert!(err.to_string().contains("--force"));

        let forced = base(None, true);
        assert!(OutputManager::new(&forced, &input)
            .auxiliary_path("overlay", "png")
            .is_ok());
    }

    #[test]
    fn test_write_report() {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("scan.png");
        let config = base(None, false);

        let path = OutputManager::new(&config, &input)
            .write_report(&serde_json::json!({ "risk_tier": "Low" }))
            .unwrap();
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("\"risk_tier\": \"Low\""));
    }
}
