//! Command runners behind the CLI subcommands.

use anyhow::{Context, Result};
use log::{error, info, warn};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::batch::BatchAnalyzer;
use crate::classifier::ClassifierHandle;
use crate::color_utils::{colors, symbols};
use crate::config::{AnalyzeConfig, DedupConfig};
use crate::duplicate::{are_duplicate_files, DuplicateCheckResult};
use crate::image_input::{collect_images, InputPolicy};
use crate::onnx_session::OnnxClassifier;
use crate::output_manager::OutputManager;
use crate::pipeline::{self, AnalysisOutcome};
use crate::tissue::TissueMask;
use crate::visualization::{render_annotated, render_heatmap, render_overlay, save_rgba, LabelFont};

/// Counts for one `analyze` run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub analyzed: usize,
    pub failed: usize,
}

/// Load the ONNX classifier named in `config` and analyze every source
pub fn run_analysis(config: AnalyzeConfig) -> Result<RunSummary> {
    let classifier = OnnxClassifier::load(&config.model)?;
    analyze_with(ClassifierHandle::new(classifier), config)
}

/// Analyze every source with an already-loaded classifier
pub fn analyze_with(handle: ClassifierHandle, config: AnalyzeConfig) -> Result<RunSummary> {
    let images = collect_images(
        &config.base.sources,
        InputPolicy::from_strict_flag(config.base.strict),
    )?;
    if images.is_empty() {
        warn!("{}No images to analyze", symbols::warning());
        return Ok(RunSummary::default());
    }

    let font = config
        .render
        .font_path
        .as_deref()
        .map(LabelFont::load)
        .transpose()?;

    info!(
        "{}Analyzing {} image(s) with {} | threshold: {} | jobs: {}",
        symbols::analysis_start(),
        images.len(),
        handle.name(),
        config.analysis.threshold.describe(),
        config.jobs
    );

    // One inference at a time: the ONNX session is shared
    let analyzer = BatchAnalyzer::new(handle, config.analysis.clone(), 1)
        .with_timeout(config.timeout);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let start = Instant::now();
    let results = runtime.block_on(analyzer.analyze_files(images, config.jobs));

    let mut summary = RunSummary::default();
    for (path, result) in results {
        let written = result.map_err(anyhow::Error::from).and_then(|outcome| {
            write_outputs(&config, &path, &outcome, font.as_ref())?;
            Ok(outcome)
        });
        match written {
            Ok(outcome) => {
                summary.analyzed += 1;
                info!(
                    "{} | {} | {} region(s) | p = {:.3}",
                    path.display(),
                    colors::risk_tier(outcome.result.risk_tier),
                    outcome.result.regions.len(),
                    outcome.result.classifier_probability
                );
            }
            Err(e) => {
                summary.failed += 1;
                error!("{}{}: {e:#}", symbols::operation_failed(), path.display());
            }
        }
    }

    let elapsed = start.elapsed();
    match (summary.analyzed, summary.failed) {
        (0, _) => anyhow::bail!("All {} image(s) failed to analyze", summary.failed),
        (ok, 0) => info!(
            "{}Analyzed {ok} image(s) in {:.2}s",
            symbols::completed_successfully(),
            elapsed.as_secs_f64()
        ),
        (ok, failed) => warn!(
            "{}Analyzed {ok} image(s), {failed} failed, in {:.2}s",
            symbols::completed_partially_successfully(),
            elapsed.as_secs_f64()
        ),
    }
    Ok(summary)
}

/// Write the JSON report and whichever renderings were requested
pub fn write_outputs(
    config: &AnalyzeConfig,
    input_path: &Path,
    outcome: &AnalysisOutcome,
    font: Option<&LabelFont>,
) -> Result<Vec<PathBuf>> {
    let manager = OutputManager::new(&config.base, input_path);
    let mut written = vec![manager.write_report(&outcome.result)?];

    let render = &config.render;
    if render.heatmap {
        let path = manager.auxiliary_path("heatmap", "png")?;
        save_rgba(render_heatmap(&outcome.saliency, render.style.colormap), &path)?;
        written.push(path);
    }

    if render.overlay || render.annotated {
        let original = pipeline::load_image(input_path)?;
        if render.overlay {
            let tissue = render
                .tissue_only
                .then(|| TissueMask::from_image(&original));
            let path = manager.auxiliary_path("overlay", "png")?;
            save_rgba(
                render_overlay(&original, &outcome.saliency, &render.style, tissue.as_ref())?,
                &path,
            )?;
            written.push(path);
        }
        if render.annotated {
            let path = manager.auxiliary_path("annotated", "png")?;
            save_rgba(render_annotated(&original, &outcome.result.regions, font), &path)?;
            written.push(path);
        }
    }

    log::debug!(
        "Wrote {}",
        written
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok(written)
}

/// One pairwise duplicate comparison
#[derive(Debug, Clone, Serialize)]
pub struct PairCheck {
    pub first: PathBuf,
    pub second: PathBuf,
    #[serde(flatten)]
    pub result: DuplicateCheckResult,
}

/// Compare every pair of the given files
pub fn run_dedup(config: DedupConfig) -> Result<Vec<PairCheck>> {
    let files: Vec<PathBuf> = config.base.sources.iter().map(PathBuf::from).collect();
    if files.len() < 2 {
        anyhow::bail!("Need at least two images to compare");
    }
    info!(
        "{}Checking {} image(s) for duplicates",
        symbols::dedup_start(),
        files.len()
    );

    let mut checks = Vec::new();
    for (i, first) in files.iter().enumerate() {
        for second in &files[i + 1..] {
            let result = are_duplicate_files(first, second);
            checks.push(PairCheck {
                first: first.clone(),
                second: second.clone(),
                result,
            });
        }
    }

    let duplicates = checks.iter().filter(|c| c.result.is_duplicate).count();
    info!(
        "{}{} of {} pair(s) are duplicates",
        symbols::completed_successfully(),
        duplicates,
        checks.len()
    );
    Ok(checks)
}
