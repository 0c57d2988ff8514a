//! Bounded concurrent analysis of many images.
//!
//! Each image runs on the tokio blocking pool. Classifier calls are gated by a
//! semaphore sized to the inference budget, and every image's whole analysis
//! can be bounded by a deadline. A timed-out analysis is abandoned, but a
//! classifier call already running holds its permit until it returns.

use image::DynamicImage;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinError;

use crate::classifier::ClassifierHandle;
use crate::config::AnalysisConfig;
use crate::error::AnalysisError;
use crate::pipeline::{self, AnalysisOutcome};

fn join_failure(e: JoinError) -> AnalysisError {
    AnalysisError::Classifier(anyhow::anyhow!("analysis task failed: {e}"))
}

#[derive(Clone)]
pub struct BatchAnalyzer {
    handle: ClassifierHandle,
    config: Arc<AnalysisConfig>,
    inference_permits: Arc<Semaphore>,
    timeout: Option<Duration>,
}

impl BatchAnalyzer {
    /// `max_concurrent_inferences` bounds simultaneous classifier calls (at least 1)
    pub fn new(
        handle: ClassifierHandle,
        config: AnalysisConfig,
        max_concurrent_inferences: usize,
    ) -> Self {
        Self {
            handle,
            config: Arc::new(config),
            inference_permits: Arc::new(Semaphore::new(max_concurrent_inferences.max(1))),
            timeout: None,
        }
    }

    /// Abandon any single image whose analysis takes longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run_stages(&self, img: Arc<DynamicImage>) -> Result<AnalysisOutcome, AnalysisError> {
        let spec = self.handle.input_spec();

        let (prep_img, prep_config) = (img.clone(), self.config.clone());
        let input = tokio::task::spawn_blocking(move || {
            pipeline::prepare(&prep_img, spec, &prep_config)
        })
        .await
        .map_err(join_failure)??;

        // The permit moves into the blocking task so an abandoned call keeps
        // holding it until the classifier actually returns
        let permit = self
            .inference_permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AnalysisError::Classifier(anyhow::anyhow!("inference pool is closed")))?;
        let handle = self.handle.clone();
        let output = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            handle.classify(&input)
        })
        .await
        .map_err(join_failure)?
        .map_err(AnalysisError::Classifier)?;

        let config = self.config.clone();
        tokio::task::spawn_blocking(move || pipeline::postprocess(&img, &output, &config))
            .await
            .map_err(join_failure)?
    }

    async fn with_deadline<F>(&self, work: F) -> Result<AnalysisOutcome, AnalysisError>
    where
        F: std::future::Future<Output = Result<AnalysisOutcome, AnalysisError>>,
    {
        match self.timeout {
            Some(limit) => tokio::time::timeout(limit, work)
                .await
                .map_err(|_| AnalysisError::Timeout(limit))?,
            None => work.await,
        }
    }

    /// Analyze one decoded image
    pub async fn analyze_one(&self, img: DynamicImage) -> Result<AnalysisOutcome, AnalysisError> {
        self.with_deadline(self.run_stages(Arc::new(img))).await
    }

    /// Read, decode and analyze one file. Reading counts against the deadline.
    pub async fn analyze_file(&self, path: PathBuf) -> Result<AnalysisOutcome, AnalysisError> {
        self.with_deadline(async {
            let img = tokio::task::spawn_blocking(move || pipeline::load_image(&path))
                .await
                .map_err(join_failure)??;
            self.run_stages(Arc::new(img)).await
        })
        .await
    }

    /// Analyze images concurrently. Results keep the input order.
    pub async fn analyze_all<K>(
        &self,
        images: Vec<(K, DynamicImage)>,
    ) -> Vec<(K, Result<AnalysisOutcome, AnalysisError>)> {
        let tasks: Vec<_> = images
            .into_iter()
            .map(|(key, img)| {
                let this = self.clone();
                (key, tokio::spawn(async move { this.analyze_one(img).await }))
            })
            .collect();

        let mut results = Vec::with_capacity(tasks.len());
        for (key, task) in tasks {
            results.push((key, task.await.unwrap_or_else(|e| Err(join_failure(e)))));
        }
        results
    }

    /// Analyze files with at most `jobs` images in flight. Results keep the input order.
    pub async fn analyze_files(
        &self,
        paths: Vec<PathBuf>,
        jobs: usize,
    ) -> Vec<(PathBuf, Result<AnalysisOutcome, AnalysisError>)> {
        let in_flight = Arc::new(Semaphore::new(jobs.max(1)));
        let mut tasks = Vec::with_capacity(paths.len());

        for path in paths {
            let this = self.clone();
            let in_flight = in_flight.clone();
            let task_path = path.clone();
            let task = tokio::spawn(async move {
                let _slot = in_flight.acquire_owned().await.map_err(|_| {
                    AnalysisError::Classifier(anyhow::anyhow!("job pool is closed"))
                })?;
                log::debug!("Analyzing {}", task_path.display());
                this.analyze_file(task_path).await
            });
            tasks.push((path, task));
        }

        let mut results = Vec::with_capacity(tasks.len());
        for (path, task) in tasks {
            results.push((path, task.await.unwrap_or_else(|e| Err(join_failure(e)))));
        }
        results
    }
}
