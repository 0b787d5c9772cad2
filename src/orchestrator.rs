//! Concurrent execution of package jobs.
//!
//! The orchestrator fans one [`PackageJob`] out per plugin, with at most
//! `workers` jobs between admission and completion at any time, and
//! consumes them in the order they finish.
//!
//! # Architecture
//!
//! ```text
//!  Vec<PluginDescriptor>
//!         │
//!         │ spawn one task per plugin
//!         ▼
//!  JoinSet<PackageJob> ◄── Semaphore(workers) gates admission
//!         │
//!         │ join_next()  (completion order)
//!         ▼
//!    PackageOutcome ──► Reporter (progress line)
//!         │
//!         └──────────► BatchReporter ──► ResultStore
//! ```
//!
//! All downloads and unpacked packages live under one scratch directory
//! that is created before the first job and removed after the final flush,
//! also when the run fails.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::config::{RunConfig, RunConfiguration};
use crate::executor::TestExecutor;
use crate::fetch::ArtifactFetcher;
use crate::job::{JobContext, PackageJob};
use crate::package::{PackageOutcome, PackageStatus, PluginDescriptor};
use crate::report::{BatchReporter, Publisher, Reporter};
use crate::storage::ResultStore;

/// Aggregated results of a compatibility run.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Number of packages processed.
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub no_dist: usize,
    pub skipped: usize,
    /// Results newly posted to storage.
    pub posted: usize,
    /// Wall-clock duration of the run.
    pub duration: Duration,
}

impl RunSummary {
    fn add(&mut self, outcome: &PackageOutcome) {
        self.total += 1;
        match outcome.status {
            PackageStatus::Passed => self.passed += 1,
            PackageStatus::Failed => self.failed += 1,
            PackageStatus::NoDist => self.no_dist += 1,
            PackageStatus::Skipped => self.skipped += 1,
        }
    }
}

/// Caps the number of plugins tested.
///
/// An explicit limit always wins. Without one, a run that cannot publish is
/// capped at `post_chunks * 3` so unpublished runs stay short.
pub fn effective_limit(limit: Option<usize>, can_publish: bool, post_chunks: usize) -> Option<usize> {
    match limit {
        Some(limit) => Some(limit),
        None if !can_publish => Some(post_chunks * 3),
        None => None,
    }
}

/// Runs package jobs and routes their outcomes.
pub struct Orchestrator<R> {
    fetcher: Arc<ArtifactFetcher>,
    executor: Arc<TestExecutor>,
    cache: Option<Arc<dyn ResultStore>>,
    run: RunConfiguration,
    workers: usize,
    post_chunks: usize,
    test_timeout: Duration,
    batch: BatchReporter,
    reporter: R,
    scratch_parent: Option<PathBuf>,
}

impl<R: Reporter> Orchestrator<R> {
    /// Creates an orchestrator that neither consults nor publishes to
    /// storage.
    pub fn new(
        settings: &RunConfig,
        run: RunConfiguration,
        fetcher: Arc<ArtifactFetcher>,
        executor: Arc<TestExecutor>,
        reporter: R,
    ) -> Self {
        Self {
            fetcher,
            executor,
            cache: None,
            batch: BatchReporter::new(run.clone(), settings.post_chunks, None),
            run,
            workers: settings.workers.max(1),
            post_chunks: settings.post_chunks,
            test_timeout: Duration::from_secs(settings.test_timeout_secs),
            reporter,
            scratch_parent: None,
        }
    }

    /// Skips packages whose result `store` already has.
    pub fn with_cache(mut self, store: Arc<dyn ResultStore>) -> Self {
        self.cache = Some(store);
        self
    }

    /// Posts results through `publisher`.
    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.batch = BatchReporter::new(self.run.clone(), self.post_chunks, Some(publisher));
        self
    }

    /// Creates the scratch directory inside `dir` instead of the system
    /// temporary directory.
    pub fn with_scratch_parent(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_parent = Some(dir.into());
        self
    }

    fn create_scratch(&self) -> Result<tempfile::TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("plugincompat-");
        let scratch = match &self.scratch_parent {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        };
        scratch.context("Failed to create scratch directory")
    }

    /// Tests every plugin and publishes the results.
    ///
    /// # Errors
    ///
    /// Returns an error if the scratch directory cannot be created, a job
    /// fails with an unsupported archive format, or posting a batch fails.
    /// Jobs still running at that point are cancelled.
    pub async fn run(&self, plugins: Vec<PluginDescriptor>) -> Result<RunSummary> {
        let start = Instant::now();
        let total = plugins.len();

        let scratch = self.create_scratch()?;
        debug!("Scratch directory: {}", scratch.path().display());

        let context = Arc::new(JobContext {
            fetcher: self.fetcher.clone(),
            executor: self.executor.clone(),
            cache: self.cache.clone(),
            run: self.run.clone(),
            test_timeout: self.test_timeout,
            scratch_root: scratch.path().to_path_buf(),
        });

        debug!("Processing {} packages with {} workers", total, self.workers);
        self.reporter.on_run_start(total, self.workers).await;

        let semaphore = Arc::new(Semaphore::new(self.workers));
        let mut jobs = JoinSet::new();
        for plugin in plugins {
            let context = context.clone();
            let semaphore = semaphore.clone();
            jobs.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .context("Worker pool closed")?;
                PackageJob::new(plugin, context).run().await
            });
        }

        let mut summary = RunSummary::default();
        let mut completed = 0;
        while let Some(joined) = jobs.join_next().await {
            let outcome = joined.context("Package job panicked")??;
            completed += 1;

            self.reporter
                .on_package_complete(&outcome, completed, total)
                .await;
            summary.add(&outcome);
            self.batch.record(outcome).await?;
        }

        summary.posted = self.batch.finalize().await?;
        summary.duration = start.elapsed();

        scratch
            .close()
            .context("Failed to remove scratch directory")?;

        self.reporter.on_run_complete(summary.posted).await;
        Ok(summary)
    }
}
